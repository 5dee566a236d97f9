use super::super::*;
use aodv_mesh::node::node_config::NodeConfig;

#[test]
fn help_succeeds() {
    let program = get_node_path();
    assert_cli::Assert::command(&[&program])
        .with_args(&["--help"])
        .succeeds()
        .and()
        .stdout()
        .contains("aodv_node")
        .unwrap();
}

#[test]
fn missing_config_file_fails() {
    let program = get_node_path();
    assert_cli::Assert::command(&[&program])
        .with_args(&["-c", "/no/such/node.toml"])
        .fails_with(2)
        .and()
        .stderr()
        .contains("Failed to open configuration file")
        .unwrap();
}

#[test]
fn config_without_interface_fails() {
    let work_dir = create_test_dir("cli_no_interface");
    let mut config = NodeConfig::new();
    config.work_dir = work_dir.to_string_lossy().into_owned();
    let mut config_path = work_dir.clone();
    config_path.push("node.toml");
    config.write_to_file(&config_path).unwrap();

    let program = get_node_path();
    let config_file = config_path.to_string_lossy().into_owned();
    assert_cli::Assert::command(&[&program])
        .with_args(&["-c", &config_file])
        .fails_with(1)
        .and()
        .stderr()
        .contains("An interface name must be provided")
        .unwrap();

    //The log file was created before failing
    let mut log_file = work_dir;
    log_file.push(logging::LOG_DIR_NAME);
    log_file.push("node1.log");
    assert!(log_file.exists());
}
