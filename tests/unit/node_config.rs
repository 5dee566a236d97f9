use super::super::*;
use aodv_mesh::aodv::Config;
use aodv_mesh::driver::{AodvDriver, RoutingDriver};
use aodv_mesh::node::node_config::NodeConfig;
use aodv_mesh::node::transport::SimulatedMedium;

fn sample_config() -> NodeConfig {
    let path = format!("{}/config/node.toml", env!("CARGO_MANIFEST_DIR"));
    NodeConfig::load_from_file(path).unwrap()
}

#[test]
fn sample_config_matches_defaults() {
    let config = sample_config();
    assert_eq!(config.node_name, "node1");
    assert_eq!(config.interface_name, Some(String::from("wlan0")));
    assert_eq!(config.term_log, Some(true));
    assert_eq!(config.address, None);
    assert_eq!(config.aodv_config(), Config::default());
}

#[test]
fn config_survives_a_write_and_load() {
    let mut config = sample_config();
    config.address = Some(node_addr(4));

    let mut path = create_test_dir("unit_config");
    path.push("copy.toml");
    config.write_to_file(&path).unwrap();

    assert_eq!(NodeConfig::load_from_file(&path).unwrap(), config);
}

#[test]
fn driver_from_config() {
    let config = sample_config();
    let me = node_addr(1);
    let medium = SimulatedMedium::new();
    let (node, _handle) = config
        .create_node(me, Box::new(medium.transport(me)), test_logger())
        .unwrap();

    let mut driver = AodvDriver::new(node, test_logger());
    driver.init().unwrap();
    assert_eq!(driver.name(), "AODV");
    assert!(!driver.node_is_root());
    //Nobody else on the medium
    assert!(driver.request_route_to(node_addr(2)).is_none());
    driver.shutdown().unwrap();
}
