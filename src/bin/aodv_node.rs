#[macro_use]
extern crate slog;
extern crate aodv_mesh;

use aodv_mesh::node::listener::{spawn_listener, UdpListener};
use aodv_mesh::node::node_config::NodeConfig;
use aodv_mesh::node::transport::{resolve_interface, UdpTransport};
use aodv_mesh::node::{self, NodeHandle};
use aodv_mesh::{logging, AodvError, AodvErrorKind};
use clap::{App, Arg, ArgMatches};
use slog::Logger;
use std::path::{PathBuf, MAIN_SEPARATOR};
use std::{env, fs, thread};

const ARG_CONFIG: &str = "config";
const ARG_NODE_NAME: &str = "node_name";
const ARG_WORK_DIR: &str = "work_dir";
const ARG_INTERFACE: &str = "interface";
const ARG_TERMINAL_LOG: &str = "term_log";
const VERSION: &str = env!("CARGO_PKG_VERSION");
const CONFIG_FILE_NAME: &str = "node.toml";
const LISTENER_READ_TIMEOUT: u64 = 500; //milliseconds
const ERROR_EXECUTION_FAILURE: i32 = 1;
const ERROR_INITIALIZATION: i32 = 2;

fn run(config: NodeConfig) -> Result<(), AodvError> {
    let log_file_name = format!(
        "{}{}{}{}{}.log",
        &config.work_dir, MAIN_SEPARATOR, logging::LOG_DIR_NAME, MAIN_SEPARATOR, &config.node_name
    );
    let logger = logging::create_logger(&log_file_name, config.term_log.unwrap_or(false))
        .unwrap_or_else(|e| {
            println!("aodv_node failed with the following error: {}", e);
            ::std::process::exit(ERROR_INITIALIZATION);
        });
    info!(logger, "Node Config: {:?}", &config);

    let interface_name = match config.interface_name {
        Some(ref name) => name.clone(),
        None => {
            let err_msg = String::from("An interface name must be provided");
            return Err(AodvError::new(AodvErrorKind::Configuration(err_msg)));
        }
    };
    let (interface_index, iface_address) = resolve_interface(&interface_name)?;
    let me = config.address.unwrap_or(iface_address);
    let port = config.aodv_config().port;
    info!(logger, "Using interface"; "interface" => &interface_name, "address" => %me);

    let transport = UdpTransport::new(interface_index, port)?;
    let (node, handle) = config.create_node(me, Box::new(transport), logger.clone())?;

    let listener = UdpListener::new(interface_index, port, LISTENER_READ_TIMEOUT, logger.clone())?;
    let _listener_thread = spawn_listener(listener, handle.clone(), logger.clone()).map_err(|e| {
        let err_msg = String::from("Failed to start the listener thread");
        AodvError {
            kind: AodvErrorKind::Contention(err_msg),
            cause: Some(Box::new(e)),
        }
    })?;
    start_command_loop(handle, logger.clone())?;

    node.run()
}

fn start_command_loop(handle: NodeHandle, logger: Logger) -> Result<(), AodvError> {
    thread::Builder::new()
        .name(String::from("CommandLoop"))
        .spawn(move || node::command_loop(&logger, handle))
        .map(|_| ())
        .map_err(|e| {
            let err_msg = String::from("Failed to start the command thread");
            AodvError {
                kind: AodvErrorKind::Contention(err_msg),
                cause: Some(Box::new(e)),
            }
        })
}

fn get_cli_parameters<'a>() -> ArgMatches<'a> {
    App::new("aodv_node")
        .version(VERSION)
        .about("AODV (RFC 3561) routing node for IPv6 mesh networks")
        .arg(
            Arg::with_name(ARG_CONFIG)
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Configuration file for the node.")
                .takes_value(true),
        )
        .arg(
            Arg::with_name(ARG_WORK_DIR)
                .short("d")
                .long("work_dir")
                .value_name("DIR")
                .help("Operating directory for the program, where logs will be placed.")
                .takes_value(true),
        )
        .arg(
            Arg::with_name(ARG_NODE_NAME)
                .short("n")
                .long("node_name")
                .value_name("NAME")
                .help("Name of this node. Used for the log file.")
                .takes_value(true),
        )
        .arg(
            Arg::with_name(ARG_INTERFACE)
                .short("i")
                .long("interface")
                .value_name("IFACE")
                .help("Network interface on which AODV runs.")
                .takes_value(true),
        )
        .arg(
            Arg::with_name(ARG_TERMINAL_LOG)
                .short("l")
                .long("log_to_terminal")
                .value_name("true/false")
                .help("Should this node log operations to the terminal as well")
                .takes_value(true),
        )
        .get_matches()
}

fn validate_config(config: &mut NodeConfig, matches: &ArgMatches) -> Result<(), AodvError> {
    //node_name
    if let Some(name) = matches.value_of(ARG_NODE_NAME) {
        config.node_name = name.to_string();
    }
    if config.node_name.is_empty() {
        let err_msg = String::from("node_name can't be empty");
        return Err(AodvError::new(AodvErrorKind::Configuration(err_msg)));
    }

    //work_dir
    if let Some(dir) = matches.value_of(ARG_WORK_DIR) {
        config.work_dir = dir.to_string();
    }
    let dir_info = fs::metadata(&config.work_dir).map_err(|e| {
        let err_msg = format!("work_dir {} is not a valid directory", &config.work_dir);
        AodvError {
            kind: AodvErrorKind::Configuration(err_msg),
            cause: Some(Box::new(e)),
        }
    })?;
    if !dir_info.is_dir() || dir_info.permissions().readonly() {
        let err_msg = format!("work_dir {} is not a writable directory", &config.work_dir);
        return Err(AodvError::new(AodvErrorKind::Configuration(err_msg)));
    }

    //Interface
    if let Some(iface) = matches.value_of(ARG_INTERFACE) {
        config.interface_name = Some(iface.to_string());
    }

    //Log to terminal
    config.term_log = matches
        .value_of(ARG_TERMINAL_LOG)
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .or(config.term_log);

    //Protocol parameters are checked again by the engine. Fail early here.
    config.aodv_config().validate()
}

/// The init process reads the configuration file and applies the command line parameters over it.
fn init(matches: &ArgMatches) -> Result<NodeConfig, AodvError> {
    let config_file_path = match matches.value_of(ARG_CONFIG) {
        Some(path) => PathBuf::from(path),
        None => {
            //No configuration file was passed. Look for default option: current_dir + default name.
            let mut current_dir = env::current_dir().map_err(|e| {
                let err_msg = String::from("Failed to read current directory");
                AodvError {
                    kind: AodvErrorKind::Configuration(err_msg),
                    cause: Some(Box::new(e)),
                }
            })?;
            current_dir.push(CONFIG_FILE_NAME);
            current_dir
        }
    };
    let mut configuration = NodeConfig::load_from_file(&config_file_path)?;
    validate_config(&mut configuration, matches)?;

    Ok(configuration)
}

fn main() {
    //Enable the a more readable version of backtraces
    color_backtrace::install();

    let matches = get_cli_parameters();

    let config = init(&matches).unwrap_or_else(|e| {
        eprintln!("aodv_node failed with the following error: {}", e);
        std::process::exit(ERROR_INITIALIZATION);
    });

    if let Err(ref e) = run(config) {
        eprintln!("aodv_node failed with the following error: {}", e);
        std::process::exit(ERROR_EXECUTION_FAILURE);
    }
}
