//! This module defines the NodeConfig struct and related functions. It allows a configuration file
//! to be deserialized into a NodeConfig object that eventually creates a node.
use crate::aodv::Config;
use crate::node::transport::Transport;
use crate::node::{Node, NodeHandle};
use crate::{AodvError, AodvErrorKind};
use rand::rngs::StdRng;
use rand::SeedableRng;
use slog::Logger;
use std::fs::File;
use std::io::{Read, Write};
use std::net::Ipv6Addr;
use std::path::Path;

/// Protocol parameters as they appear in the configuration file. Missing values take the defaults.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Default)]
pub struct AodvSettings {
    ///UDP port used for control messages
    pub port: Option<u16>,
    ///Maximum number of hops a route request may travel
    pub net_diameter: Option<u8>,
    ///Lifetime of a route, in milliseconds
    pub route_timeout: Option<u32>,
    ///Minimum time between two route requests, in milliseconds
    pub rreq_interval: Option<u32>,
    ///Number of routes kept
    pub route_cache_size: Option<usize>,
    ///Number of recently seen route requests kept
    pub fw_cache_size: Option<usize>,
    ///Capacity of the node's mailbox
    pub event_queue_size: Option<usize>,
}

impl AodvSettings {
    /// Merges these settings over the defaults.
    pub fn to_config(&self) -> Config {
        let d = Config::default();
        Config {
            port: self.port.unwrap_or(d.port),
            net_diameter: self.net_diameter.unwrap_or(d.net_diameter),
            route_timeout: self.route_timeout.unwrap_or(d.route_timeout),
            rreq_interval: self.rreq_interval.unwrap_or(d.rreq_interval),
            route_cache_size: self.route_cache_size.unwrap_or(d.route_cache_size),
            fw_cache_size: self.fw_cache_size.unwrap_or(d.fw_cache_size),
            event_queue_size: self.event_queue_size.unwrap_or(d.event_queue_size),
        }
    }
}

/// Configuration for a node. An external client such as aodv_node can create NodeConfig objects
/// from CLI parameters or configuration files, leaving the construction of the node to this module.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct NodeConfig {
    ///Name of the node.
    pub node_name: String,
    ///Directory for the node to operate. Must have RW access to it. Log files will be written here.
    pub work_dir: String,
    ///Random seed used for all RNG operations.
    pub random_seed: u64,
    ///Network interface used for the UDP transport.
    pub interface_name: Option<String>,
    ///Address of this node. Taken from the interface when absent.
    pub address: Option<Ipv6Addr>,
    ///Also log to the terminal.
    pub term_log: Option<bool>,
    ///NOTE: The AODV settings are a TOML table, so they must be kept last in the structure.
    pub aodv: Option<AodvSettings>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig::new()
    }
}

impl NodeConfig {
    ///Creates a new configuration for a node with default settings.
    pub fn new() -> NodeConfig {
        NodeConfig {
            node_name: String::from("node1"),
            work_dir: String::from("."),
            random_seed: 0,
            interface_name: None,
            address: None,
            term_log: None,
            aodv: None,
        }
    }

    /// Protocol parameters for this node.
    pub fn aodv_config(&self) -> Config {
        match self.aodv {
            Some(ref settings) => settings.to_config(),
            None => Config::default(),
        }
    }

    ///Creates a new node with address `me` configured with the values of this object.
    pub fn create_node(
        &self,
        me: Ipv6Addr,
        transport: Box<dyn Transport>,
        logger: Logger,
    ) -> Result<(Node, NodeHandle), AodvError> {
        let mut rng = StdRng::seed_from_u64(self.random_seed);
        let logger = logger.new(o!("node" => self.node_name.clone()));
        Node::new(me, self.aodv_config(), &mut rng, transport, logger)
    }

    /// Reads a configuration from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(file_path: P) -> Result<NodeConfig, AodvError> {
        let mut file_content = String::new();
        let mut file = File::open(file_path.as_ref()).map_err(|e| {
            let err_msg = format!("Failed to open configuration file {:?}", file_path.as_ref());
            AodvError {
                kind: AodvErrorKind::Configuration(err_msg),
                cause: Some(Box::new(e)),
            }
        })?;

        file.read_to_string(&mut file_content).map_err(|e| {
            let err_msg = String::from("Failed to read configuration file");
            AodvError {
                kind: AodvErrorKind::Configuration(err_msg),
                cause: Some(Box::new(e)),
            }
        })?;
        toml::from_str(&file_content).map_err(|e| {
            let err_msg = String::from("Failed to deserialize configuration file");
            AodvError {
                kind: AodvErrorKind::Serialization(err_msg),
                cause: Some(Box::new(e)),
            }
        })
    }

    ///Writes the current configuration object to a formatted configuration file, that can be passed to
    ///the aodv_node binary.
    pub fn write_to_file<P: AsRef<Path>>(&self, file_path: P) -> Result<(), AodvError> {
        let data = toml::to_string(self).map_err(|e| {
            let err_msg = String::from("Error writing configuration to file");
            AodvError {
                kind: AodvErrorKind::Serialization(err_msg),
                cause: Some(Box::new(e)),
            }
        })?;
        let mut file = File::create(file_path.as_ref()).map_err(|e| {
            let err_msg = format!("Failed to create file {:?}", file_path.as_ref());
            AodvError {
                kind: AodvErrorKind::Configuration(err_msg),
                cause: Some(Box::new(e)),
            }
        })?;
        write!(file, "{}", data).map_err(|e| {
            let err_msg = String::from("Failed to write configuration file");
            AodvError {
                kind: AodvErrorKind::Configuration(err_msg),
                cause: Some(Box::new(e)),
            }
        })?;

        Ok(())
    }
}
