extern crate aodv_mesh;
extern crate assert_cli;
extern crate chrono;

#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;

use aodv_mesh::logging;
use slog::Logger;
use std::env;
use std::fs;
use std::net::Ipv6Addr;
use std::path::PathBuf;

mod integration;
mod unit;

/***********************************************/
/**************** Helper functions *************/
/***********************************************/
fn get_node_path() -> String {
    String::from(env!("CARGO_BIN_EXE_aodv_node"))
}

fn create_test_dir(test_name: &str) -> PathBuf {
    let mut dir = env::temp_dir();
    dir.push(format!("aodv_mesh_{}", test_name));
    if !dir.exists() {
        fs::create_dir_all(&dir).unwrap();
    }
    dir
}

fn test_logger() -> Logger {
    logging::create_discard_logger()
}

/// Link-local address of node `n`.
fn node_addr(n: u16) -> Ipv6Addr {
    Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, n)
}
