mod engine_chain;
mod node_config;
