mod cli;
mod discovery;
