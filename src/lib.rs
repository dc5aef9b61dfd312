pub mod bridge;
pub mod cache;
pub mod channel;
pub mod cli;
pub mod config;
pub mod defs;
pub mod queue;
pub mod refresh;
pub mod server;
