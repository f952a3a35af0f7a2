pub mod config;
pub mod directory;
pub mod graph;
pub mod http;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod ws;
