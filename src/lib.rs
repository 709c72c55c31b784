pub mod allowlist;
pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod ports;
pub mod server;
pub mod sheets;
pub mod store;
pub mod telegram;
