pub mod app;
pub mod backends;
pub mod cli;
pub mod cmd;
pub mod config;
pub mod detector;
pub mod error;
pub mod metrics;
pub mod server;
pub mod status;
