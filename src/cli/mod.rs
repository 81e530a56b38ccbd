//! CLI module
//!
//! Command-line interface for the rendezvous server.

pub mod args;
pub mod config;

pub use args::CliArgs;
pub use config::Config;
