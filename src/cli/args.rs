//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use clap::Parser;
use std::path::PathBuf;

use crate::pairing::DEFAULT_UID_LENGTH;

/// CLI arguments for the rendezvous server
#[derive(Debug, Parser)]
#[command(name = "rendezvous-server")]
#[command(about = "TLS rendezvous server that pairs downloaders and uploaders by a short identifier", long_about = None)]
pub struct CliArgs {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Listening port
    #[arg(short, long, default_value_t = 50977)]
    pub port: u16,

    /// Directory holding the TLS certificate and key
    #[arg(long, value_name = "DIR", default_value = "./rendezvous-data")]
    pub app_dir: PathBuf,

    /// Length of the identifiers handed to downloaders
    #[arg(long, default_value_t = DEFAULT_UID_LENGTH)]
    pub uid_length: usize,

    /// Seconds a downloader may wait for an uploader
    #[arg(long, value_name = "SECS", default_value_t = 3600)]
    pub ceiling_timeout: u64,

    /// Seconds a peer has to answer a liveness ping
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    pub liveness_deadline: u64,

    /// Seconds between liveness checks
    #[arg(long, value_name = "SECS", default_value_t = 1)]
    pub probe_interval: u64,

    /// Seconds a matched downloader has to acknowledge readiness
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    pub confirm_timeout: u64,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long)]
    pub quiet: bool,
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}
