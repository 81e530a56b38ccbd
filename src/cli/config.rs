//! CLI configuration module
//!
//! Validated server configuration built from the command line.

use crate::cli::args::CliArgs;
use crate::error::RendezvousError;
use crate::pairing::{DEFAULT_UID_LENGTH, MAX_UID_LENGTH, MIN_UID_LENGTH};
use crate::server::{LivenessSettings, PairingSettings, DEFAULT_CEILING_TIMEOUT, DEFAULT_CONFIRM_TIMEOUT};
use crate::server::liveness::{DEFAULT_LIVENESS_DEADLINE, DEFAULT_PROBE_INTERVAL};
use std::path::PathBuf;
use std::time::Duration;
use anyhow::Result;

/// Longest accepted value for any configured timeout or interval
pub const MAX_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Configuration for the rendezvous server
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind
    pub host: String,
    /// Listening port
    pub port: u16,
    /// Directory holding the TLS certificate and key
    pub app_dir: PathBuf,
    /// Identifier length
    pub uid_length: usize,
    /// Maximum downloader wait
    pub ceiling_timeout: Duration,
    /// Time a peer has to answer a ping
    pub liveness_deadline: Duration,
    /// Time between liveness checks
    pub probe_interval: Duration,
    /// Time a matched downloader has to acknowledge
    pub confirm_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 50977,
            app_dir: PathBuf::from("./rendezvous-data"),
            uid_length: DEFAULT_UID_LENGTH,
            ceiling_timeout: DEFAULT_CEILING_TIMEOUT,
            liveness_deadline: DEFAULT_LIVENESS_DEADLINE,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            confirm_timeout: DEFAULT_CONFIRM_TIMEOUT,
        }
    }
}

impl Config {
    /// Create configuration from CLI arguments
    pub fn from_args(args: &CliArgs) -> Self {
        Self {
            host: args.host.clone(),
            port: args.port,
            app_dir: args.app_dir.clone(),
            uid_length: args.uid_length,
            ceiling_timeout: Duration::from_secs(args.ceiling_timeout),
            liveness_deadline: Duration::from_secs(args.liveness_deadline),
            probe_interval: Duration::from_secs(args.probe_interval),
            confirm_timeout: Duration::from_secs(args.confirm_timeout),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(RendezvousError::config_error_with_field("Port cannot be 0", "port").into());
        }

        if self.host.trim().is_empty() {
            return Err(RendezvousError::config_error_with_field("host cannot be empty", "host").into());
        }

        if self.app_dir.as_os_str().is_empty() {
            return Err(RendezvousError::config_error_with_field("app_dir cannot be empty", "app_dir").into());
        }

        if !(MIN_UID_LENGTH..=MAX_UID_LENGTH).contains(&self.uid_length) {
            return Err(RendezvousError::config_error_with_field(
                format!("uid_length must be between {} and {}", MIN_UID_LENGTH, MAX_UID_LENGTH),
                "uid_length"
            ).into());
        }

        let durations = [
            ("ceiling_timeout", self.ceiling_timeout),
            ("liveness_deadline", self.liveness_deadline),
            ("probe_interval", self.probe_interval),
            ("confirm_timeout", self.confirm_timeout),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(RendezvousError::config_error_with_field(format!("{} must be positive", field), field).into());
            }
            if value > MAX_DURATION {
                return Err(RendezvousError::config_error_with_field(
                    format!("{} must not exceed {} seconds", field, MAX_DURATION.as_secs()),
                    field
                ).into());
            }
        }

        // A probe interval at or above the deadline could never catch a miss in time
        if self.probe_interval >= self.liveness_deadline {
            return Err(RendezvousError::config_error_with_field(
                "probe_interval must be shorter than liveness_deadline",
                "probe_interval"
            ).into());
        }

        Ok(())
    }

    /// Get the listen address for incoming connections
    pub fn get_listen_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Settings consumed by the connection handler
    pub fn pairing_settings(&self) -> PairingSettings {
        PairingSettings {
            uid_length: self.uid_length,
            ceiling_timeout: self.ceiling_timeout,
            confirm_timeout: self.confirm_timeout,
            liveness: LivenessSettings {
                probe_interval: self.probe_interval,
                deadline: self.liveness_deadline,
            },
        }
    }
}
