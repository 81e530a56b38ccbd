//! Connection state module
//!
//! Defines the per-connection state machine and the outcomes a handler
//! can finish with.

use std::fmt;

/// Represents the state of a client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the ClientType message
    AwaitingClassification,
    /// Downloader holds an identifier and waits for an uploader
    Registered,
    /// Uploader classified, waiting for its UidRequest
    AwaitingUid,
    /// Uploader matched, waiting for the downloader's acknowledgement
    AwaitingConfirmation,
    /// An uploader matched this downloader
    Matched,
    /// Ceiling timeout elapsed
    TimedOut,
    /// The peer asked to stop
    Halted,
    /// The peer stopped answering pings
    LivenessFailed,
    /// Connection torn down
    Closed,
}

impl ConnectionState {
    /// Check if the connection reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Matched
                | ConnectionState::TimedOut
                | ConnectionState::Halted
                | ConnectionState::LivenessFailed
                | ConnectionState::Closed
        )
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::AwaitingClassification
    }
}

/// How a downloader session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloaderOutcome {
    /// An uploader matched; `confirmed` tells whether the downloader acknowledged
    Matched { uid: String, confirmed: bool },
    /// No uploader arrived before the ceiling timeout
    TimedOut { uid: String },
    /// The downloader sent Halt
    Halted { uid: String, reason: String },
    /// The downloader stopped answering pings or dropped the connection
    LivenessFailed { uid: String },
}

/// How an uploader session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploaderOutcome {
    /// Matched a downloader; `confirmed` tells whether it acknowledged readiness
    Paired { uid: String, confirmed: bool },
    /// No pending downloader had the requested id
    PeerNotFound { uid: String },
    /// The uploader halted or went silent while waiting for confirmation
    Abandoned { uid: String },
}

/// Final result of handling one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Downloader(DownloaderOutcome),
    Uploader(UploaderOutcome),
    /// Protocol or internal error ended the connection
    Rejected(String),
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutcome::Downloader(outcome) => match outcome {
                DownloaderOutcome::Matched { confirmed, .. } => {
                    write!(f, "downloader matched (confirmed: {})", confirmed)
                }
                DownloaderOutcome::TimedOut { .. } => write!(f, "downloader timed out"),
                DownloaderOutcome::Halted { reason, .. } => write!(f, "downloader halted: {}", reason),
                DownloaderOutcome::LivenessFailed { .. } => write!(f, "downloader unreachable"),
            },
            SessionOutcome::Uploader(outcome) => match outcome {
                UploaderOutcome::Paired { confirmed, .. } => {
                    write!(f, "uploader paired (confirmed: {})", confirmed)
                }
                UploaderOutcome::PeerNotFound { .. } => write!(f, "uploader peer not found"),
                UploaderOutcome::Abandoned { .. } => write!(f, "uploader abandoned pairing"),
            },
            SessionOutcome::Rejected(reason) => write!(f, "rejected: {}", reason),
        }
    }
}
