//! Error types for the rendezvous server
//!
//! This module defines the error taxonomy shared by the wire codec, the
//! pairing engine and the listener bootstrap.

use std::fmt;

/// Comprehensive error type for rendezvous operations
#[derive(Debug, Clone)]
pub enum RendezvousError {
    /// Wire protocol violations (bad framing, unexpected message kind)
    ProtocolError {
        message: String,
        source: Option<String>,
    },

    /// Errors tied to a specific connected peer
    PeerError {
        message: String,
        peer: Option<String>,
        source: Option<String>,
    },

    /// Identifier generation failures (random source, exhausted space)
    IdentifierError {
        message: String,
        source: Option<String>,
    },

    /// Certificate and TLS setup errors
    TlsError {
        message: String,
        path: Option<String>,
        source: Option<String>,
    },

    /// Configuration errors
    ConfigError {
        message: String,
        field: Option<String>,
    },

    /// Network errors
    NetworkError {
        message: String,
        address: Option<String>,
        source: Option<String>,
    },
}

impl RendezvousError {
    /// Create a new ProtocolError
    pub fn protocol_error(message: impl Into<String>) -> Self {
        RendezvousError::ProtocolError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new ProtocolError with source
    pub fn protocol_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        RendezvousError::ProtocolError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new PeerError with peer address
    pub fn peer_error_with_peer(message: impl Into<String>, peer: impl Into<String>) -> Self {
        RendezvousError::PeerError {
            message: message.into(),
            peer: Some(peer.into()),
            source: None,
        }
    }

    /// Create a new PeerError with peer and source
    pub fn peer_error_full(message: impl Into<String>, peer: impl Into<String>, source: impl Into<String>) -> Self {
        RendezvousError::PeerError {
            message: message.into(),
            peer: Some(peer.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new IdentifierError with source
    pub fn identifier_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        RendezvousError::IdentifierError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new TlsError
    pub fn tls_error(message: impl Into<String>) -> Self {
        RendezvousError::TlsError {
            message: message.into(),
            path: None,
            source: None,
        }
    }

    /// Create a new TlsError with source
    pub fn tls_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        RendezvousError::TlsError {
            message: message.into(),
            path: None,
            source: Some(source.into()),
        }
    }

    /// Create a new TlsError with path and source
    pub fn tls_error_full(message: impl Into<String>, path: impl Into<String>, source: impl Into<String>) -> Self {
        RendezvousError::TlsError {
            message: message.into(),
            path: Some(path.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new ConfigError with field
    pub fn config_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        RendezvousError::ConfigError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new NetworkError with address and source
    pub fn network_error_full(message: impl Into<String>, address: impl Into<String>, source: impl Into<String>) -> Self {
        RendezvousError::NetworkError {
            message: message.into(),
            address: Some(address.into()),
            source: Some(source.into()),
        }
    }

}

impl fmt::Display for RendezvousError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RendezvousError::ProtocolError { message, source } => {
                if let Some(src) = source {
                    write!(f, "Protocol error: {} (source: {})", message, src)
                } else {
                    write!(f, "Protocol error: {}", message)
                }
            }
            RendezvousError::PeerError { message, peer, source } => {
                match (peer, source) {
                    (Some(p), Some(s)) => write!(f, "Peer error: {} (peer: {}, source: {})", message, p, s),
                    (Some(p), None) => write!(f, "Peer error: {} (peer: {})", message, p),
                    (None, Some(s)) => write!(f, "Peer error: {} (source: {})", message, s),
                    (None, None) => write!(f, "Peer error: {}", message),
                }
            }
            RendezvousError::IdentifierError { message, source } => {
                if let Some(src) = source {
                    write!(f, "Identifier error: {} (source: {})", message, src)
                } else {
                    write!(f, "Identifier error: {}", message)
                }
            }
            RendezvousError::TlsError { message, path, source } => {
                match (path, source) {
                    (Some(p), Some(s)) => write!(f, "TLS error: {} (path: {}, source: {})", message, p, s),
                    (Some(p), None) => write!(f, "TLS error: {} (path: {})", message, p),
                    (None, Some(s)) => write!(f, "TLS error: {} (source: {})", message, s),
                    (None, None) => write!(f, "TLS error: {}", message),
                }
            }
            RendezvousError::ConfigError { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Config error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Config error: {}", message)
                }
            }
            RendezvousError::NetworkError { message, address, source } => {
                match (address, source) {
                    (Some(a), Some(s)) => write!(f, "Network error: {} (address: {}, source: {})", message, a, s),
                    (Some(a), None) => write!(f, "Network error: {} (address: {})", message, a),
                    (None, Some(s)) => write!(f, "Network error: {} (source: {})", message, s),
                    (None, None) => write!(f, "Network error: {}", message),
                }
            }
        }
    }
}

impl std::error::Error for RendezvousError {}
