//! Error types for shield-core
//!
//! Centralized error handling using `thiserror` for ergonomic error definitions.

use crate::engine::EngineState;
use crate::packet::ParseError;
use std::net::SocketAddr;
use thiserror::Error;

/// Main error type for shield-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Packet parsing failed
    #[error("Packet parsing error: {message}")]
    PacketParse {
        /// Detailed error message
        message: String,
        /// Offset in packet where error occurred
        offset: Option<usize>,
    },

    /// Packet is too small to process
    #[error("Packet too small: expected at least {expected} bytes, got {actual}")]
    PacketTooSmall {
        /// Minimum expected size
        expected: usize,
        /// Actual packet size
        actual: usize,
    },

    /// Packet would exceed the IPv4 maximum datagram size
    #[error("Packet too large: {size} bytes exceeds maximum of {max}")]
    PacketTooLarge {
        /// Requested size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        /// Path to the missing config file
        path: String,
    },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    ConfigValue {
        /// Configuration key
        key: String,
        /// Error message
        message: String,
    },

    /// A block/allow list pattern was rejected
    #[error("Invalid domain pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The rejected pattern
        pattern: String,
        /// Why it was rejected
        reason: String,
    },

    /// Schedule bounds outside of minutes-of-day
    #[error("Invalid schedule window {start}-{end}: bounds must be within 0..=1439")]
    InvalidSchedule {
        /// Window start in minutes
        start: u16,
        /// Window end in minutes
        end: u16,
    },

    /// Profile lookup failed
    #[error("Profile {id} not found")]
    ProfileNotFound {
        /// Profile id
        id: u32,
    },

    /// Attempted to remove the active profile
    #[error("Profile {id} is active and must be deactivated first")]
    ProfileActive {
        /// Profile id
        id: u32,
    },

    /// Engine lifecycle transition refused
    #[error("Invalid engine state transition: {from} -> {to}")]
    InvalidState {
        /// Current state
        from: EngineState,
        /// Requested state
        to: EngineState,
    },

    /// Virtual interface failure (establishment, read, revoke)
    #[error("Virtual interface error: {0}")]
    Interface(String),

    /// Too many consecutive writes to the interface failed
    #[error("Interface write failed {count} times in a row")]
    WriteFailures {
        /// Consecutive failures observed
        count: u32,
    },

    /// Upstream resolver did not answer in time
    #[error("Upstream resolver {server} timed out")]
    UpstreamTimeout {
        /// Resolver address
        server: SocketAddr,
    },

    /// Upstream resolver failure
    #[error("Upstream resolver {server} failed: {reason}")]
    Upstream {
        /// Resolver address
        server: SocketAddr,
        /// Failure reason
        reason: String,
    },

    /// No async runtime available for forwarding tasks
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Policy list or store file error
    #[error("Policy file error for '{path}': {message}")]
    PolicyFile {
        /// Path to the file
        path: String,
        /// Error message
        message: String,
    },

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a packet parse error
    pub fn packet_parse(message: impl Into<String>) -> Self {
        Self::PacketParse {
            message: message.into(),
            offset: None,
        }
    }

    /// Create a packet parse error with offset
    pub fn packet_parse_at(message: impl Into<String>, offset: usize) -> Self {
        Self::PacketParse {
            message: message.into(),
            offset: Some(offset),
        }
    }

    /// Create a config value error
    pub fn config_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValue {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create an invalid pattern error
    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    /// Create a policy file error
    pub fn policy_file(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PolicyFile {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether this error ends a filtering session
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::Interface(_) | Self::WriteFailures { .. } | Self::Runtime(_)
        )
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Truncated { needed, actual } => Self::PacketTooSmall {
                expected: needed,
                actual,
            },
            other => Self::packet_parse(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::packet_parse("Invalid header");
        assert!(err.to_string().contains("Invalid header"));

        let err = Error::invalid_pattern("*.", "empty suffix");
        assert!(err.to_string().contains("*."));
        assert!(err.to_string().contains("empty suffix"));
    }

    #[test]
    fn test_error_with_offset() {
        let err = Error::packet_parse_at("Invalid byte", 42);
        match err {
            Error::PacketParse { offset, .. } => assert_eq!(offset, Some(42)),
            _ => panic!("Wrong error type"),
        }
    }

    #[test]
    fn test_parse_error_conversion() {
        let err: Error = ParseError::Truncated { needed: 20, actual: 1 }.into();
        assert!(matches!(
            err,
            Error::PacketTooSmall {
                expected: 20,
                actual: 1
            }
        ));

        let err: Error = ParseError::UnknownVersion(9).into();
        assert!(err.to_string().contains('9'));
    }

    #[test]
    fn test_parser_failures_are_per_packet() {
        let err = crate::packet::parse(&[0x45]).map_err(Error::from).unwrap_err();
        assert!(matches!(err, Error::PacketTooSmall { expected: 20, actual: 1 }));
        assert!(!err.is_session_fatal());

        let err = crate::packet::parse(&[0x90, 0, 0, 0]).map_err(Error::from).unwrap_err();
        assert!(matches!(err, Error::PacketParse { .. }));
        assert!(!err.is_session_fatal());
    }

    #[test]
    fn test_session_fatal() {
        assert!(Error::Interface("revoked".into()).is_session_fatal());
        assert!(Error::WriteFailures { count: 16 }.is_session_fatal());
        assert!(!Error::packet_parse("bad").is_session_fatal());
        assert!(!Error::ProfileActive { id: 1 }.is_session_fatal());
    }
}
