//! Error types for the DHCPv6 client.

use std::io;

use thiserror::Error;

/// Main error type for client operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Network-related errors.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Interface does not exist or has no usable hardware address.
    #[error("network interface {0} not found")]
    NoInterface(String),

    /// Interface has no link-local IPv6 address to send raw frames from.
    #[error("no link-local address on {0}")]
    NoLinkLocal(String),

    /// Hardware address in sysfs could not be parsed.
    #[error("invalid MAC address '{0}'")]
    BadMacAddress(String),

    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    #[error("socket error: {0}")]
    SocketError(#[from] io::Error),
}

/// Errors in operator-supplied settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown option '{0}'")]
    UnknownOption(String),

    #[error("bad option value '{value}': {reason}")]
    BadOptionValue { value: String, reason: String },

    #[error("bad IPv6 address '{0}'")]
    BadAddress(String),

    #[error("client port {0} leaves no room for the server port")]
    BadPort(u16),
}

impl From<nix::errno::Errno> for NetworkError {
    fn from(e: nix::errno::Errno) -> Self {
        NetworkError::SocketError(io::Error::from(e))
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
