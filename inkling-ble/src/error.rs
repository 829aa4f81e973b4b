//! Error types for BLE display operations.

use std::time::Duration;

use crate::address::Address;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Device never showed up in a discovery scan.
    #[error("device {address} not found during discovery")]
    NotFound { address: Address },

    /// All connection attempts were exhausted.
    #[error("failed to connect to {address} after {attempts} attempt(s): {reason}")]
    ConnectionFailed {
        address: Address,
        attempts: u32,
        reason: String,
    },

    /// No notification arrived for an outstanding command within the deadline.
    /// The connection itself is still usable afterwards.
    #[error("no response from {address} within {timeout:?}")]
    Timeout { address: Address, timeout: Duration },

    /// Handshake framing violation or a command issued with no live link.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Unknown protocol identifier. A configuration mistake, never retried.
    #[error("unsupported protocol '{0}', expected 'atc' or 'oepl'")]
    UnsupportedProtocol(String),

    /// The scan itself could not run (e.g. no Bluetooth adapter), as
    /// opposed to scanning successfully and finding nothing.
    #[error("discovery failed: {0}")]
    Discovery(String),

    /// Underlying transport failure (write, subscribe, disconnect).
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid device address '{0}'")]
    InvalidAddress(String),
}
