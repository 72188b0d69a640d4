//! Error types for takeover operations.

use thiserror::Error;

/// Primary error type for all takeover operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The identifier string was empty or whitespace.
    #[error("Invalid device identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Device not found")]
    DeviceNotFound,

    #[error("Bonding failed")]
    BondingFailed,

    #[error("No audio profile connected")]
    NoProfileConnected,

    /// Output sink or decoder could not be acquired.
    #[error("Audio resource unavailable: {0}")]
    AudioResourceUnavailable(String),

    #[error("Operation cancelled")]
    Cancelled,

    /// A takeover is already in flight.
    #[error("Another takeover is already in progress")]
    Busy,

    #[error("Bluetooth adapter is powered off")]
    AdapterPoweredOff,

    /// Error reported by the system adapter binding.
    #[error("Adapter error: {0}")]
    Adapter(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid audio job: {0}")]
    InvalidJob(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;
