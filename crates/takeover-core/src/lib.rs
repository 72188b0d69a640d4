//! # takeover-core
//!
//! Core types, traits, and error definitions shared across all takeover crates.
//!
//! This crate provides:
//! - Hardware address and device identifier parsing
//! - Discovered device and audio profile representation
//! - Takeover request/outcome and audio job types
//! - The cancellation token shared between owners and workers (re-exported
//!   from tokio-util)
//! - Preference types supplied by the persistence collaborator
//! - Common error types

pub mod device;
pub mod error;
pub mod identifier;
pub mod job;
pub mod preferences;
pub mod request;

pub use tokio_util::sync::CancellationToken;
pub use device::{BondState, DiscoveredDevice, ProfileKind};
pub use error::{Error, Result};
pub use identifier::{Address, DeviceIdentifier};
pub use job::{AudioJob, AudioJobSpec, AudioSourceKind};
pub use preferences::{AudioMode, Preferences};
pub use request::{TakeoverOutcome, TakeoverRequest};
