//! # takeover-bluetooth
//!
//! Bluetooth side of a takeover: finding the target, bonding with it and
//! forcing it onto the local adapter's audio profiles.
//!
//! ## Components
//!
//! - [`SystemAdapter`] / [`ProfileHandle`]: the seam to the platform stack
//! - [`DeviceLocator`]: direct lookup, bonded set, then live discovery
//! - [`BondManager`]: one bonding attempt bounded by a timeout
//! - [`ProfileNegotiator`]: evict incumbent devices and connect the target
//! - [`ProfileRegistry`]: cached profile handles
//! - [`PresenceWatcher`]: detached discovery that reports when the target shows up
//! - [`SimulatedAdapter`]: scripted in-process adapter for tests and demos
//!
//! With the `bluez` feature, `BluezAdapter` drives a real Linux adapter
//! through BlueZ.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use takeover_bluetooth::{BluezAdapter, DeviceLocator};
//! use takeover_core::{CancellationToken, DeviceIdentifier};
//!
//! async fn example() -> takeover_core::Result<()> {
//!     let adapter = Arc::new(BluezAdapter::new().await?);
//!     let locator = DeviceLocator::new(adapter);
//!     let id = DeviceIdentifier::parse("speaker")?;
//!     let found = locator
//!         .locate(&id, Duration::from_secs(25), &CancellationToken::new())
//!         .await?;
//!     println!("{:?}", found);
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod bonding;
pub mod listeners;
pub mod locator;
pub mod negotiator;
pub mod presence;
pub mod registry;
pub mod simulated;

#[cfg(feature = "bluez")]
pub mod bluez;

// Re-exports for convenience
pub use adapter::{BondEvent, DiscoveryEvent, ProfileHandle, SystemAdapter};
pub use bonding::BondManager;
pub use listeners::ListenerSet;
pub use locator::DeviceLocator;
pub use negotiator::{NegotiationReport, ProfileNegotiator, DEFAULT_SETTLE_DELAY};
pub use presence::{PresenceWatch, PresenceWatcher};
pub use registry::ProfileRegistry;
pub use simulated::{BondScript, ConnectBehavior, SimulatedAdapter, SimulatedProfile};

#[cfg(feature = "bluez")]
pub use bluez::BluezAdapter;
