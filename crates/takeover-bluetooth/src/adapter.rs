//! Trait definitions for the platform Bluetooth stack (enables mocking in tests).

use std::sync::Arc;

use async_trait::async_trait;
use takeover_core::{Address, BondState, DiscoveredDevice, ProfileKind, Result};
use tokio::sync::mpsc;

/// Event delivered to discovery listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A device was seen during discovery.
    Found(DiscoveredDevice),
    /// The adapter ended the discovery session on its own.
    Finished,
}

impl DiscoveryEvent {
    /// Get the device from a Found event.
    pub fn device(&self) -> Option<&DiscoveredDevice> {
        match self {
            DiscoveryEvent::Found(d) => Some(d),
            DiscoveryEvent::Finished => None,
        }
    }
}

/// Bond state change for one remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BondEvent {
    pub address: Address,
    pub state: BondState,
}

/// One audio profile on the local adapter.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileHandle: Send + Sync {
    /// Which profile this handle controls.
    fn kind(&self) -> ProfileKind;

    /// False once the underlying profile service went away; the handle must
    /// then be reacquired.
    async fn is_available(&self) -> bool;

    /// Addresses currently connected on this profile.
    async fn connected_devices(&self) -> Result<Vec<Address>>;

    /// Ask the stack to connect `address`. `Ok(true)` means the request was
    /// accepted, not that the link is up.
    async fn connect(&self, address: &Address) -> Result<bool>;

    /// Ask the stack to disconnect `address`.
    async fn disconnect(&self, address: &Address) -> Result<bool>;
}

/// The local Bluetooth adapter.
///
/// Listener methods register a fresh subscriber; dropping the receiver
/// unregisters it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SystemAdapter: Send + Sync {
    /// Whether the radio is on.
    async fn is_powered(&self) -> Result<bool>;

    /// Construct a device record for a known address without scanning.
    ///
    /// Returns `None` when the stack cannot build one directly.
    async fn remote_device(&self, address: &Address) -> Result<Option<DiscoveredDevice>>;

    /// Devices the adapter remembers as bonded.
    async fn bonded_devices(&self) -> Result<Vec<DiscoveredDevice>>;

    /// Subscribe to discovery events.
    fn discovery_events(&self) -> mpsc::UnboundedReceiver<DiscoveryEvent>;

    /// Start (or restart) a discovery session.
    async fn start_discovery(&self) -> Result<()>;

    /// Stop the current discovery session, if any.
    async fn cancel_discovery(&self) -> Result<()>;

    /// Subscribe to bond state changes.
    fn bond_events(&self) -> mpsc::UnboundedReceiver<BondEvent>;

    /// Start bonding. `Ok(false)` means the stack refused to start.
    async fn create_bond(&self, address: &Address) -> Result<bool>;

    /// Get a handle to one of the adapter's audio profiles.
    async fn acquire_profile(&self, kind: ProfileKind) -> Result<Arc<dyn ProfileHandle>>;
}
