//! Bonding with the target device.

use std::sync::Arc;
use std::time::Duration;

use takeover_core::{BondState, CancellationToken, DiscoveredDevice};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::adapter::SystemAdapter;

/// Runs single bonding attempts.
#[derive(Clone)]
pub struct BondManager {
    adapter: Arc<dyn SystemAdapter>,
}

impl BondManager {
    pub fn new(adapter: Arc<dyn SystemAdapter>) -> Self {
        Self { adapter }
    }

    /// Make sure `device` is bonded.
    ///
    /// Returns true immediately for an already bonded device. Otherwise starts
    /// one bonding attempt and waits for this address's next terminal bond
    /// state. Refusal, rejection, timeout and cancellation all yield false.
    pub async fn ensure_bonded(
        &self,
        device: &DiscoveredDevice,
        bond_timeout: Duration,
        cancel: &CancellationToken,
    ) -> bool {
        if device.is_bonded() {
            debug!("{} is already bonded", device);
            return true;
        }

        // Subscribe before starting so the result cannot be missed.
        let mut events = self.adapter.bond_events();

        info!("Initiating bonding with {}", device);
        match self.adapter.create_bond(&device.address).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("Adapter refused to bond with {}", device);
                return false;
            }
            Err(e) => {
                warn!("Failed to start bonding with {}: {}", device, e);
                return false;
            }
        }

        let address = device.address;
        let wait = async {
            while let Some(event) = events.recv().await {
                if event.address != address {
                    continue;
                }
                match event.state {
                    BondState::Bonded => return true,
                    BondState::None => return false,
                    BondState::Bonding => debug!("Bonding with {} in progress", address),
                }
            }
            false
        };

        let bonded = tokio::select! {
            result = timeout(bond_timeout, wait) => match result {
                Ok(bonded) => bonded,
                Err(_) => {
                    warn!("Bonding with {} timed out after {:?}", address, bond_timeout);
                    false
                }
            },
            _ = cancel.cancelled() => {
                debug!("Bonding with {} cancelled", address);
                false
            }
        };

        if bonded {
            info!("Bonded with {}", device);
        }
        bonded
    }
}
