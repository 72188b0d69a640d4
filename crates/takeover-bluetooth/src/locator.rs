//! Device lookup.
//!
//! Finds the target by direct address lookup, then in the bonded set, then
//! through live discovery.

use std::sync::Arc;
use std::time::Duration;

use takeover_core::{CancellationToken, DeviceIdentifier, DiscoveredDevice, Result};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::adapter::{DiscoveryEvent, SystemAdapter};

/// Locates a device matching an identifier.
#[derive(Clone)]
pub struct DeviceLocator {
    adapter: Arc<dyn SystemAdapter>,
}

impl DeviceLocator {
    /// Create a locator over the given adapter.
    pub fn new(adapter: Arc<dyn SystemAdapter>) -> Self {
        Self { adapter }
    }

    /// Find the device designated by `identifier`; first match wins.
    ///
    /// Returns `Ok(None)` when nothing matched before `timeout` or when
    /// `cancel` fired. Errors are reserved for adapter failures.
    pub async fn locate(
        &self,
        identifier: &DeviceIdentifier,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<DiscoveredDevice>> {
        if let Some(address) = identifier.address() {
            match self.adapter.remote_device(address).await {
                Ok(Some(device)) => {
                    debug!("Constructed device {} directly", address);
                    return Ok(Some(device));
                }
                Ok(None) => debug!("Direct lookup unavailable for {}", address),
                Err(e) => warn!("Direct lookup of {} failed: {}", address, e),
            }
        }

        if let Some(device) = self.find_bonded(identifier).await? {
            info!("Found {} among bonded devices", device);
            return Ok(Some(device));
        }

        self.scan_live(identifier, Some(timeout), cancel).await
    }

    /// Devices the adapter remembers as bonded.
    pub async fn bonded_devices(&self) -> Result<Vec<DiscoveredDevice>> {
        self.adapter.bonded_devices().await
    }

    async fn find_bonded(&self, identifier: &DeviceIdentifier) -> Result<Option<DiscoveredDevice>> {
        let bonded = self.adapter.bonded_devices().await?;
        Ok(bonded.into_iter().find(|device| identifier.matches(device)))
    }

    /// Run a live discovery session until a match, the timeout, or cancellation.
    ///
    /// Sessions that the adapter ends on its own are restarted. `None` as the
    /// timeout scans until matched or cancelled. The session is torn down
    /// before this returns.
    pub async fn scan_live(
        &self,
        identifier: &DeviceIdentifier,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Option<DiscoveredDevice>> {
        let mut events = self.adapter.discovery_events();
        let (found_tx, found_rx) = oneshot::channel();

        let adapter = Arc::clone(&self.adapter);
        let target = identifier.clone();
        let session = tokio::spawn(async move {
            let mut restart_pending = false;
            loop {
                let event = if restart_pending {
                    tokio::select! {
                        event = events.recv() => event,
                        _ = tokio::time::sleep(RESTART_RETRY) => {
                            restart_pending = !restart(adapter.as_ref()).await;
                            continue;
                        }
                    }
                } else {
                    events.recv().await
                };

                match event {
                    Some(DiscoveryEvent::Found(device)) if target.matches(&device) => {
                        let _ = found_tx.send(device);
                        return;
                    }
                    Some(DiscoveryEvent::Found(device)) => {
                        debug!("Ignoring {}", device);
                    }
                    Some(DiscoveryEvent::Finished) => {
                        debug!("Discovery finished without a match, restarting");
                        restart_pending = !restart(adapter.as_ref()).await;
                    }
                    None => return,
                }
            }
        });

        info!("Starting discovery for {}", identifier);
        if let Err(e) = self.adapter.start_discovery().await {
            session.abort();
            let _ = session.await;
            return Err(e);
        }

        // A session task that gives up leaves the wait to the timeout or cancel.
        let found = tokio::select! {
            Ok(device) = found_rx => Some(device),
            _ = cancel.cancelled() => {
                debug!("Discovery cancelled");
                None
            }
            _ = sleep_for(timeout) => {
                debug!("Discovery timed out after {:?}", timeout);
                None
            }
        };

        // Drop the listener before stopping the session.
        session.abort();
        let _ = session.await;
        if let Err(e) = self.adapter.cancel_discovery().await {
            warn!("Failed to cancel discovery: {}", e);
        }

        match &found {
            Some(device) => info!("Discovered {}", device),
            None => info!("No device matching {}", identifier),
        }
        Ok(found)
    }
}

/// Delay before retrying a discovery restart the adapter refused.
const RESTART_RETRY: Duration = Duration::from_secs(1);

/// Restart a finished session. False when the adapter refused.
async fn restart(adapter: &dyn SystemAdapter) -> bool {
    match adapter.start_discovery().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to restart discovery, retrying in {:?}: {}", RESTART_RETRY, e);
            false
        }
    }
}

async fn sleep_for(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MockSystemAdapter;
    use crate::simulated::SimulatedAdapter;
    use takeover_core::{Address, BondState};

    const TARGET: Address = Address([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    const OTHER: Address = Address([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);

    fn speaker() -> DiscoveredDevice {
        DiscoveredDevice::new(TARGET, Some("MySpeaker".into()))
    }

    fn setup() -> (Arc<SimulatedAdapter>, DeviceLocator) {
        let adapter = Arc::new(SimulatedAdapter::new());
        let locator = DeviceLocator::new(adapter.clone());
        (adapter, locator)
    }

    mod direct {
        use super::*;

        #[tokio::test]
        async fn address_is_constructed_without_scanning() {
            let (adapter, locator) = setup();
            let id = DeviceIdentifier::HardwareAddress(TARGET);

            let device = locator
                .locate(&id, Duration::from_secs(1), &CancellationToken::new())
                .await
                .unwrap()
                .unwrap();

            assert_eq!(device.address, TARGET);
            assert_eq!(adapter.discovery_starts(), 0);
        }

        #[tokio::test]
        async fn lookup_error_falls_through_to_bonded_set() {
            let mut mock = MockSystemAdapter::new();
            mock.expect_remote_device()
                .returning(|_| Err(takeover_core::Error::Adapter("gone".into())));
            mock.expect_bonded_devices().returning(|| {
                Ok(vec![DiscoveredDevice::new(TARGET, None).with_bond_state(BondState::Bonded)])
            });
            mock.expect_start_discovery().never();

            let locator = DeviceLocator::new(Arc::new(mock));
            let id = DeviceIdentifier::HardwareAddress(TARGET);
            let device = locator
                .locate(&id, Duration::from_secs(1), &CancellationToken::new())
                .await
                .unwrap()
                .unwrap();
            assert!(device.is_bonded());
        }
    }

    mod bonded {
        use super::*;

        #[tokio::test]
        async fn bonded_match_skips_discovery() {
            let (adapter, locator) = setup();
            adapter.add_bonded(speaker());
            let id = DeviceIdentifier::parse("myspeaker").unwrap();

            let device = locator
                .locate(&id, Duration::from_secs(1), &CancellationToken::new())
                .await
                .unwrap()
                .unwrap();

            assert_eq!(device.address, TARGET);
            assert_eq!(device.bond_state, BondState::Bonded);
            assert_eq!(adapter.discovery_starts(), 0);
        }

        #[tokio::test]
        async fn bonded_devices_lists_remembered_set() {
            let (adapter, locator) = setup();
            adapter.add_bonded(speaker());
            adapter.add_bonded(DiscoveredDevice::new(OTHER, None));

            assert_eq!(locator.bonded_devices().await.unwrap().len(), 2);
        }
    }

    mod live {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn discovered_match_is_returned() {
            let (adapter, locator) = setup();
            adapter.add_sighting(
                Duration::from_millis(200),
                DiscoveredDevice::new(OTHER, Some("Headphones".into())),
            );
            adapter.add_sighting(Duration::from_millis(800), speaker());
            let id = DeviceIdentifier::parse("Speaker").unwrap();

            let device = locator
                .locate(&id, Duration::from_secs(5), &CancellationToken::new())
                .await
                .unwrap();

            assert_eq!(device, Some(speaker()));
            assert_eq!(adapter.discovery_cancels(), 1);
            assert_eq!(adapter.listener_count(), 0);
        }

        #[tokio::test(start_paused = true)]
        async fn unmatched_search_times_out_with_session_torn_down() {
            let (adapter, locator) = setup();
            adapter.add_sighting(
                Duration::from_millis(200),
                DiscoveredDevice::new(OTHER, Some("Headphones".into())),
            );
            let id = DeviceIdentifier::parse("MySpeaker").unwrap();

            let start = tokio::time::Instant::now();
            let device = locator
                .locate(&id, Duration::from_secs(2), &CancellationToken::new())
                .await
                .unwrap();

            assert!(device.is_none());
            assert!(start.elapsed() >= Duration::from_secs(2));
            assert!(!adapter.is_discovering());
            assert_eq!(adapter.discovery_cancels(), 1);
            assert_eq!(adapter.listener_count(), 0);
        }

        #[tokio::test(start_paused = true)]
        async fn finished_session_is_restarted() {
            let (adapter, locator) = setup();
            adapter.set_session_length(Some(Duration::from_secs(1)));
            let id = DeviceIdentifier::parse("MySpeaker").unwrap();

            let device = locator
                .locate(&id, Duration::from_millis(3500), &CancellationToken::new())
                .await
                .unwrap();

            assert!(device.is_none());
            assert_eq!(adapter.discovery_starts(), 4);
        }

        #[tokio::test(start_paused = true)]
        async fn refused_restart_is_retried_until_match() {
            let (adapter, locator) = setup();
            adapter.set_session_length(Some(Duration::from_secs(1)));
            let id = DeviceIdentifier::parse("MySpeaker").unwrap();

            let start = tokio::time::Instant::now();
            let search = {
                let locator = locator.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    locator
                        .scan_live(&id, Some(Duration::from_secs(10)), &CancellationToken::new())
                        .await
                })
            };

            // The first session ends while the radio is off.
            tokio::time::sleep(Duration::from_millis(900)).await;
            adapter.set_powered(false);
            tokio::time::sleep(Duration::from_millis(300)).await;
            adapter.set_powered(true);
            adapter.add_sighting(Duration::from_millis(500), speaker());

            let device = search.await.unwrap().unwrap();
            let elapsed = start.elapsed();

            assert_eq!(device, Some(speaker()));
            assert!(elapsed >= Duration::from_secs(2), "found after {:?}", elapsed);
            assert!(elapsed < Duration::from_secs(10), "found after {:?}", elapsed);
            assert_eq!(adapter.discovery_starts(), 2);
            assert_eq!(adapter.listener_count(), 0);
        }

        #[tokio::test(start_paused = true)]
        async fn cancellation_ends_search() {
            let (adapter, locator) = setup();
            let id = DeviceIdentifier::parse("MySpeaker").unwrap();
            let cancel = CancellationToken::new();

            let canceller = {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    cancel.cancel();
                })
            };

            let start = tokio::time::Instant::now();
            let device = locator
                .scan_live(&id, None, &cancel)
                .await
                .unwrap();
            canceller.await.unwrap();

            assert!(device.is_none());
            assert!(start.elapsed() < Duration::from_secs(1));
            assert_eq!(adapter.listener_count(), 0);
        }

        #[tokio::test]
        async fn start_failure_is_reported() {
            let (adapter, locator) = setup();
            adapter.set_powered(false);
            let id = DeviceIdentifier::parse("MySpeaker").unwrap();

            let result = locator
                .scan_live(&id, Some(Duration::from_secs(1)), &CancellationToken::new())
                .await;

            assert!(result.is_err());
            assert_eq!(adapter.listener_count(), 0);
        }
    }
}
