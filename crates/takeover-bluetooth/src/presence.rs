//! Background presence watcher.
//!
//! Scans until the target shows up and reports it once.

use std::sync::Arc;

use takeover_core::{CancellationToken, DeviceIdentifier, DiscoveredDevice};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::adapter::SystemAdapter;
use crate::locator::DeviceLocator;

/// Spawns detached presence scans.
pub struct PresenceWatcher;

impl PresenceWatcher {
    /// Start scanning for `identifier` with no time limit.
    pub fn spawn(adapter: Arc<dyn SystemAdapter>, identifier: DeviceIdentifier) -> PresenceWatch {
        let cancel = CancellationToken::new();
        let (found_tx, found_rx) = oneshot::channel();
        let locator = DeviceLocator::new(adapter);

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                info!("Watching for {}", identifier);
                match locator.scan_live(&identifier, None, &cancel).await {
                    Ok(Some(device)) => {
                        info!("{} is in range", device);
                        let _ = found_tx.send(device);
                    }
                    Ok(None) => info!("Stopped watching for {}", identifier),
                    Err(e) => warn!("Presence scan for {} failed: {}", identifier, e),
                }
            })
        };

        PresenceWatch {
            found: Some(found_rx),
            cancel,
            task,
        }
    }
}

/// Handle to a running presence scan. Dropping it stops the scan.
pub struct PresenceWatch {
    found: Option<oneshot::Receiver<DiscoveredDevice>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PresenceWatch {
    /// Wait for the target. Yields the device at most once; later calls and
    /// stopped or failed scans return `None`.
    pub async fn found(&mut self) -> Option<DiscoveredDevice> {
        let rx = self.found.take()?;
        rx.await.ok()
    }

    /// Stop scanning. The discovery session is torn down by the scan task.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the scan task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PresenceWatch {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
