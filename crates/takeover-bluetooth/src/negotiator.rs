//! Exclusive profile negotiation.
//!
//! For each profile: disconnect every other device, then connect the target.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use takeover_core::request::DEFAULT_CONNECT_TIMEOUT;
use takeover_core::{Address, ProfileKind};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::adapter::ProfileHandle;

/// Default pause between consecutive profile attempts.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// What a negotiation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NegotiationReport {
    /// Profiles whose connect request was accepted.
    pub connected: BTreeSet<ProfileKind>,
    /// Incumbent devices disconnected, per profile.
    pub evicted: Vec<(ProfileKind, Address)>,
    /// Failed enumerations and disconnects.
    pub disconnect_failures: usize,
    /// Rejected, failed or timed out connects.
    pub connect_failures: usize,
}

impl NegotiationReport {
    pub fn any_connected(&self) -> bool {
        !self.connected.is_empty()
    }
}

/// Drives the disconnect-others / connect-target sequence.
#[derive(Debug, Clone)]
pub struct ProfileNegotiator {
    settle_delay: Duration,
    connect_timeout: Duration,
}

impl Default for ProfileNegotiator {
    fn default() -> Self {
        Self::new(DEFAULT_SETTLE_DELAY, DEFAULT_CONNECT_TIMEOUT)
    }
}

impl ProfileNegotiator {
    pub fn new(settle_delay: Duration, connect_timeout: Duration) -> Self {
        Self {
            settle_delay,
            connect_timeout,
        }
    }

    /// Take every profile in `profiles` for `target`, in the given order.
    ///
    /// `progress` is called with each profile before it is worked on.
    /// Individual failures never abort the sequence; they are counted in
    /// the report. A report with no connected profile is a normal result.
    pub async fn take_exclusive<F>(
        &self,
        profiles: &[Arc<dyn ProfileHandle>],
        target: &Address,
        progress: F,
    ) -> NegotiationReport
    where
        F: Fn(ProfileKind),
    {
        let mut report = NegotiationReport::default();

        for (i, profile) in profiles.iter().enumerate() {
            if i > 0 && !self.settle_delay.is_zero() {
                tokio::time::sleep(self.settle_delay).await;
            }

            let kind = profile.kind();
            progress(kind);
            self.evict_others(profile.as_ref(), target, &mut report).await;

            debug!("Connecting {} on {} profile", target, kind);
            match timeout(self.connect_timeout, profile.connect(target)).await {
                Ok(Ok(true)) => {
                    info!("Connected {} on {} profile", target, kind);
                    report.connected.insert(kind);
                }
                Ok(Ok(false)) => {
                    warn!("{} profile rejected {}", kind, target);
                    report.connect_failures += 1;
                }
                Ok(Err(e)) => {
                    warn!("{} profile connect failed: {}", kind, e);
                    report.connect_failures += 1;
                }
                Err(_) => {
                    warn!(
                        "{} profile connect timed out after {:?}",
                        kind, self.connect_timeout
                    );
                    report.connect_failures += 1;
                }
            }
        }

        info!(
            "Negotiation finished: {} connected, {} evicted, {} disconnect failures, {} connect failures",
            report.connected.len(),
            report.evicted.len(),
            report.disconnect_failures,
            report.connect_failures
        );
        report
    }

    async fn evict_others(
        &self,
        profile: &dyn ProfileHandle,
        target: &Address,
        report: &mut NegotiationReport,
    ) {
        let kind = profile.kind();
        let connected = match profile.connected_devices().await {
            Ok(connected) => connected,
            Err(e) => {
                warn!("Failed to list {} connections: {}", kind, e);
                report.disconnect_failures += 1;
                return;
            }
        };

        for address in connected.iter().filter(|a| *a != target) {
            match profile.disconnect(address).await {
                Ok(true) => {
                    info!("Evicted {} from {} profile", address, kind);
                    report.evicted.push((kind, *address));
                }
                Ok(false) => {
                    debug!("{} profile did not disconnect {}", kind, address);
                    report.disconnect_failures += 1;
                }
                Err(e) => {
                    debug!("Disconnecting {} from {} failed: {}", address, kind, e);
                    report.disconnect_failures += 1;
                }
            }
        }
    }

    /// Whether `target` is currently in the profile's connected list.
    pub async fn verify_connected(&self, profile: &dyn ProfileHandle, target: &Address) -> bool {
        match profile.connected_devices().await {
            Ok(connected) => connected.contains(target),
            Err(e) => {
                warn!("Failed to verify {} connection: {}", profile.kind(), e);
                false
            }
        }
    }
}
