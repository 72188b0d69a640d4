//! Takeover request and outcome.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use crate::device::ProfileKind;
use crate::identifier::DeviceIdentifier;

/// Default time allowed for locating the device.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(25);
/// Default time allowed for bonding.
pub const DEFAULT_BONDING_TIMEOUT: Duration = Duration::from_secs(20);
/// Default time allowed for each profile connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One takeover attempt, immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TakeoverRequest {
    pub identifier: DeviceIdentifier,
    pub discovery_timeout: Duration,
    pub bonding_timeout: Duration,
    pub connect_timeout: Duration,
}

impl TakeoverRequest {
    /// Request with default timeouts.
    pub fn new(identifier: DeviceIdentifier) -> Self {
        Self {
            identifier,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            bonding_timeout: DEFAULT_BONDING_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn bonding_timeout(mut self, timeout: Duration) -> Self {
        self.bonding_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Terminal result of a takeover, reported exactly once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TakeoverOutcome {
    /// At least one profile connected.
    Success(BTreeSet<ProfileKind>),
    DeviceNotFound,
    BondingFailed,
    NoProfileConnected,
    Cancelled,
    /// Adapter error or internal fault.
    Failed(String),
}

impl TakeoverOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TakeoverOutcome::Success(_))
    }
}

impl fmt::Display for TakeoverOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TakeoverOutcome::Success(profiles) => {
                let names: Vec<String> = profiles.iter().map(|p| p.to_string()).collect();
                write!(f, "Takeover succeeded ({})", names.join(", "))
            }
            TakeoverOutcome::DeviceNotFound => write!(f, "Device not found"),
            TakeoverOutcome::BondingFailed => write!(f, "Bonding failed"),
            TakeoverOutcome::NoProfileConnected => write!(f, "No audio profile connected"),
            TakeoverOutcome::Cancelled => write!(f, "Takeover cancelled"),
            TakeoverOutcome::Failed(reason) => write!(f, "Takeover failed: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_request_uses_default_timeouts() {
        let id = DeviceIdentifier::parse("speaker").unwrap();
        let request = TakeoverRequest::new(id);
        assert_eq!(request.discovery_timeout, Duration::from_secs(25));
        assert_eq!(request.bonding_timeout, Duration::from_secs(20));
        assert_eq!(request.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn builder_overrides_timeouts() {
        let id = DeviceIdentifier::parse("speaker").unwrap();
        let request = TakeoverRequest::new(id)
            .discovery_timeout(Duration::from_secs(2))
            .bonding_timeout(Duration::from_secs(3))
            .connect_timeout(Duration::from_secs(4));
        assert_eq!(request.discovery_timeout, Duration::from_secs(2));
        assert_eq!(request.bonding_timeout, Duration::from_secs(3));
        assert_eq!(request.connect_timeout, Duration::from_secs(4));
    }

    #[test]
    fn success_lists_profiles_in_priority_order() {
        let outcome = TakeoverOutcome::Success(
            [ProfileKind::Voice, ProfileKind::Media].into_iter().collect(),
        );
        assert!(outcome.is_success());
        assert_eq!(outcome.to_string(), "Takeover succeeded (media, voice)");
        assert!(!TakeoverOutcome::Cancelled.is_success());
    }
}
