//! Alternate device selection after a failed negotiation.

use async_trait::async_trait;
use takeover_core::DiscoveredDevice;

/// Offers another device to try when no profile connected to `failed`.
///
/// Typically backed by a device picker listing the bonded devices.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FallbackPicker: Send + Sync {
    /// Pick the device to retry with, or `None` to give up.
    async fn pick(&self, failed: &DiscoveredDevice) -> Option<DiscoveredDevice>;
}

/// Always offers the same device.
#[derive(Debug, Clone)]
pub struct StaticPicker {
    device: Option<DiscoveredDevice>,
}

impl StaticPicker {
    pub fn new(device: DiscoveredDevice) -> Self {
        Self {
            device: Some(device),
        }
    }

    /// A picker that always declines.
    pub fn declining() -> Self {
        Self { device: None }
    }
}

#[async_trait]
impl FallbackPicker for StaticPicker {
    async fn pick(&self, _failed: &DiscoveredDevice) -> Option<DiscoveredDevice> {
        self.device.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use takeover_core::Address;

    fn device(last: u8) -> DiscoveredDevice {
        DiscoveredDevice::new(Address([0, 0, 0, 0, 0, last]), None)
    }

    #[tokio::test]
    async fn static_picker_offers_its_device() {
        let picker = StaticPicker::new(device(2));
        assert_eq!(picker.pick(&device(1)).await, Some(device(2)));
    }

    #[tokio::test]
    async fn declining_picker_offers_nothing() {
        assert_eq!(StaticPicker::declining().pick(&device(1)).await, None);
    }

    #[tokio::test]
    async fn mock_picker_sees_failed_device() {
        let mut mock = MockFallbackPicker::new();
        mock.expect_pick()
            .withf(|failed| failed.address == Address([0, 0, 0, 0, 0, 1]))
            .times(1)
            .returning(|_| None);

        assert_eq!(mock.pick(&device(1)).await, None);
    }
}
