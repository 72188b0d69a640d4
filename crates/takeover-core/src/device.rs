//! Remote device and audio profile types.

use std::fmt;

use crate::identifier::Address;

/// Bonding state of a remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BondState {
    #[default]
    None,
    Bonding,
    Bonded,
}

/// A device seen by the adapter, either remembered or found by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub address: Address,
    pub name: Option<String>,
    pub bond_state: BondState,
}

impl DiscoveredDevice {
    /// Create a device record with no bond.
    pub fn new(address: Address, name: Option<String>) -> Self {
        Self {
            address,
            name,
            bond_state: BondState::None,
        }
    }

    /// Set the bond state.
    pub fn with_bond_state(mut self, bond_state: BondState) -> Self {
        self.bond_state = bond_state;
        self
    }

    pub fn is_bonded(&self) -> bool {
        self.bond_state == BondState::Bonded
    }

    /// Name for display, falling back to the address.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.address.to_mac_string())
    }
}

impl fmt::Display for DiscoveredDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Audio profile the local adapter can hold towards a remote device.
///
/// Ordering is the negotiation priority: media before voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProfileKind {
    /// Advanced audio distribution (the target acts as audio sink).
    Media,
    /// Hands-free voice (the target acts as hands-free unit).
    Voice,
}

impl ProfileKind {
    /// All profiles, in negotiation priority order.
    pub const ALL: [ProfileKind; 2] = [ProfileKind::Media, ProfileKind::Voice];

    /// Service class UUID of the remote role.
    pub fn uuid_str(&self) -> &'static str {
        match self {
            ProfileKind::Media => "0000110b-0000-1000-8000-00805f9b34fb",
            ProfileKind::Voice => "0000111e-0000-1000-8000-00805f9b34fb",
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileKind::Media => write!(f, "media"),
            ProfileKind::Voice => write!(f, "voice"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_priority_orders_media_first() {
        assert!(ProfileKind::Media < ProfileKind::Voice);
        assert_eq!(ProfileKind::ALL, [ProfileKind::Media, ProfileKind::Voice]);
    }

    #[test]
    fn profile_uuids_are_distinct() {
        assert_ne!(ProfileKind::Media.uuid_str(), ProfileKind::Voice.uuid_str());
        assert!(ProfileKind::Media.uuid_str().starts_with("0000110b"));
    }

    #[test]
    fn display_name_falls_back_to_address() {
        let address = Address([1, 2, 3, 4, 5, 6]);
        let unnamed = DiscoveredDevice::new(address, None);
        assert_eq!(unnamed.display_name(), "01:02:03:04:05:06");

        let named = DiscoveredDevice::new(address, Some("Speaker".into()))
            .with_bond_state(BondState::Bonded);
        assert_eq!(named.display_name(), "Speaker");
        assert!(named.is_bonded());
        assert_eq!(named.to_string(), "Speaker (01:02:03:04:05:06)");
    }
}
