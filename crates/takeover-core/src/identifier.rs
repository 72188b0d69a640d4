//! Hardware addresses and user-supplied device identifiers.

use std::fmt;
use std::str::FromStr;

use crate::device::DiscoveredDevice;
use crate::error::{Error, Result};

/// Characters accepted between the hex pairs of a hardware address.
const SEPARATORS: [char; 5] = [':', '-', '.', '_', ' '];

/// Bluetooth hardware address (6 bytes, most significant first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 6]);

impl Address {
    /// Parse an address from text.
    ///
    /// Supports formats:
    /// - Colon-separated: "AA:BB:CC:DD:EE:FF"
    /// - Hyphen-separated: "aa-bb-cc-dd-ee-ff"
    /// - Bare hex: "AABBCCDDEEFF"
    ///
    /// Returns `None` unless the text is made only of hex digits and
    /// separators and holds exactly 12 hex digits.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_hexdigit() || SEPARATORS.contains(&c)) {
            return None;
        }

        let digits: Vec<u8> = s
            .chars()
            .filter_map(|c| c.to_digit(16))
            .map(|d| d as u8)
            .collect();
        if digits.len() != 12 {
            return None;
        }

        let mut bytes = [0u8; 6];
        for (i, pair) in digits.chunks(2).enumerate() {
            bytes[i] = (pair[0] << 4) | pair[1];
        }
        Some(Self(bytes))
    }

    /// Colon-separated upper-case form, e.g. "AA:BB:CC:DD:EE:FF".
    pub fn to_mac_string(&self) -> String {
        format!(
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_mac_string())
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| Error::InvalidIdentifier(s.to_string()))
    }
}

/// What the user typed to designate the target device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceIdentifier {
    /// Exact hardware address.
    HardwareAddress(Address),
    /// Case-insensitive substring of the advertised name.
    NameFragment(String),
}

impl DeviceIdentifier {
    /// Normalize a raw user string into an identifier.
    ///
    /// Anything holding exactly 12 hex digits (with or without separators)
    /// is an address; every other non-empty input is a name fragment equal
    /// to the trimmed input.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidIdentifier(raw.to_string()));
        }

        Ok(match Address::parse(trimmed) {
            Some(address) => Self::HardwareAddress(address),
            None => Self::NameFragment(trimmed.to_string()),
        })
    }

    /// The address, if this identifier is one.
    pub fn address(&self) -> Option<&Address> {
        match self {
            Self::HardwareAddress(address) => Some(address),
            Self::NameFragment(_) => None,
        }
    }

    /// Whether `device` is the one this identifier designates.
    pub fn matches(&self, device: &DiscoveredDevice) -> bool {
        match self {
            Self::HardwareAddress(address) => device.address == *address,
            Self::NameFragment(fragment) => {
                let needle = fragment.to_lowercase();
                device
                    .name
                    .as_deref()
                    .map(|name| name.to_lowercase().contains(&needle))
                    .unwrap_or(false)
            }
        }
    }
}

impl fmt::Display for DeviceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HardwareAddress(address) => write!(f, "{}", address),
            Self::NameFragment(fragment) => write!(f, "\"{}\"", fragment),
        }
    }
}
