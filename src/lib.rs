//! A host side Bluetooth Low Energy stack
//!
//! `able` talks to a Bluetooth controller over a raw HCI socket and implements the host side of
//! the GAP procedures (scanning and advertising), a GATT client on top of the Attribute Protocol,
//! and legacy "just works" pairing of the Security Manager.
//!
//! Nothing in this library blocks or owns a thread. Socket data is pushed into a
//! [`Bindings`](host::Bindings) as it arrives, packets for the controller leave through the
//! [`HciSocket`](hci_transport::HciSocket) trait, and upward notifications are queued as
//! [`HostEvent`](host::HostEvent) values for the driver to drain. The Linux socket and a tokio
//! based run loop are provided by the `able-linux` crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod att;
pub mod config;
pub mod gap;
pub mod gatt;
pub mod hci;
pub mod hci_transport;
pub mod host;
pub mod l2cap;
pub mod sm;

/// A Bluetooth device address
///
/// The bytes are kept in the order they are transferred over the HCI (least significant byte
/// first). The `Display` and `FromStr` implementations use the conventional colon separated,
/// most significant byte first, notation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct BluetoothDeviceAddress(pub [u8; 6]);

impl BluetoothDeviceAddress {
    pub const LEN: usize = 6;

    /// Create an address from the little endian bytes of an HCI parameter
    pub fn from_le_slice(raw: &[u8]) -> Option<Self> {
        let mut address = [0u8; 6];

        address.copy_from_slice(raw.get(..Self::LEN)?);

        Some(BluetoothDeviceAddress(address))
    }

    /// The identifier used for a peer within the host
    ///
    /// This is the address as lower case hex without the colon separators.
    pub fn peripheral_id(&self) -> String {
        self.0.iter().rev().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for BluetoothDeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let a = &self.0;

        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a[5], a[4], a[3], a[2], a[1], a[0]
        )
    }
}

impl fmt::Debug for BluetoothDeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Error returned when parsing a device address or UUID from a string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "cannot parse '{}'", self.0)
    }
}

impl std::error::Error for ParseError {}

impl FromStr for BluetoothDeviceAddress {
    type Err = ParseError;

    /// Parse an address with or without colon separators
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| *c != ':').collect();

        if digits.len() != 12 {
            return Err(ParseError(s.to_string()));
        }

        let mut address = [0u8; 6];

        for (i, byte) in address.iter_mut().rev().enumerate() {
            *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16).map_err(|_| ParseError(s.to_string()))?;
        }

        Ok(BluetoothDeviceAddress(address))
    }
}

/// The type of a Bluetooth LE device address
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
pub enum AddressType {
    #[default]
    Public,
    Random,
}

impl AddressType {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x01 => AddressType::Random,
            _ => AddressType::Public,
        }
    }

    pub fn val(&self) -> u8 {
        match *self {
            AddressType::Public => 0x00,
            AddressType::Random => 0x01,
        }
    }

    pub fn is_random(&self) -> bool {
        *self == AddressType::Random
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            AddressType::Public => f.write_str("public"),
            AddressType::Random => f.write_str("random"),
        }
    }
}

/// A Bluetooth UUID
///
/// Only the two forms that appear in attribute and advertising data are represented. A 16 bit
/// UUID displays as 4 lower case hex digits and a 128 bit UUID as 32 lower case hex digits, both
/// most significant digit first.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Uuid {
    Short(u16),
    Long(u128),
}

impl Uuid {
    /// Create a UUID from its little endian transfer format
    ///
    /// Only 2 and 16 byte slices are valid.
    pub fn from_le_slice(raw: &[u8]) -> Option<Self> {
        match raw.len() {
            2 => Some(Uuid::Short(u16::from_le_bytes([raw[0], raw[1]]))),
            16 => {
                let mut bytes = [0u8; 16];

                bytes.copy_from_slice(raw);

                Some(Uuid::Long(u128::from_le_bytes(bytes)))
            }
            _ => None,
        }
    }

    /// The little endian transfer format
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match *self {
            Uuid::Short(v) => v.to_le_bytes().to_vec(),
            Uuid::Long(v) => v.to_le_bytes().to_vec(),
        }
    }

    pub fn is_short(&self) -> bool {
        matches!(self, Uuid::Short(_))
    }
}

impl From<u16> for Uuid {
    fn from(v: u16) -> Self {
        Uuid::Short(v)
    }
}

impl From<u128> for Uuid {
    fn from(v: u128) -> Self {
        Uuid::Long(v)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Uuid::Short(v) => write!(f, "{:04x}", v),
            Uuid::Long(v) => write!(f, "{:032x}", v),
        }
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Uuid {
    type Err = ParseError;

    /// Parse a UUID from hex, dashes are ignored
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| *c != '-').collect();

        match digits.len() {
            4 => u16::from_str_radix(&digits, 16).map(Uuid::Short),
            32 => u128::from_str_radix(&digits, 16).map(Uuid::Long),
            _ => return Err(ParseError(s.to_string())),
        }
        .map_err(|_| ParseError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_display_is_most_significant_first() {
        let address = BluetoothDeviceAddress([0x66, 0x55, 0x44, 0x33, 0x22, 0x11]);

        assert_eq!("11:22:33:44:55:66", address.to_string());

        assert_eq!("112233445566", address.peripheral_id());

        assert_eq!(Ok(address), "11:22:33:44:55:66".parse());

        assert_eq!(Ok(address), "112233445566".parse());
    }

    #[test]
    fn bad_address_strings() {
        assert!("11:22:33:44:55".parse::<BluetoothDeviceAddress>().is_err());

        assert!("11:22:33:44:55:zz".parse::<BluetoothDeviceAddress>().is_err());
    }

    #[test]
    fn uuid_strings() {
        assert_eq!("180d", Uuid::Short(0x180d).to_string());

        assert_eq!(Ok(Uuid::Short(0x2a37)), "2A37".parse());

        let long: Uuid = "6e400001-b5a3-f393-e0a9-e50e24dcca9e".parse().unwrap();

        assert_eq!(Uuid::Long(0x6e400001b5a3f393e0a9e50e24dcca9e), long);

        assert_eq!("6e400001b5a3f393e0a9e50e24dcca9e", long.to_string());

        assert!("12345".parse::<Uuid>().is_err());
    }

    #[test]
    fn uuid_transfer_format() {
        assert_eq!(Some(Uuid::Short(0x2800)), Uuid::from_le_slice(&[0x00, 0x28]));

        let long = Uuid::Long(0x000102030405060708090a0b0c0d0e0f);

        assert_eq!(Some(long), Uuid::from_le_slice(&long.to_le_bytes()));

        assert_eq!(0x0f, long.to_le_bytes()[0]);

        assert_eq!(None, Uuid::from_le_slice(&[1, 2, 3]));
    }
}
