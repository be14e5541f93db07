//! The HCI commands used by the host
//!
//! Each command is a structure of its parameters implementing
//! [`CommandParameter`](super::CommandParameter).

use super::{opcodes, CommandParameter, Opcode};
use crate::{AddressType, BluetoothDeviceAddress};

/// The maximum length of advertising data or scan response data
pub const MAX_ADVERTISING_DATA_LEN: usize = 31;

pub struct SetEventMask(pub [u8; 8]);

impl SetEventMask {
    /// Disconnection complete, encryption change, command complete/status, hardware error, LE meta
    /// and the other events the host listens for.
    pub const HOST_DEFAULT: SetEventMask = SetEventMask([0xff, 0xff, 0xfb, 0xff, 0x07, 0xf8, 0xbf, 0x3d]);
}

impl CommandParameter for SetEventMask {
    const COMMAND: Opcode = opcodes::SET_EVENT_MASK;

    fn parameter(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

pub struct LeSetEventMask(pub [u8; 8]);

impl LeSetEventMask {
    /// Connection complete, advertising report, connection update complete, read remote
    /// features complete, and long term key request.
    pub const HOST_DEFAULT: LeSetEventMask = LeSetEventMask([0x1f, 0, 0, 0, 0, 0, 0, 0]);
}

impl CommandParameter for LeSetEventMask {
    const COMMAND: Opcode = opcodes::LE_SET_EVENT_MASK;

    fn parameter(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

pub struct ReadLocalVersionInformation;

impl CommandParameter for ReadLocalVersionInformation {
    const COMMAND: Opcode = opcodes::READ_LOCAL_VERSION_INFORMATION;

    fn parameter(&self) -> Vec<u8> {
        Vec::new()
    }
}

pub struct ReadBdAddr;

impl CommandParameter for ReadBdAddr {
    const COMMAND: Opcode = opcodes::READ_BD_ADDR;

    fn parameter(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// LE Set Advertising Parameters
///
/// Connectable undirected advertising on all three advertising channels from the public address.
pub struct LeSetAdvertisingParameters {
    pub interval_ms: u16,
}

impl LeSetAdvertisingParameters {
    /// The interval in controller units of 0.625 ms
    pub fn interval(&self) -> u16 {
        (u32::from(self.interval_ms) * 8 / 5) as u16
    }
}

impl CommandParameter for LeSetAdvertisingParameters {
    const COMMAND: Opcode = opcodes::LE_SET_ADVERTISING_PARAMETERS;

    fn parameter(&self) -> Vec<u8> {
        let interval = self.interval().to_le_bytes();

        let mut parameter = Vec::with_capacity(15);

        parameter.extend_from_slice(&interval); // min interval
        parameter.extend_from_slice(&interval); // max interval
        parameter.push(0x00); // ADV_IND
        parameter.push(0x00); // own address type
        parameter.push(0x00); // direct address type
        parameter.extend_from_slice(&[0u8; 6]); // direct address
        parameter.push(0x07); // channel map
        parameter.push(0x00); // filter policy

        parameter
    }
}

/// Advertising or scan response payload, zero padded to the fixed parameter length
fn padded_data(data: &[u8]) -> Vec<u8> {
    let len = data.len().min(MAX_ADVERTISING_DATA_LEN);

    let mut parameter = vec![0u8; MAX_ADVERTISING_DATA_LEN + 1];

    parameter[0] = len as u8;

    parameter[1..=len].copy_from_slice(&data[..len]);

    parameter
}

pub struct LeSetAdvertisingData<'a>(pub &'a [u8]);

impl CommandParameter for LeSetAdvertisingData<'_> {
    const COMMAND: Opcode = opcodes::LE_SET_ADVERTISING_DATA;

    fn parameter(&self) -> Vec<u8> {
        padded_data(self.0)
    }
}

pub struct LeSetScanResponseData<'a>(pub &'a [u8]);

impl CommandParameter for LeSetScanResponseData<'_> {
    const COMMAND: Opcode = opcodes::LE_SET_SCAN_RESPONSE_DATA;

    fn parameter(&self) -> Vec<u8> {
        padded_data(self.0)
    }
}

pub struct LeSetAdvertiseEnable(pub bool);

impl CommandParameter for LeSetAdvertiseEnable {
    const COMMAND: Opcode = opcodes::LE_SET_ADVERTISE_ENABLE;

    fn parameter(&self) -> Vec<u8> {
        vec![self.0 as u8]
    }
}

/// LE Set Scan Parameters
pub struct LeSetScanParameters {
    pub active: bool,
    pub interval: u16,
    pub window: u16,
}

impl Default for LeSetScanParameters {
    fn default() -> Self {
        LeSetScanParameters {
            active: true,
            interval: 0x0010,
            window: 0x0010,
        }
    }
}

impl CommandParameter for LeSetScanParameters {
    const COMMAND: Opcode = opcodes::LE_SET_SCAN_PARAMETERS;

    fn parameter(&self) -> Vec<u8> {
        let mut parameter = Vec::with_capacity(7);

        parameter.push(self.active as u8);
        parameter.extend_from_slice(&self.interval.to_le_bytes());
        parameter.extend_from_slice(&self.window.to_le_bytes());
        parameter.push(0x00); // own address type
        parameter.push(0x00); // accept all advertisements

        parameter
    }
}

pub struct LeSetScanEnable {
    pub enable: bool,
    pub filter_duplicates: bool,
}

impl CommandParameter for LeSetScanEnable {
    const COMMAND: Opcode = opcodes::LE_SET_SCAN_ENABLE;

    fn parameter(&self) -> Vec<u8> {
        vec![self.enable as u8, self.filter_duplicates as u8]
    }
}

/// LE Create Connection
pub struct LeCreateConnection {
    pub peer_address: BluetoothDeviceAddress,
    pub peer_address_type: AddressType,
}

impl CommandParameter for LeCreateConnection {
    const COMMAND: Opcode = opcodes::LE_CREATE_CONNECTION;

    fn parameter(&self) -> Vec<u8> {
        let mut parameter = Vec::with_capacity(25);

        parameter.extend_from_slice(&0x0060u16.to_le_bytes()); // scan interval
        parameter.extend_from_slice(&0x0030u16.to_le_bytes()); // scan window
        parameter.push(0x00); // no white list
        parameter.push(self.peer_address_type.val());
        parameter.extend_from_slice(&self.peer_address.0);
        parameter.push(0x00); // own address type
        parameter.extend_from_slice(&0x0006u16.to_le_bytes()); // min interval
        parameter.extend_from_slice(&0x000cu16.to_le_bytes()); // max interval
        parameter.extend_from_slice(&0x0000u16.to_le_bytes()); // latency
        parameter.extend_from_slice(&0x00c8u16.to_le_bytes()); // supervision timeout
        parameter.extend_from_slice(&0x0004u16.to_le_bytes()); // min ce length
        parameter.extend_from_slice(&0x0006u16.to_le_bytes()); // max ce length

        parameter
    }
}

/// LE Start Encryption
pub struct LeStartEncryption {
    pub handle: u16,
    pub random: [u8; 8],
    pub diversifier: [u8; 2],
    pub key: [u8; 16],
}

impl CommandParameter for LeStartEncryption {
    const COMMAND: Opcode = opcodes::LE_START_ENCRYPTION;

    fn parameter(&self) -> Vec<u8> {
        let mut parameter = Vec::with_capacity(28);

        parameter.extend_from_slice(&self.handle.to_le_bytes());
        parameter.extend_from_slice(&self.random);
        parameter.extend_from_slice(&self.diversifier);
        parameter.extend_from_slice(&self.key);

        parameter
    }
}

pub struct LeLongTermKeyRequestReply {
    pub handle: u16,
    pub key: [u8; 16],
}

impl CommandParameter for LeLongTermKeyRequestReply {
    const COMMAND: Opcode = opcodes::LE_LONG_TERM_KEY_REQUEST_REPLY;

    fn parameter(&self) -> Vec<u8> {
        let mut parameter = self.handle.to_le_bytes().to_vec();

        parameter.extend_from_slice(&self.key);

        parameter
    }
}

pub struct LeLongTermKeyRequestNegativeReply {
    pub handle: u16,
}

impl CommandParameter for LeLongTermKeyRequestNegativeReply {
    const COMMAND: Opcode = opcodes::LE_LONG_TERM_KEY_REQUEST_NEGATIVE_REPLY;

    fn parameter(&self) -> Vec<u8> {
        self.handle.to_le_bytes().to_vec()
    }
}

pub struct Disconnect {
    pub handle: u16,
    pub reason: u8,
}

impl Disconnect {
    /// Remote user terminated connection
    pub const DEFAULT_REASON: u8 = 0x13;
}

impl CommandParameter for Disconnect {
    const COMMAND: Opcode = opcodes::DISCONNECT;

    fn parameter(&self) -> Vec<u8> {
        let mut parameter = self.handle.to_le_bytes().to_vec();

        parameter.push(self.reason);

        parameter
    }
}

pub struct ReadRssi {
    pub handle: u16,
}

impl CommandParameter for ReadRssi {
    const COMMAND: Opcode = opcodes::READ_RSSI;

    fn parameter(&self) -> Vec<u8> {
        self.handle.to_le_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advertising_interval_units() {
        assert_eq!(0x20, LeSetAdvertisingParameters { interval_ms: 20 }.interval());

        assert_eq!(160, LeSetAdvertisingParameters { interval_ms: 100 }.interval());

        // floor of 33 * 1.6
        assert_eq!(52, LeSetAdvertisingParameters { interval_ms: 33 }.interval());
    }

    #[test]
    fn advertising_parameters_packet() {
        let packet = LeSetAdvertisingParameters { interval_ms: 20 }.as_command_packet();

        assert_eq!(
            vec![0x01, 0x06, 0x20, 15, 0x20, 0x00, 0x20, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x07, 0],
            packet
        );
    }

    #[test]
    fn advertising_data_is_zero_padded() {
        let packet = LeSetAdvertisingData(&[0x02, 0x01, 0x06]).as_command_packet();

        assert_eq!(4 + 32, packet.len());

        assert_eq!(32, packet[3]);

        assert_eq!(&[3, 0x02, 0x01, 0x06, 0], &packet[4..9]);

        assert!(packet[8..].iter().all(|b| *b == 0));
    }

    #[test]
    fn start_encryption_packet() {
        let packet = LeStartEncryption {
            handle: 0x0040,
            random: [0; 8],
            diversifier: [0; 2],
            key: [0xaa; 16],
        }
        .as_command_packet();

        assert_eq!(&[0x01, 0x19, 0x20, 28, 0x40, 0x00], &packet[..6]);

        assert_eq!(&[0xaa; 16], &packet[16..]);
    }

    #[test]
    fn create_connection_packet() {
        let peer_address = BluetoothDeviceAddress([1, 2, 3, 4, 5, 6]);

        let packet = LeCreateConnection {
            peer_address,
            peer_address_type: AddressType::Random,
        }
        .as_command_packet();

        assert_eq!(4 + 25, packet.len());

        assert_eq!(0x01, packet[9]);

        assert_eq!(&[1, 2, 3, 4, 5, 6], &packet[10..16]);

        assert_eq!(&[0xc8, 0x00], &packet[23..25]);
    }
}
