//! HCI events
//!
//! Only the events the host unmasks are decoded, everything else is kept as its raw event code.

use super::status::Status;
use super::{opcodes, Opcode};
use crate::{AddressType, BluetoothDeviceAddress};
use std::fmt;

pub const DISCONNECTION_COMPLETE: u8 = 0x05;
pub const ENCRYPTION_CHANGE: u8 = 0x08;
pub const COMMAND_COMPLETE: u8 = 0x0e;
pub const COMMAND_STATUS: u8 = 0x0f;
pub const LE_META: u8 = 0x3e;

pub const LE_CONNECTION_COMPLETE: u8 = 0x01;
pub const LE_ADVERTISING_REPORT: u8 = 0x02;
pub const LE_CONNECTION_UPDATE_COMPLETE: u8 = 0x03;
pub const LE_LONG_TERM_KEY_REQUEST: u8 = 0x05;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventError {
    pub event: u8,
    pub reason: &'static str,
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "malformed event {:#04x}: {}", self.event, self.reason)
    }
}

impl std::error::Error for EventError {}

/// Bounds checked reader of event parameters
struct Parameters<'a> {
    event: u8,
    raw: &'a [u8],
}

impl<'a> Parameters<'a> {
    fn new(event: u8, raw: &'a [u8]) -> Self {
        Parameters { event, raw }
    }

    fn error(&self) -> EventError {
        EventError {
            event: self.event,
            reason: "parameters shorter than expected",
        }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], EventError> {
        if self.raw.len() < len {
            return Err(self.error());
        }

        let (bytes, rest) = self.raw.split_at(len);

        self.raw = rest;

        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], EventError> {
        let mut array = [0u8; N];

        array.copy_from_slice(self.bytes(N)?);

        Ok(array)
    }

    fn u8(&mut self) -> Result<u8, EventError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, EventError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn status(&mut self) -> Result<Status, EventError> {
        self.u8().map(Status::from)
    }

    fn address(&mut self) -> Result<BluetoothDeviceAddress, EventError> {
        self.array().map(BluetoothDeviceAddress)
    }

    fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVersion {
    pub hci_version: u8,
    pub hci_revision: u16,
    pub lmp_version: u8,
    pub manufacturer: u16,
    pub lmp_sub_version: u16,
}

/// The decoded return parameter of a command complete event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnParameter {
    ReadLocalVersion(LocalVersion),
    ReadBdAddr(BluetoothDeviceAddress),
    ReadRssi { handle: u16, rssi: i8 },
    LongTermKeyRequestReply { handle: u16 },
    LongTermKeyRequestNegativeReply { handle: u16 },
    /// Commands that only return a status, or ones that are not decoded
    Raw(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandComplete {
    pub opcode: Opcode,
    pub status: Status,
    pub return_parameter: ReturnParameter,
}

/// The connection role of the local device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The local device initiated the connection
    Central,
    /// The local device accepted the connection (it was advertising)
    Peripheral,
}

impl Role {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0x00 => Role::Central,
            _ => Role::Peripheral,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeConnectionComplete {
    pub status: Status,
    pub handle: u16,
    pub role: Role,
    pub peer_address_type: AddressType,
    pub peer_address: BluetoothDeviceAddress,
    /// Connection interval in milliseconds
    pub interval: f32,
    pub latency: u16,
    /// Supervision timeout in milliseconds
    pub supervision_timeout: u32,
    pub master_clock_accuracy: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeConnectionUpdateComplete {
    pub status: Status,
    pub handle: u16,
    pub interval: f32,
    pub latency: u16,
    pub supervision_timeout: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingReport {
    pub event_type: u8,
    pub address_type: AddressType,
    pub address: BluetoothDeviceAddress,
    pub data: Vec<u8>,
    pub rssi: i8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeMeta {
    ConnectionComplete(LeConnectionComplete),
    AdvertisingReport(Vec<AdvertisingReport>),
    ConnectionUpdateComplete(LeConnectionUpdateComplete),
    LongTermKeyRequest {
        handle: u16,
        random: [u8; 8],
        diversifier: [u8; 2],
    },
    Unknown(u8),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    DisconnectionComplete { status: Status, handle: u16, reason: Status },
    EncryptionChange { status: Status, handle: u16, enabled: bool },
    CommandComplete(CommandComplete),
    CommandStatus { status: Status, opcode: Opcode },
    LeMeta(LeMeta),
    Unknown(u8),
}

impl Event {
    /// Decode an event packet without its packet indicator
    pub fn try_from_packet(packet: &[u8]) -> Result<Self, EventError> {
        let mut header = Parameters::new(packet.first().copied().unwrap_or_default(), packet);

        let code = header.u8()?;

        let len = header.u8()? as usize;

        let mut p = Parameters::new(code, header.bytes(len)?);

        match code {
            DISCONNECTION_COMPLETE => Ok(Event::DisconnectionComplete {
                status: p.status()?,
                handle: p.u16()?,
                reason: p.status()?,
            }),
            ENCRYPTION_CHANGE => Ok(Event::EncryptionChange {
                status: p.status()?,
                handle: p.u16()?,
                enabled: p.u8()? != 0,
            }),
            COMMAND_COMPLETE => Self::command_complete(&mut p),
            COMMAND_STATUS => {
                let status = p.status()?;

                let _num_packets = p.u8()?;

                let opcode = Opcode::from_raw(p.u16()?);

                Ok(Event::CommandStatus { status, opcode })
            }
            LE_META => Self::le_meta(&mut p).map(Event::LeMeta),
            _ => Ok(Event::Unknown(code)),
        }
    }

    fn command_complete(p: &mut Parameters) -> Result<Self, EventError> {
        let _num_packets = p.u8()?;

        let opcode = Opcode::from_raw(p.u16()?);

        // A command complete without a status is a flow control update (opcode 0)
        let status = if p.raw.is_empty() { Status::Success } else { p.status()? };

        let return_parameter = match opcode {
            opcodes::READ_LOCAL_VERSION_INFORMATION if status.is_success() => {
                ReturnParameter::ReadLocalVersion(LocalVersion {
                    hci_version: p.u8()?,
                    hci_revision: p.u16()?,
                    lmp_version: p.u8()?,
                    manufacturer: p.u16()?,
                    lmp_sub_version: p.u16()?,
                })
            }
            opcodes::READ_BD_ADDR if status.is_success() => ReturnParameter::ReadBdAddr(p.address()?),
            opcodes::READ_RSSI if status.is_success() => ReturnParameter::ReadRssi {
                handle: p.u16()?,
                rssi: p.u8()? as i8,
            },
            opcodes::LE_LONG_TERM_KEY_REQUEST_REPLY => {
                ReturnParameter::LongTermKeyRequestReply { handle: p.u16()? }
            }
            opcodes::LE_LONG_TERM_KEY_REQUEST_NEGATIVE_REPLY => {
                ReturnParameter::LongTermKeyRequestNegativeReply { handle: p.u16()? }
            }
            _ => ReturnParameter::Raw(p.rest().to_vec()),
        };

        Ok(Event::CommandComplete(CommandComplete {
            opcode,
            status,
            return_parameter,
        }))
    }

    fn le_meta(p: &mut Parameters) -> Result<LeMeta, EventError> {
        let sub_event = p.u8()?;

        match sub_event {
            LE_CONNECTION_COMPLETE => Ok(LeMeta::ConnectionComplete(LeConnectionComplete {
                status: p.status()?,
                handle: p.u16()?,
                role: Role::from_raw(p.u8()?),
                peer_address_type: AddressType::from_raw(p.u8()?),
                peer_address: p.address()?,
                interval: f32::from(p.u16()?) * 1.25,
                latency: p.u16()?,
                supervision_timeout: u32::from(p.u16()?) * 10,
                master_clock_accuracy: p.u8()?,
            })),
            LE_ADVERTISING_REPORT => {
                let count = p.u8()?;

                let mut reports = Vec::with_capacity(count.into());

                for _ in 0..count {
                    let event_type = p.u8()?;

                    let address_type = AddressType::from_raw(p.u8()?);

                    let address = p.address()?;

                    let data_len = p.u8()? as usize;

                    let data = p.bytes(data_len)?.to_vec();

                    let rssi = p.u8()? as i8;

                    reports.push(AdvertisingReport {
                        event_type,
                        address_type,
                        address,
                        data,
                        rssi,
                    })
                }

                Ok(LeMeta::AdvertisingReport(reports))
            }
            LE_CONNECTION_UPDATE_COMPLETE => Ok(LeMeta::ConnectionUpdateComplete(LeConnectionUpdateComplete {
                status: p.status()?,
                handle: p.u16()?,
                interval: f32::from(p.u16()?) * 1.25,
                latency: p.u16()?,
                supervision_timeout: u32::from(p.u16()?) * 10,
            })),
            LE_LONG_TERM_KEY_REQUEST => Ok(LeMeta::LongTermKeyRequest {
                handle: p.u16()?,
                random: p.array()?,
                diversifier: p.array()?,
            }),
            _ => Ok(LeMeta::Unknown(sub_event)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnection_complete() {
        let event = Event::try_from_packet(&[0x05, 0x04, 0x00, 0x40, 0x00, 0x13]).unwrap();

        assert_eq!(
            Event::DisconnectionComplete {
                status: Status::Success,
                handle: 0x40,
                reason: Status::RemoteUserTerminatedConnection
            },
            event
        );
    }

    #[test]
    fn read_local_version_complete() {
        let packet = [0x0e, 0x0c, 0x01, 0x01, 0x10, 0x00, 0x09, 0x34, 0x12, 0x09, 0x0f, 0x00, 0x21, 0x43];

        match Event::try_from_packet(&packet).unwrap() {
            Event::CommandComplete(CommandComplete {
                opcode,
                status,
                return_parameter: ReturnParameter::ReadLocalVersion(version),
            }) => {
                assert_eq!(opcodes::READ_LOCAL_VERSION_INFORMATION, opcode);
                assert_eq!(Status::Success, status);
                assert_eq!(0x09, version.hci_version);
                assert_eq!(0x1234, version.hci_revision);
                assert_eq!(0x000f, version.manufacturer);
                assert_eq!(0x4321, version.lmp_sub_version);
            }
            event => panic!("unexpected {:?}", event),
        }
    }

    #[test]
    fn read_rssi_complete() {
        let packet = [0x0e, 0x07, 0x01, 0x05, 0x14, 0x00, 0x40, 0x00, 0xc4];

        match Event::try_from_packet(&packet).unwrap() {
            Event::CommandComplete(complete) => {
                assert_eq!(ReturnParameter::ReadRssi { handle: 0x40, rssi: -60 }, complete.return_parameter)
            }
            event => panic!("unexpected {:?}", event),
        }
    }

    #[test]
    fn command_status() {
        let packet = [0x0f, 0x04, 0x0c, 0x01, 0x0d, 0x20];

        assert_eq!(
            Event::CommandStatus {
                status: Status::CommandDisallowed,
                opcode: opcodes::LE_CREATE_CONNECTION
            },
            Event::try_from_packet(&packet).unwrap()
        );
    }

    #[test]
    fn le_connection_complete() {
        let packet = [
            0x3e, 0x13, 0x01, 0x00, 0x40, 0x00, 0x01, 0x01, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11, 0x08, 0x00, 0x00, 0x00,
            0xc8, 0x00, 0x00,
        ];

        match Event::try_from_packet(&packet).unwrap() {
            Event::LeMeta(LeMeta::ConnectionComplete(complete)) => {
                assert_eq!(0x40, complete.handle);
                assert_eq!(Role::Peripheral, complete.role);
                assert_eq!(AddressType::Random, complete.peer_address_type);
                assert_eq!("11:22:33:44:55:66", complete.peer_address.to_string());
                assert_eq!(10.0, complete.interval);
                assert_eq!(2000, complete.supervision_timeout);
            }
            event => panic!("unexpected {:?}", event),
        }
    }

    #[test]
    fn le_advertising_report() {
        let packet = [
            0x3e, 0x12, 0x02, 0x01, 0x00, 0x00, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01, 0x03, 0x02, 0x01, 0x06, 0xb0,
        ];

        let mut packet = packet.to_vec();

        packet[1] = (packet.len() - 2) as u8;

        match Event::try_from_packet(&packet).unwrap() {
            Event::LeMeta(LeMeta::AdvertisingReport(reports)) => {
                assert_eq!(1, reports.len());
                assert_eq!(0x00, reports[0].event_type);
                assert_eq!("01:02:03:04:05:06", reports[0].address.to_string());
                assert_eq!(vec![0x02, 0x01, 0x06], reports[0].data);
                assert_eq!(-80, reports[0].rssi);
            }
            event => panic!("unexpected {:?}", event),
        }
    }

    #[test]
    fn le_long_term_key_request() {
        let packet = [0x3e, 0x0d, 0x05, 0x40, 0x00, 1, 2, 3, 4, 5, 6, 7, 8, 0x34, 0x12];

        assert_eq!(
            Event::LeMeta(LeMeta::LongTermKeyRequest {
                handle: 0x40,
                random: [1, 2, 3, 4, 5, 6, 7, 8],
                diversifier: [0x34, 0x12],
            }),
            Event::try_from_packet(&packet).unwrap()
        );
    }

    #[test]
    fn truncated_event() {
        assert!(Event::try_from_packet(&[0x05, 0x04, 0x00, 0x40]).is_err());

        assert!(Event::try_from_packet(&[0x3e, 0x02, 0x01, 0x00]).is_err());
    }
}
