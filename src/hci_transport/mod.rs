//! Host Controller interface transport layer
//!
//! The [`HciTransport`] owns the socket to the controller. It sends the HCI commands used by the
//! host, decodes everything the controller sends back, and tracks the state of the adapter.
//! Decoded packets are queued as [`TransportEvent`]s for the layers above to consume.

use crate::config::Config;
use crate::hci::acl::{self, AclData, Reassembler};
use crate::hci::commands::*;
use crate::hci::events::{
    self, CommandComplete, Event, LeConnectionComplete, LeConnectionUpdateComplete, LeMeta, LocalVersion,
    ReturnParameter,
};
use crate::hci::status::Status;
use crate::hci::{opcodes, CommandParameter, HciPacketType};
use crate::{AddressType, BluetoothDeviceAddress};
use std::collections::VecDeque;
use std::fmt;

/// The minimum HCI version (Bluetooth 4.0) of a supported controller
const MIN_HCI_VERSION: u8 = 0x06;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketError {
    /// The process is not permitted to use the socket
    PermissionDenied,
    /// The adapter went down, this is transient
    NetworkDown,
    Other(String),
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SocketError::PermissionDenied => f.write_str("Operation not permitted"),
            SocketError::NetworkDown => f.write_str("Network is down"),
            SocketError::Other(reason) => f.write_str(reason),
        }
    }
}

impl std::error::Error for SocketError {}

/// The kernel filter applied to the raw HCI socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketFilter {
    pub type_mask: u32,
    pub event_mask: [u32; 2],
    pub opcode: u16,
}

impl SocketFilter {
    /// Pass commands, ACL data, and the events decoded by the transport
    pub fn host_default() -> Self {
        let type_mask = 1 << HciPacketType::Command.val()
            | 1 << HciPacketType::Event.val()
            | 1 << HciPacketType::AclData.val();

        let event_mask_low = 1 << events::DISCONNECTION_COMPLETE
            | 1 << events::ENCRYPTION_CHANGE
            | 1 << events::COMMAND_COMPLETE
            | 1 << events::COMMAND_STATUS;

        let event_mask_high = 1 << (events::LE_META - 32);

        SocketFilter {
            type_mask,
            event_mask: [event_mask_low, event_mask_high],
            opcode: 0,
        }
    }

    /// The layout of `struct hci_filter`
    pub fn to_bytes(&self) -> [u8; 14] {
        let mut bytes = [0u8; 14];

        bytes[0..4].copy_from_slice(&self.type_mask.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.event_mask[0].to_le_bytes());
        bytes[8..12].copy_from_slice(&self.event_mask[1].to_le_bytes());
        bytes[12..14].copy_from_slice(&self.opcode.to_le_bytes());

        bytes
    }
}

/// The socket to a Bluetooth controller
///
/// Reading from the socket is not part of this trait. Whatever drives the socket pushes the data
/// it reads into [`HciTransport::on_socket_data`].
pub trait HciSocket {
    /// Write a complete packet, the packet indicator included
    fn write(&mut self, packet: &[u8]) -> Result<(), SocketError>;

    /// Apply the kernel filter of packets delivered to this socket
    fn set_filter(&mut self, filter: &SocketFilter) -> Result<(), SocketError>;

    /// Check if the adapter is up
    fn is_dev_up(&mut self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterState {
    Unknown,
    PoweredOff,
    PoweredOn,
    Unsupported,
    Unauthorized,
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            AdapterState::Unknown => f.write_str("unknown"),
            AdapterState::PoweredOff => f.write_str("poweredOff"),
            AdapterState::PoweredOn => f.write_str("poweredOn"),
            AdapterState::Unsupported => f.write_str("unsupported"),
            AdapterState::Unauthorized => f.write_str("unauthorized"),
        }
    }
}

/// An event decoded by the transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StateChange(AdapterState),
    AddressChange {
        address: BluetoothDeviceAddress,
        address_type: AddressType,
    },
    LocalVersion(LocalVersion),
    DisconnectionComplete {
        handle: u16,
        reason: Status,
    },
    EncryptionChange {
        handle: u16,
        enabled: bool,
    },
    ScanParametersSet(Status),
    ScanEnableSet(Status),
    AdvertisingParametersSet(Status),
    AdvertisingDataSet(Status),
    ScanResponseDataSet(Status),
    AdvertiseEnableSet(Status),
    RssiRead {
        handle: u16,
        rssi: i8,
    },
    LongTermKeyNegativeReplied {
        handle: u16,
    },
    /// The result of a connection attempt or an accepted connection
    ///
    /// An error is either the status of the connection complete event or the status of the
    /// rejected create connection command.
    LeConnectionComplete(Result<LeConnectionComplete, Status>),
    LeConnectionUpdateComplete(LeConnectionUpdateComplete),
    AdvertisingReport(events::AdvertisingReport),
    LongTermKeyRequest {
        handle: u16,
        random: [u8; 8],
        diversifier: [u8; 2],
    },
    AclData(AclData),
    /// A scan enable command observed on the socket
    ScanEnableCommand {
        enable: bool,
        filter_duplicates: bool,
    },
}

pub struct HciTransport<S> {
    socket: S,
    state: AdapterState,
    is_dev_up: Option<bool>,
    address: Option<BluetoothDeviceAddress>,
    address_type: AddressType,
    advertising_interval_ms: u16,
    reassembler: Reassembler,
    events: VecDeque<TransportEvent>,
}

impl<S: HciSocket> HciTransport<S> {
    pub fn new(socket: S, config: &Config) -> Self {
        HciTransport {
            socket,
            state: AdapterState::Unknown,
            is_dev_up: None,
            address: None,
            address_type: AddressType::Public,
            advertising_interval_ms: config.advertising_interval_ms,
            reassembler: Reassembler::new(),
            events: VecDeque::new(),
        }
    }

    /// Start up the transport
    ///
    /// This is the first poll of the adapter, if it is up the controller is initialized.
    pub fn init(&mut self) {
        self.poll_dev_up();
    }

    /// Check if the adapter has gone up or down
    ///
    /// This is expected to be called periodically by whatever drives the socket.
    pub fn poll_dev_up(&mut self) {
        let is_dev_up = self.socket.is_dev_up();

        if self.is_dev_up == Some(is_dev_up) {
            return;
        }

        self.is_dev_up = Some(is_dev_up);

        if is_dev_up {
            log::info!("adapter is up, initializing the controller");

            self.set_socket_filter();
            self.set_event_mask();
            self.set_le_event_mask();
            self.read_local_version();
            self.read_bd_addr();
        } else {
            self.change_state(AdapterState::PoweredOff);
        }
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    /// The public address of the controller, once it is read
    pub fn address(&self) -> Option<BluetoothDeviceAddress> {
        self.address
    }

    pub fn address_type(&self) -> AddressType {
        self.address_type
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }

    /// Take the events decoded since the last call
    pub fn take_events(&mut self) -> VecDeque<TransportEvent> {
        std::mem::take(&mut self.events)
    }

    fn change_state(&mut self, state: AdapterState) {
        if self.state != state {
            log::info!("adapter state {} -> {}", self.state, state);

            self.state = state;

            self.events.push_back(TransportEvent::StateChange(state));
        }
    }

    fn write(&mut self, packet: &[u8]) {
        if let Err(e) = self.socket.write(packet) {
            self.on_socket_error(&e);
        }
    }

    fn send_command<C: CommandParameter>(&mut self, command: C) {
        let packet = command.as_command_packet();

        log::debug!("{} - write: {:02x?}", C::COMMAND, packet);

        self.write(&packet);
    }

    fn set_socket_filter(&mut self) {
        let filter = SocketFilter::host_default();

        log::debug!("setting socket filter {:02x?}", filter.to_bytes());

        if let Err(e) = self.socket.set_filter(&filter) {
            self.on_socket_error(&e);
        }
    }

    pub fn set_event_mask(&mut self) {
        self.send_command(SetEventMask::HOST_DEFAULT)
    }

    pub fn set_le_event_mask(&mut self) {
        self.send_command(LeSetEventMask::HOST_DEFAULT)
    }

    pub fn read_local_version(&mut self) {
        self.send_command(ReadLocalVersionInformation)
    }

    pub fn read_bd_addr(&mut self) {
        self.send_command(ReadBdAddr)
    }

    pub fn set_advertising_parameters(&mut self) {
        self.send_command(LeSetAdvertisingParameters {
            interval_ms: self.advertising_interval_ms,
        })
    }

    pub fn set_advertising_data(&mut self, data: &[u8]) {
        self.send_command(LeSetAdvertisingData(data))
    }

    pub fn set_scan_response_data(&mut self, data: &[u8]) {
        self.send_command(LeSetScanResponseData(data))
    }

    pub fn set_advertise_enable(&mut self, enable: bool) {
        self.send_command(LeSetAdvertiseEnable(enable))
    }

    pub fn set_scan_parameters(&mut self) {
        self.send_command(LeSetScanParameters::default())
    }

    pub fn set_scan_enable(&mut self, enable: bool, filter_duplicates: bool) {
        self.send_command(LeSetScanEnable {
            enable,
            filter_duplicates,
        })
    }

    pub fn create_le_connection(&mut self, peer_address: BluetoothDeviceAddress, peer_address_type: AddressType) {
        self.send_command(LeCreateConnection {
            peer_address,
            peer_address_type,
        })
    }

    pub fn start_le_encryption(&mut self, handle: u16, random: [u8; 8], diversifier: [u8; 2], key: [u8; 16]) {
        self.send_command(LeStartEncryption {
            handle,
            random,
            diversifier,
            key,
        })
    }

    pub fn le_long_term_key_reply(&mut self, handle: u16, key: [u8; 16]) {
        self.send_command(LeLongTermKeyRequestReply { handle, key })
    }

    pub fn le_long_term_key_negative_reply(&mut self, handle: u16) {
        self.send_command(LeLongTermKeyRequestNegativeReply { handle })
    }

    pub fn disconnect(&mut self, handle: u16, reason: u8) {
        self.send_command(Disconnect { handle, reason })
    }

    pub fn read_rssi(&mut self, handle: u16) {
        self.send_command(ReadRssi { handle })
    }

    /// Send an L2CAP basic frame over a connection
    pub fn write_acl_data(&mut self, handle: u16, channel_id: u16, payload: &[u8]) {
        let packet = acl::build_acl_packet(handle, channel_id, payload);

        log::debug!("ACL write (handle {:#06x}, channel {:#06x}): {:02x?}", handle, channel_id, payload);

        self.write(&packet);
    }

    /// Drop any partially reassembled data for a connection
    pub fn clear_acl_buffer(&mut self, handle: u16) {
        self.reassembler.clear(handle)
    }

    /// Process an error of the socket
    pub fn on_socket_error(&mut self, error: &SocketError) {
        match error {
            SocketError::PermissionDenied => {
                log::error!("HCI socket: {}", error);

                self.change_state(AdapterState::Unauthorized);
            }
            SocketError::NetworkDown => log::debug!("HCI socket: {}", error),
            SocketError::Other(_) => log::error!("HCI socket: {}", error),
        }
    }

    /// Process data read from the socket
    pub fn on_socket_data(&mut self, data: &[u8]) {
        let Some((indicator, packet)) = data.split_first() else {
            return;
        };

        match HciPacketType::try_from_val(*indicator) {
            Ok(HciPacketType::Event) => match Event::try_from_packet(packet) {
                Ok(event) => self.on_event(event),
                Err(e) => log::warn!("{}: {:02x?}", e, packet),
            },
            Ok(HciPacketType::AclData) => match self.reassembler.process(packet) {
                Ok(Some(data)) => self.events.push_back(TransportEvent::AclData(data)),
                Ok(None) => (),
                Err(e) => log::warn!("{}", e),
            },
            Ok(HciPacketType::Command) => self.on_command_packet(packet),
            _ => log::debug!("unhandled packet {:02x?}", data),
        }
    }

    fn on_command_packet(&mut self, packet: &[u8]) {
        if packet.len() < 5 {
            return;
        }

        let opcode = u16::from_le_bytes([packet[0], packet[1]]);

        if opcode == opcodes::LE_SET_SCAN_ENABLE.val() {
            self.events.push_back(TransportEvent::ScanEnableCommand {
                enable: packet[3] == 0x01,
                filter_duplicates: packet[4] == 0x01,
            })
        }
    }

    fn on_event(&mut self, event: Event) {
        log::debug!("event: {:?}", event);

        match event {
            Event::DisconnectionComplete { handle, reason, .. } => {
                self.reassembler.clear(handle);

                self.events
                    .push_back(TransportEvent::DisconnectionComplete { handle, reason })
            }
            Event::EncryptionChange { handle, enabled, .. } => {
                self.events.push_back(TransportEvent::EncryptionChange { handle, enabled })
            }
            Event::CommandComplete(complete) => self.on_command_complete(complete),
            Event::CommandStatus { status, opcode } => {
                if opcode == opcodes::LE_CREATE_CONNECTION && !status.is_success() {
                    self.events
                        .push_back(TransportEvent::LeConnectionComplete(Err(status)))
                }
            }
            Event::LeMeta(meta) => self.on_le_meta(meta),
            Event::Unknown(code) => log::debug!("unhandled event code {:#04x}", code),
        }
    }

    fn on_command_complete(&mut self, complete: CommandComplete) {
        let CommandComplete {
            opcode,
            status,
            return_parameter,
        } = complete;

        let event = match (opcode, return_parameter) {
            (opcodes::READ_LOCAL_VERSION_INFORMATION, ReturnParameter::ReadLocalVersion(version)) => {
                self.on_local_version(&version);

                TransportEvent::LocalVersion(version)
            }
            (opcodes::READ_BD_ADDR, ReturnParameter::ReadBdAddr(address)) => {
                self.address = Some(address);
                self.address_type = AddressType::Public;

                TransportEvent::AddressChange {
                    address,
                    address_type: AddressType::Public,
                }
            }
            (opcodes::LE_SET_SCAN_PARAMETERS, _) => {
                self.change_state(AdapterState::PoweredOn);

                TransportEvent::ScanParametersSet(status)
            }
            (opcodes::LE_SET_ADVERTISING_PARAMETERS, _) => {
                self.change_state(AdapterState::PoweredOn);

                TransportEvent::AdvertisingParametersSet(status)
            }
            (opcodes::LE_SET_SCAN_ENABLE, _) => TransportEvent::ScanEnableSet(status),
            (opcodes::LE_SET_ADVERTISING_DATA, _) => TransportEvent::AdvertisingDataSet(status),
            (opcodes::LE_SET_SCAN_RESPONSE_DATA, _) => TransportEvent::ScanResponseDataSet(status),
            (opcodes::LE_SET_ADVERTISE_ENABLE, _) => TransportEvent::AdvertiseEnableSet(status),
            (opcodes::READ_RSSI, ReturnParameter::ReadRssi { handle, rssi }) => TransportEvent::RssiRead { handle, rssi },
            (
                opcodes::LE_LONG_TERM_KEY_REQUEST_NEGATIVE_REPLY,
                ReturnParameter::LongTermKeyRequestNegativeReply { handle },
            ) => TransportEvent::LongTermKeyNegativeReplied { handle },
            (opcode, _) => {
                if !status.is_success() {
                    log::warn!("{} failed: {}", opcode, status);
                }

                return;
            }
        };

        self.events.push_back(event);
    }

    fn on_local_version(&mut self, version: &LocalVersion) {
        if version.hci_version < MIN_HCI_VERSION {
            self.change_state(AdapterState::Unsupported);
        } else if self.state != AdapterState::PoweredOn {
            self.set_scan_enable(false, true);
            self.set_scan_parameters();
            self.set_advertising_parameters();
        }
    }

    fn on_le_meta(&mut self, meta: LeMeta) {
        let event = match meta {
            LeMeta::ConnectionComplete(complete) => {
                if complete.status.is_success() {
                    TransportEvent::LeConnectionComplete(Ok(complete))
                } else {
                    TransportEvent::LeConnectionComplete(Err(complete.status))
                }
            }
            LeMeta::AdvertisingReport(reports) => {
                for report in reports {
                    self.events.push_back(TransportEvent::AdvertisingReport(report))
                }

                return;
            }
            LeMeta::ConnectionUpdateComplete(update) => TransportEvent::LeConnectionUpdateComplete(update),
            LeMeta::LongTermKeyRequest {
                handle,
                random,
                diversifier,
            } => TransportEvent::LongTermKeyRequest {
                handle,
                random,
                diversifier,
            },
            LeMeta::Unknown(sub_event) => {
                log::debug!("unhandled LE meta sub event {:#04x}", sub_event);

                return;
            }
        };

        self.events.push_back(event);
    }
}
