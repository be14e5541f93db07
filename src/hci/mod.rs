//! The Host Controller Interface (HCI)
//!
//! The HCI is the primary way of interacting with the controller for this library. This module
//! only covers the packet formats, the commands used by the host, and the events decoded from the
//! controller. Driving the controller is done by the
//! [`HciTransport`](crate::hci_transport::HciTransport).

pub mod acl;
pub mod commands;
pub mod events;
pub mod status;

use std::fmt;

/// Packet Indicator
///
/// The first byte of every packet sent or received over the raw HCI socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HciPacketType {
    Command,
    AclData,
    SyncData,
    Event,
}

impl HciPacketType {
    pub fn val(&self) -> u8 {
        match *self {
            HciPacketType::Command => 0x01,
            HciPacketType::AclData => 0x02,
            HciPacketType::SyncData => 0x03,
            HciPacketType::Event => 0x04,
        }
    }

    pub fn try_from_val(val: u8) -> Result<Self, u8> {
        match val {
            0x01 => Ok(HciPacketType::Command),
            0x02 => Ok(HciPacketType::AclData),
            0x03 => Ok(HciPacketType::SyncData),
            0x04 => Ok(HciPacketType::Event),
            _ => Err(val),
        }
    }
}

/// An HCI command opcode
///
/// The opcode is the pair of the opcode group field (OGF) and the opcode command field (OCF)
/// packed as `OGF << 10 | OCF`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Opcode(u16);

impl Opcode {
    pub const fn new(ogf: u16, ocf: u16) -> Self {
        Opcode(ogf << 10 | ocf)
    }

    pub const fn from_raw(raw: u16) -> Self {
        Opcode(raw)
    }

    pub const fn val(&self) -> u16 {
        self.0
    }

    pub const fn ogf(&self) -> u16 {
        self.0 >> 10
    }

    pub const fn ocf(&self) -> u16 {
        self.0 & 0x3ff
    }

    fn name(&self) -> Option<&'static str> {
        use opcodes::*;

        let name = match *self {
            DISCONNECT => "Disconnect",
            SET_EVENT_MASK => "Set Event Mask",
            READ_LOCAL_VERSION_INFORMATION => "Read Local Version Information",
            READ_BD_ADDR => "Read BD_ADDR",
            READ_RSSI => "Read RSSI",
            LE_SET_EVENT_MASK => "LE Set Event Mask",
            LE_SET_ADVERTISING_PARAMETERS => "LE Set Advertising Parameters",
            LE_SET_ADVERTISING_DATA => "LE Set Advertising Data",
            LE_SET_SCAN_RESPONSE_DATA => "LE Set Scan Response Data",
            LE_SET_ADVERTISE_ENABLE => "LE Set Advertise Enable",
            LE_SET_SCAN_PARAMETERS => "LE Set Scan Parameters",
            LE_SET_SCAN_ENABLE => "LE Set Scan Enable",
            LE_CREATE_CONNECTION => "LE Create Connection",
            LE_START_ENCRYPTION => "LE Start Encryption",
            LE_LONG_TERM_KEY_REQUEST_REPLY => "LE Long Term Key Request Reply",
            LE_LONG_TERM_KEY_REQUEST_NEGATIVE_REPLY => "LE Long Term Key Request Negative Reply",
            _ => return None,
        };

        Some(name)
    }
}

impl fmt::Debug for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({:#06x})", name, self.0),
            None => write!(f, "{:#06x}", self.0),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The opcodes of the commands used by the host
pub mod opcodes {
    use super::Opcode;

    const LINK_CONTROL: u16 = 0x01;
    const CONTROLLER_AND_BASEBAND: u16 = 0x03;
    const INFORMATION_PARAMETERS: u16 = 0x04;
    const STATUS_PARAMETERS: u16 = 0x05;
    const LE_CONTROLLER: u16 = 0x08;

    pub const DISCONNECT: Opcode = Opcode::new(LINK_CONTROL, 0x0006);

    pub const SET_EVENT_MASK: Opcode = Opcode::new(CONTROLLER_AND_BASEBAND, 0x0001);

    pub const READ_LOCAL_VERSION_INFORMATION: Opcode = Opcode::new(INFORMATION_PARAMETERS, 0x0001);
    pub const READ_BD_ADDR: Opcode = Opcode::new(INFORMATION_PARAMETERS, 0x0009);

    pub const READ_RSSI: Opcode = Opcode::new(STATUS_PARAMETERS, 0x0005);

    pub const LE_SET_EVENT_MASK: Opcode = Opcode::new(LE_CONTROLLER, 0x0001);
    pub const LE_SET_ADVERTISING_PARAMETERS: Opcode = Opcode::new(LE_CONTROLLER, 0x0006);
    pub const LE_SET_ADVERTISING_DATA: Opcode = Opcode::new(LE_CONTROLLER, 0x0008);
    pub const LE_SET_SCAN_RESPONSE_DATA: Opcode = Opcode::new(LE_CONTROLLER, 0x0009);
    pub const LE_SET_ADVERTISE_ENABLE: Opcode = Opcode::new(LE_CONTROLLER, 0x000a);
    pub const LE_SET_SCAN_PARAMETERS: Opcode = Opcode::new(LE_CONTROLLER, 0x000b);
    pub const LE_SET_SCAN_ENABLE: Opcode = Opcode::new(LE_CONTROLLER, 0x000c);
    pub const LE_CREATE_CONNECTION: Opcode = Opcode::new(LE_CONTROLLER, 0x000d);
    pub const LE_START_ENCRYPTION: Opcode = Opcode::new(LE_CONTROLLER, 0x0019);
    pub const LE_LONG_TERM_KEY_REQUEST_REPLY: Opcode = Opcode::new(LE_CONTROLLER, 0x001a);
    pub const LE_LONG_TERM_KEY_REQUEST_NEGATIVE_REPLY: Opcode = Opcode::new(LE_CONTROLLER, 0x001b);
}

/// Used to get the information required for sending a command from the host to the controller
pub trait CommandParameter {
    /// The command to send to the Bluetooth Controller.
    const COMMAND: Opcode;

    /// Convert self into the parameter bytes of the command
    fn parameter(&self) -> Vec<u8>;

    /// Get the command packet to be sent to the controller
    ///
    /// The format of the command packet is the packet indicator, the command opcode, the length of
    /// the parameter, and then finally the parameter.
    fn as_command_packet(&self) -> Vec<u8> {
        command_packet(Self::COMMAND, &self.parameter())
    }
}

/// Build a command packet from an opcode and the raw parameter
pub fn command_packet(opcode: Opcode, parameter: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(parameter.len() + 4);

    packet.push(HciPacketType::Command.val());

    packet.extend_from_slice(&opcode.val().to_le_bytes());

    packet.push(parameter.len() as u8);

    packet.extend_from_slice(parameter);

    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_packing() {
        assert_eq!(0x200c, opcodes::LE_SET_SCAN_ENABLE.val());

        assert_eq!(0x0406, opcodes::DISCONNECT.val());

        assert_eq!(0x08, opcodes::LE_CREATE_CONNECTION.ogf());

        assert_eq!(0x0d, opcodes::LE_CREATE_CONNECTION.ocf());
    }

    #[test]
    fn command_packet_layout() {
        let packet = command_packet(opcodes::READ_RSSI, &[0x40, 0x00]);

        assert_eq!(vec![0x01, 0x05, 0x14, 0x02, 0x40, 0x00], packet);
    }
}
