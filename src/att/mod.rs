//! The Attribute Protocol
//!
//! The Attribute Protocol is used to expose the attributes of a device through Bluetooth. The host
//! is only ever an Attribute Protocol *client*, the requests it sends and the responses it
//! receives are built and parsed in [`pdu`]. The request/response flow is in the
//! [`gatt`](crate::gatt) module.
//!
//! This is implementation of the Attribute Protocol as defined in the Bluetooth Specification
//! (version 5.0), Vol. 3, Part F.

use crate::l2cap;
use std::fmt;

pub mod pdu;

pub const L2CAP_CHANNEL_ID: l2cap::ChannelIdentifier = l2cap::ChannelIdentifier::AttributeProtocol;

/// The minimum MTU of the Attribute Protocol over an LE-U link
pub const MIN_ATT_MTU_LE: u16 = l2cap::LE_MIN_MTU as u16;

/// Bit 6 of an opcode marks a command, a PDU without a response
const COMMAND_FLAG: u8 = 0x40;

/// The PDUs sent by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPduName {
    ExchangeMtuRequest,
    FindInformationRequest,
    FindByTypeValueRequest,
    ReadByTypeRequest,
    ReadRequest,
    ReadBlobRequest,
    ReadMultipleRequest,
    ReadByGroupTypeRequest,
    WriteRequest,
    WriteCommand,
    PrepareWriteRequest,
    ExecuteWriteRequest,
    HandleValueConfirmation,
    SignedWriteCommand,
}

impl TryFrom<u8> for ClientPduName {
    type Error = ();

    fn try_from(val: u8) -> Result<Self, ()> {
        match val {
            0x02 => Ok(ClientPduName::ExchangeMtuRequest),
            0x04 => Ok(ClientPduName::FindInformationRequest),
            0x06 => Ok(ClientPduName::FindByTypeValueRequest),
            0x08 => Ok(ClientPduName::ReadByTypeRequest),
            0x0A => Ok(ClientPduName::ReadRequest),
            0x0C => Ok(ClientPduName::ReadBlobRequest),
            0x0E => Ok(ClientPduName::ReadMultipleRequest),
            0x10 => Ok(ClientPduName::ReadByGroupTypeRequest),
            0x12 => Ok(ClientPduName::WriteRequest),
            0x52 => Ok(ClientPduName::WriteCommand),
            0x16 => Ok(ClientPduName::PrepareWriteRequest),
            0x18 => Ok(ClientPduName::ExecuteWriteRequest),
            0x1E => Ok(ClientPduName::HandleValueConfirmation),
            0xD2 => Ok(ClientPduName::SignedWriteCommand),
            _ => Err(()),
        }
    }
}

impl From<ClientPduName> for u8 {
    fn from(pdu_name: ClientPduName) -> u8 {
        match pdu_name {
            ClientPduName::ExchangeMtuRequest => 0x02,
            ClientPduName::FindInformationRequest => 0x04,
            ClientPduName::FindByTypeValueRequest => 0x06,
            ClientPduName::ReadByTypeRequest => 0x08,
            ClientPduName::ReadRequest => 0x0A,
            ClientPduName::ReadBlobRequest => 0x0C,
            ClientPduName::ReadMultipleRequest => 0x0E,
            ClientPduName::ReadByGroupTypeRequest => 0x10,
            ClientPduName::WriteRequest => 0x12,
            ClientPduName::WriteCommand => 0x52,
            ClientPduName::PrepareWriteRequest => 0x16,
            ClientPduName::ExecuteWriteRequest => 0x18,
            ClientPduName::HandleValueConfirmation => 0x1E,
            ClientPduName::SignedWriteCommand => 0xD2,
        }
    }
}

impl ClientPduName {
    /// Check if a received opcode is a request from the peer
    ///
    /// Requests are the even opcodes that expect a response. Commands and the handle value
    /// confirmation are not requests.
    pub fn is_request(opcode: u8) -> bool {
        opcode & COMMAND_FLAG == 0
            && opcode % 2 == 0
            && opcode != u8::from(ClientPduName::HandleValueConfirmation)
    }
}

/// The PDUs sent by a server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPduName {
    ErrorResponse,
    ExchangeMTUResponse,
    FindInformationResponse,
    FindByTypeValueResponse,
    ReadByTypeResponse,
    ReadResponse,
    ReadBlobResponse,
    ReadMultipleResponse,
    ReadByGroupTypeResponse,
    WriteResponse,
    PrepareWriteResponse,
    ExecuteWriteResponse,
    HandleValueNotification,
    HandleValueIndication,
}

impl TryFrom<u8> for ServerPduName {
    type Error = ();

    fn try_from(val: u8) -> Result<Self, ()> {
        match val {
            0x01 => Ok(ServerPduName::ErrorResponse),
            0x03 => Ok(ServerPduName::ExchangeMTUResponse),
            0x05 => Ok(ServerPduName::FindInformationResponse),
            0x07 => Ok(ServerPduName::FindByTypeValueResponse),
            0x09 => Ok(ServerPduName::ReadByTypeResponse),
            0x0B => Ok(ServerPduName::ReadResponse),
            0x0D => Ok(ServerPduName::ReadBlobResponse),
            0x0F => Ok(ServerPduName::ReadMultipleResponse),
            0x11 => Ok(ServerPduName::ReadByGroupTypeResponse),
            0x13 => Ok(ServerPduName::WriteResponse),
            0x17 => Ok(ServerPduName::PrepareWriteResponse),
            0x19 => Ok(ServerPduName::ExecuteWriteResponse),
            0x1B => Ok(ServerPduName::HandleValueNotification),
            0x1D => Ok(ServerPduName::HandleValueIndication),
            _ => Err(()),
        }
    }
}

impl From<ServerPduName> for u8 {
    fn from(pdu_name: ServerPduName) -> u8 {
        match pdu_name {
            ServerPduName::ErrorResponse => 0x01,
            ServerPduName::ExchangeMTUResponse => 0x03,
            ServerPduName::FindInformationResponse => 0x05,
            ServerPduName::FindByTypeValueResponse => 0x07,
            ServerPduName::ReadByTypeResponse => 0x09,
            ServerPduName::ReadResponse => 0x0B,
            ServerPduName::ReadBlobResponse => 0x0D,
            ServerPduName::ReadMultipleResponse => 0x0F,
            ServerPduName::ReadByGroupTypeResponse => 0x11,
            ServerPduName::WriteResponse => 0x13,
            ServerPduName::PrepareWriteResponse => 0x17,
            ServerPduName::ExecuteWriteResponse => 0x19,
            ServerPduName::HandleValueNotification => 0x1B,
            ServerPduName::HandleValueIndication => 0x1D,
        }
    }
}

/// Errors of the Attribute Protocol client
#[derive(Clone, PartialEq, Eq)]
pub enum Error {
    /// An Error PDU is received
    Pdu(pdu::ErrorResponse),
    /// A different pdu was expected
    ///
    /// This contains the opcode value of the unexpectedly received pdu
    UnexpectedPdu(u8),
    /// An empty PDU
    Empty,
    /// The PDU is not the size it should be
    BadSize { name: &'static str, len: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Pdu(pdu) => write!(f, "Received Error PDU: {}", pdu),
            Error::UnexpectedPdu(val) => write!(f, "Unexpected PDU with opcode {:#04x}", val),
            Error::Empty => write!(f, "Received an empty PDU"),
            Error::BadSize { name, len } => write!(f, "Incorrect size of {} for a {}", len, name),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for Error {}

impl From<pdu::ErrorResponse> for Error {
    fn from(err: pdu::ErrorResponse) -> Error {
        Error::Pdu(err)
    }
}
