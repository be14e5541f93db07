//! Attribute Protocol PDUs
//!
//! Requests are built into the raw bytes of the PDU and responses are parsed from them. Every
//! parser checks the opcode first, an Error Response received in place of the expected response
//! is returned as [`Error::Pdu`](super::Error::Pdu).

use super::{ClientPduName, ServerPduName};
use crate::Uuid;
use std::fmt;

/// Attribute Protocol error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Used to represent 0x0000, this should never be used as an error code
    NoError,
    InvalidHandle,
    ReadNotPermitted,
    WriteNotPermitted,
    InvalidPDU,
    InsufficientAuthentication,
    RequestNotSupported,
    InvalidOffset,
    InsufficientAuthorization,
    PrepareQueueFull,
    AttributeNotFound,
    AttributeNotLong,
    InsufficientEncryptionKeySize,
    InvalidAttributeValueLength,
    UnlikelyError,
    InsufficientEncryption,
    UnsupportedGroupType,
    InsufficientResources,
    /// Application and profile errors, and the reserved values
    Other(u8),
}

impl Error {
    pub(crate) fn from_raw(val: u8) -> Error {
        match val {
            0x00 => Error::NoError,
            0x01 => Error::InvalidHandle,
            0x02 => Error::ReadNotPermitted,
            0x03 => Error::WriteNotPermitted,
            0x04 => Error::InvalidPDU,
            0x05 => Error::InsufficientAuthentication,
            0x06 => Error::RequestNotSupported,
            0x07 => Error::InvalidOffset,
            0x08 => Error::InsufficientAuthorization,
            0x09 => Error::PrepareQueueFull,
            0x0A => Error::AttributeNotFound,
            0x0B => Error::AttributeNotLong,
            0x0C => Error::InsufficientEncryptionKeySize,
            0x0D => Error::InvalidAttributeValueLength,
            0x0E => Error::UnlikelyError,
            0x0F => Error::InsufficientEncryption,
            0x10 => Error::UnsupportedGroupType,
            0x11 => Error::InsufficientResources,
            _ => Error::Other(val),
        }
    }

    pub(crate) fn get_raw(&self) -> u8 {
        match self {
            Error::NoError => 0x00,
            Error::InvalidHandle => 0x01,
            Error::ReadNotPermitted => 0x02,
            Error::WriteNotPermitted => 0x03,
            Error::InvalidPDU => 0x04,
            Error::InsufficientAuthentication => 0x05,
            Error::RequestNotSupported => 0x06,
            Error::InvalidOffset => 0x07,
            Error::InsufficientAuthorization => 0x08,
            Error::PrepareQueueFull => 0x09,
            Error::AttributeNotFound => 0x0A,
            Error::AttributeNotLong => 0x0B,
            Error::InsufficientEncryptionKeySize => 0x0C,
            Error::InvalidAttributeValueLength => 0x0D,
            Error::UnlikelyError => 0x0E,
            Error::InsufficientEncryption => 0x0F,
            Error::UnsupportedGroupType => 0x10,
            Error::InsufficientResources => 0x11,
            Error::Other(val) => *val,
        }
    }

    /// Check if the error is resolved by encrypting the link
    pub fn requires_encryption(&self) -> bool {
        matches!(
            self,
            Error::InsufficientAuthentication | Error::InsufficientAuthorization | Error::InsufficientEncryption
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NoError => write!(f, "No Error"),
            Error::InvalidHandle => write!(f, "Invalid Handle"),
            Error::ReadNotPermitted => write!(f, "Read Not Permitted"),
            Error::WriteNotPermitted => write!(f, "Write Not Permitted"),
            Error::InvalidPDU => write!(f, "Invalid PDU"),
            Error::InsufficientAuthentication => write!(f, "Insufficient Authentication"),
            Error::RequestNotSupported => write!(f, "Request Not Supported"),
            Error::InvalidOffset => write!(f, "Invalid Offset"),
            Error::InsufficientAuthorization => write!(f, "Insufficient Authorization"),
            Error::PrepareQueueFull => write!(f, "Prepare Queue Full"),
            Error::AttributeNotFound => write!(f, "Attribute Not Found"),
            Error::AttributeNotLong => write!(f, "Attribute Not Long"),
            Error::InsufficientEncryptionKeySize => write!(f, "Insufficient Encryption Key Size"),
            Error::InvalidAttributeValueLength => write!(f, "Invalid Attribute Value Length"),
            Error::UnlikelyError => write!(f, "Unlikely Error"),
            Error::InsufficientEncryption => write!(f, "Insufficient Encryption"),
            Error::UnsupportedGroupType => write!(f, "Unsupported Group Type"),
            Error::InsufficientResources => write!(f, "Insufficient Resources"),
            Error::Other(val) => write!(f, "Error code {:#04x}", val),
        }
    }
}

/// An Error Response PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorResponse {
    /// The opcode of the request that failed
    pub request_opcode: u8,
    pub handle: u16,
    pub error: Error,
}

impl ErrorResponse {
    pub fn try_from_pdu(pdu: &[u8]) -> Result<Self, super::Error> {
        let params = expect(pdu, ServerPduName::ErrorResponse, "Error Response")?;

        if params.len() != 4 {
            return Err(super::Error::BadSize {
                name: "Error Response",
                len: pdu.len(),
            });
        }

        Ok(ErrorResponse {
            request_opcode: params[0],
            handle: u16::from_le_bytes([params[1], params[2]]),
            error: Error::from_raw(params[3]),
        })
    }

    pub fn to_pdu(&self) -> Vec<u8> {
        error_response(self.request_opcode, self.handle, self.error)
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} for request {:#04x} on handle {:#06x}",
            self.error, self.request_opcode, self.handle
        )
    }
}

/// Check the opcode of a PDU, returning the parameters
///
/// An error response in place of the expected PDU is returned as an error.
fn expect<'a>(pdu: &'a [u8], name: ServerPduName, readable: &'static str) -> Result<&'a [u8], super::Error> {
    let (opcode, params) = pdu.split_first().ok_or(super::Error::Empty)?;

    if *opcode == u8::from(name) {
        Ok(params)
    } else if *opcode == u8::from(ServerPduName::ErrorResponse) {
        Err(ErrorResponse::try_from_pdu(pdu)?.into())
    } else {
        log::trace!("expected a {}, received opcode {:#04x}", readable, opcode);

        Err(super::Error::UnexpectedPdu(*opcode))
    }
}

fn le_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

fn handle_range_pdu(name: ClientPduName, start: u16, end: u16, extra: &[u8]) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(5 + extra.len());

    pdu.push(name.into());
    pdu.extend_from_slice(&start.to_le_bytes());
    pdu.extend_from_slice(&end.to_le_bytes());
    pdu.extend_from_slice(extra);

    pdu
}

fn handle_pdu(name: ClientPduName, handle: u16, extra: &[u8]) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(3 + extra.len());

    pdu.push(name.into());
    pdu.extend_from_slice(&handle.to_le_bytes());
    pdu.extend_from_slice(extra);

    pdu
}

pub fn exchange_mtu_request(mtu: u16) -> Vec<u8> {
    let mut pdu = vec![ClientPduName::ExchangeMtuRequest.into()];

    pdu.extend_from_slice(&mtu.to_le_bytes());

    pdu
}

pub fn find_information_request(start: u16, end: u16) -> Vec<u8> {
    handle_range_pdu(ClientPduName::FindInformationRequest, start, end, &[])
}

/// A find by type value request for a 16 bit attribute type
pub fn find_by_type_value_request(start: u16, end: u16, attribute_type: u16, value: &[u8]) -> Vec<u8> {
    let mut extra = attribute_type.to_le_bytes().to_vec();

    extra.extend_from_slice(value);

    handle_range_pdu(ClientPduName::FindByTypeValueRequest, start, end, &extra)
}

pub fn read_by_type_request(start: u16, end: u16, attribute_type: Uuid) -> Vec<u8> {
    handle_range_pdu(ClientPduName::ReadByTypeRequest, start, end, &attribute_type.to_le_bytes())
}

pub fn read_by_group_type_request(start: u16, end: u16, group_type: Uuid) -> Vec<u8> {
    handle_range_pdu(ClientPduName::ReadByGroupTypeRequest, start, end, &group_type.to_le_bytes())
}

pub fn read_request(handle: u16) -> Vec<u8> {
    handle_pdu(ClientPduName::ReadRequest, handle, &[])
}

pub fn read_blob_request(handle: u16, offset: u16) -> Vec<u8> {
    handle_pdu(ClientPduName::ReadBlobRequest, handle, &offset.to_le_bytes())
}

pub fn write_request(handle: u16, value: &[u8]) -> Vec<u8> {
    handle_pdu(ClientPduName::WriteRequest, handle, value)
}

pub fn write_command(handle: u16, value: &[u8]) -> Vec<u8> {
    handle_pdu(ClientPduName::WriteCommand, handle, value)
}

pub fn handle_value_confirmation() -> Vec<u8> {
    vec![ClientPduName::HandleValueConfirmation.into()]
}

pub fn error_response(request_opcode: u8, handle: u16, error: Error) -> Vec<u8> {
    let mut pdu = vec![ServerPduName::ErrorResponse.into(), request_opcode];

    pdu.extend_from_slice(&handle.to_le_bytes());

    pdu.push(error.get_raw());

    pdu
}

/// The server's MTU from an Exchange MTU Response
pub fn exchange_mtu_response(pdu: &[u8]) -> Result<u16, super::Error> {
    match expect(pdu, ServerPduName::ExchangeMTUResponse, "Exchange MTU Response")? {
        [a, b] => Ok(u16::from_le_bytes([*a, *b])),
        _ => Err(super::Error::BadSize {
            name: "Exchange MTU Response",
            len: pdu.len(),
        }),
    }
}

/// An attribute group of a Read By Group Type Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub handle: u16,
    pub end_group_handle: u16,
    pub value: Vec<u8>,
}

/// An attribute of a Read By Type Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValueRecord {
    pub handle: u16,
    pub value: Vec<u8>,
}

/// Split the length prefixed list of records of a response
///
/// A trailing partial record is ignored.
fn records<'a>(params: &'a [u8], min: usize, name: &'static str) -> Result<impl Iterator<Item = &'a [u8]>, super::Error> {
    let (len, list) = params.split_first().ok_or(super::Error::BadSize { name, len: 1 })?;

    let len = *len as usize;

    if len < min {
        return Err(super::Error::BadSize {
            name,
            len: params.len() + 1,
        });
    }

    Ok(list.chunks_exact(len))
}

pub fn read_by_group_type_response(pdu: &[u8]) -> Result<Vec<GroupRecord>, super::Error> {
    const NAME: &str = "Read By Group Type Response";

    let params = expect(pdu, ServerPduName::ReadByGroupTypeResponse, NAME)?;

    Ok(records(params, 4, NAME)?
        .map(|record| GroupRecord {
            handle: le_u16(record),
            end_group_handle: le_u16(&record[2..]),
            value: record[4..].to_vec(),
        })
        .collect())
}

pub fn read_by_type_response(pdu: &[u8]) -> Result<Vec<HandleValueRecord>, super::Error> {
    const NAME: &str = "Read By Type Response";

    let params = expect(pdu, ServerPduName::ReadByTypeResponse, NAME)?;

    Ok(records(params, 2, NAME)?
        .map(|record| HandleValueRecord {
            handle: le_u16(record),
            value: record[2..].to_vec(),
        })
        .collect())
}

/// The handles and types of a Find Information Response
pub fn find_information_response(pdu: &[u8]) -> Result<Vec<(u16, Uuid)>, super::Error> {
    const NAME: &str = "Find Information Response";

    let params = expect(pdu, ServerPduName::FindInformationResponse, NAME)?;

    let record_len = match params.first() {
        Some(1) => 4,
        Some(2) => 18,
        _ => return Err(super::Error::BadSize { name: NAME, len: pdu.len() }),
    };

    Ok(params[1..]
        .chunks_exact(record_len)
        .filter_map(|record| Uuid::from_le_slice(&record[2..]).map(|uuid| (le_u16(record), uuid)))
        .collect())
}

/// The found handle ranges of a Find By Type Value Response
pub fn find_by_type_value_response(pdu: &[u8]) -> Result<Vec<(u16, u16)>, super::Error> {
    let params = expect(pdu, ServerPduName::FindByTypeValueResponse, "Find By Type Value Response")?;

    Ok(params
        .chunks_exact(4)
        .map(|range| (le_u16(range), le_u16(&range[2..])))
        .collect())
}

/// The value of a Read Response or a Read Blob Response
pub fn read_response(pdu: &[u8], blob: bool) -> Result<&[u8], super::Error> {
    if blob {
        expect(pdu, ServerPduName::ReadBlobResponse, "Read Blob Response")
    } else {
        expect(pdu, ServerPduName::ReadResponse, "Read Response")
    }
}

pub fn write_response(pdu: &[u8]) -> Result<(), super::Error> {
    expect(pdu, ServerPduName::WriteResponse, "Write Response").map(|_| ())
}

/// The handle and value of a notification or an indication
pub fn handle_value(pdu: &[u8]) -> Option<(u16, &[u8])> {
    match pdu {
        [_, a, b, value @ ..] => Some((u16::from_le_bytes([*a, *b]), value)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        for raw in 0..=u8::MAX {
            assert_eq!(raw, Error::from_raw(raw).get_raw());
        }

        assert!(Error::from_raw(0x05).requires_encryption());
        assert!(Error::from_raw(0x08).requires_encryption());
        assert!(Error::from_raw(0x0f).requires_encryption());
        assert!(!Error::from_raw(0x0c).requires_encryption());
        assert!(!Error::from_raw(0x0a).requires_encryption());
    }

    #[test]
    fn requests() {
        assert_eq!(vec![0x02, 0x00, 0x01], exchange_mtu_request(256));

        assert_eq!(
            vec![0x10, 0x01, 0x00, 0xff, 0xff, 0x00, 0x28],
            read_by_group_type_request(0x0001, 0xffff, Uuid::Short(0x2800))
        );

        assert_eq!(
            vec![0x06, 0x01, 0x00, 0xff, 0xff, 0x00, 0x28, 0x0d, 0x18],
            find_by_type_value_request(0x0001, 0xffff, 0x2800, &[0x0d, 0x18])
        );

        assert_eq!(vec![0x0c, 0x03, 0x00, 0x16, 0x00], read_blob_request(3, 22));

        assert_eq!(vec![0x52, 0x03, 0x00, 0xaa], write_command(3, &[0xaa]));

        assert_eq!(vec![0x01, 0x10, 0x00, 0x00, 0x06], error_response(0x10, 0, Error::RequestNotSupported));
    }

    #[test]
    fn group_records() {
        let pdu = [0x11, 0x06, 0x01, 0x00, 0x05, 0x00, 0x00, 0x18, 0x06, 0x00, 0x09, 0x00, 0x01, 0x18];

        let groups = read_by_group_type_response(&pdu).unwrap();

        assert_eq!(
            vec![
                GroupRecord {
                    handle: 1,
                    end_group_handle: 5,
                    value: vec![0x00, 0x18]
                },
                GroupRecord {
                    handle: 6,
                    end_group_handle: 9,
                    value: vec![0x01, 0x18]
                },
            ],
            groups
        );
    }

    #[test]
    fn find_information_formats() {
        let short = [0x05, 0x01, 0x04, 0x00, 0x02, 0x29];

        assert_eq!(vec![(4, Uuid::Short(0x2902))], find_information_response(&short).unwrap());

        let mut long = vec![0x05, 0x02, 0x09, 0x00];

        long.extend_from_slice(&0x1234u128.to_le_bytes());

        assert_eq!(vec![(9, Uuid::Long(0x1234))], find_information_response(&long).unwrap());
    }

    #[test]
    fn error_in_place_of_response() {
        let pdu = [0x01, 0x08, 0x03, 0x00, 0x0a];

        match read_by_type_response(&pdu) {
            Err(super::super::Error::Pdu(response)) => {
                assert_eq!(0x08, response.request_opcode);
                assert_eq!(3, response.handle);
                assert_eq!(Error::AttributeNotFound, response.error);
            }
            other => panic!("unexpected result {:?}", other),
        }

        assert_eq!(
            Err(super::super::Error::UnexpectedPdu(0x0b)),
            read_response(&[0x0b, 0x01], true)
        );
    }

    #[test]
    fn notification_value() {
        assert_eq!(Some((0x0e, &[1u8, 2][..])), handle_value(&[0x1b, 0x0e, 0x00, 1, 2]));

        assert_eq!(None, handle_value(&[0x1b, 0x0e]));
    }
}
