//! HCI ACL data packets
//!
//! Outbound L2CAP PDUs are always sent as a single fragment. Inbound packets may be fragmented
//! by the controller, the [`Reassembler`] puts the fragments back together per connection
//! handle.

use super::HciPacketType;
use std::collections::HashMap;
use std::fmt;

/// The size of the HCI ACL header (handle with flags and the data total length)
const ACL_HEADER_LEN: usize = 4;

/// The size of the basic L2CAP header (PDU length and channel identifier)
const L2CAP_HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclPacketBoundary {
    FirstNonFlushable,
    ContinuingFragment,
    FirstAutoFlushable,
    CompleteL2capPdu,
}

impl AclPacketBoundary {
    /// Get the value shifted into the correct place of the Packet Boundary Flag in the HCI ACL
    /// data packet. The returned value is in host byte order.
    fn get_shifted_val(&self) -> u16 {
        (match self {
            AclPacketBoundary::FirstNonFlushable => 0x0,
            AclPacketBoundary::ContinuingFragment => 0x1,
            AclPacketBoundary::FirstAutoFlushable => 0x2,
            AclPacketBoundary::CompleteL2capPdu => 0x3,
        }) << 12
    }

    /// Get the `AclPacketBoundary` from the first 16 bits of a HCI ACL data packet. The input
    /// `val` does not need to be masked to only include the Packet Boundary Flag, however it does
    /// need to be in host byte order.
    fn from_shifted_val(val: u16) -> Self {
        match (val >> 12) & 3 {
            0x0 => AclPacketBoundary::FirstNonFlushable,
            0x1 => AclPacketBoundary::ContinuingFragment,
            0x2 => AclPacketBoundary::FirstAutoFlushable,
            _ => AclPacketBoundary::CompleteL2capPdu,
        }
    }

    fn is_start(&self) -> bool {
        matches!(
            self,
            AclPacketBoundary::FirstNonFlushable | AclPacketBoundary::FirstAutoFlushable
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AclError {
    /// The packet is shorter than its headers
    TooShort { expected: usize, len: usize },
    /// More data arrived for a handle than its L2CAP header declared
    Overflow { handle: u16, expected: usize, received: usize },
}

impl fmt::Display for AclError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            AclError::TooShort { expected, len } => {
                write!(f, "ACL packet of {} bytes is shorter than the {} bytes expected", len, expected)
            }
            AclError::Overflow {
                handle,
                expected,
                received,
            } => write!(
                f,
                "received {} bytes for handle {:#06x} but the L2CAP PDU is only {} bytes",
                received, handle, expected
            ),
        }
    }
}

impl std::error::Error for AclError {}

/// A complete L2CAP basic frame received over a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclData {
    pub handle: u16,
    pub channel_id: u16,
    pub payload: Vec<u8>,
}

/// Build an HCI ACL packet containing an entire L2CAP basic frame
///
/// The packet boundary is 'first non-flushable' and the packet includes the packet indicator.
pub fn build_acl_packet(handle: u16, channel_id: u16, payload: &[u8]) -> Vec<u8> {
    let handle_and_flags = (handle & 0x0fff) | AclPacketBoundary::FirstNonFlushable.get_shifted_val();

    let mut packet = Vec::with_capacity(1 + ACL_HEADER_LEN + L2CAP_HEADER_LEN + payload.len());

    packet.push(HciPacketType::AclData.val());
    packet.extend_from_slice(&handle_and_flags.to_le_bytes());
    packet.extend_from_slice(&((payload.len() + L2CAP_HEADER_LEN) as u16).to_le_bytes());
    packet.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    packet.extend_from_slice(&channel_id.to_le_bytes());
    packet.extend_from_slice(payload);

    packet
}

struct PartialPdu {
    channel_id: u16,
    expected: usize,
    data: Vec<u8>,
}

/// Per connection handle reassembly of fragmented L2CAP PDUs
#[derive(Default)]
pub struct Reassembler {
    buffers: HashMap<u16, PartialPdu>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process an ACL data packet
    ///
    /// The input is the packet without the packet indicator. A complete PDU is returned once the
    /// last fragment of it is received.
    pub fn process(&mut self, packet: &[u8]) -> Result<Option<AclData>, AclError> {
        if packet.len() < ACL_HEADER_LEN {
            return Err(AclError::TooShort {
                expected: ACL_HEADER_LEN,
                len: packet.len(),
            });
        }

        let first = u16::from_le_bytes([packet[0], packet[1]]);

        let handle = first & 0x0fff;

        let boundary = AclPacketBoundary::from_shifted_val(first);

        let data_len = u16::from_le_bytes([packet[2], packet[3]]) as usize;

        let fragment = packet
            .get(ACL_HEADER_LEN..ACL_HEADER_LEN + data_len)
            .unwrap_or(&packet[ACL_HEADER_LEN..]);

        if boundary.is_start() {
            self.start_fragment(handle, fragment)
        } else if boundary == AclPacketBoundary::ContinuingFragment {
            self.continuing_fragment(handle, fragment)
        } else {
            log::debug!("ignoring ACL packet with boundary {:?} for handle {:#06x}", boundary, handle);

            Ok(None)
        }
    }

    fn start_fragment(&mut self, handle: u16, fragment: &[u8]) -> Result<Option<AclData>, AclError> {
        if fragment.len() < L2CAP_HEADER_LEN {
            return Err(AclError::TooShort {
                expected: ACL_HEADER_LEN + L2CAP_HEADER_LEN,
                len: ACL_HEADER_LEN + fragment.len(),
            });
        }

        let expected = u16::from_le_bytes([fragment[0], fragment[1]]) as usize;

        let channel_id = u16::from_le_bytes([fragment[2], fragment[3]]);

        let data = fragment[L2CAP_HEADER_LEN..].to_vec();

        if self.buffers.remove(&handle).is_some() {
            log::warn!("new L2CAP PDU started before the previous one completed on handle {:#06x}", handle);
        }

        let partial = PartialPdu {
            channel_id,
            expected,
            data,
        };

        self.complete_or_store(handle, partial)
    }

    fn continuing_fragment(&mut self, handle: u16, fragment: &[u8]) -> Result<Option<AclData>, AclError> {
        match self.buffers.remove(&handle) {
            Some(mut partial) => {
                partial.data.extend_from_slice(fragment);

                self.complete_or_store(handle, partial)
            }
            None => {
                log::debug!("dropping continuing fragment for handle {:#06x} without a start", handle);

                Ok(None)
            }
        }
    }

    fn complete_or_store(&mut self, handle: u16, partial: PartialPdu) -> Result<Option<AclData>, AclError> {
        use std::cmp::Ordering;

        match partial.data.len().cmp(&partial.expected) {
            Ordering::Equal => Ok(Some(AclData {
                handle,
                channel_id: partial.channel_id,
                payload: partial.data,
            })),
            Ordering::Less => {
                self.buffers.insert(handle, partial);

                Ok(None)
            }
            Ordering::Greater => Err(AclError::Overflow {
                handle,
                expected: partial.expected,
                received: partial.data.len(),
            }),
        }
    }

    /// Check if a PDU is partially received for `handle`
    pub fn is_pending(&self, handle: u16) -> bool {
        self.buffers.contains_key(&handle)
    }

    /// Drop any partially received PDU for `handle`
    pub fn clear(&mut self, handle: u16) {
        self.buffers.remove(&handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn fragment(handle: u16, boundary: AclPacketBoundary, data: &[u8]) -> Vec<u8> {
        let mut packet = ((handle & 0xfff) | boundary.get_shifted_val()).to_le_bytes().to_vec();

        packet.extend_from_slice(&(data.len() as u16).to_le_bytes());

        packet.extend_from_slice(data);

        packet
    }

    fn split_pdu(handle: u16, channel_id: u16, payload: &[u8], fragment_size: usize) -> Vec<Vec<u8>> {
        let mut pdu = (payload.len() as u16).to_le_bytes().to_vec();

        pdu.extend_from_slice(&channel_id.to_le_bytes());

        pdu.extend_from_slice(payload);

        pdu.chunks(fragment_size)
            .enumerate()
            .map(|(i, chunk)| {
                let boundary = if i == 0 {
                    AclPacketBoundary::FirstAutoFlushable
                } else {
                    AclPacketBoundary::ContinuingFragment
                };

                fragment(handle, boundary, chunk)
            })
            .collect()
    }

    #[test]
    fn single_fragment_is_emitted_immediately() {
        let mut reassembler = Reassembler::new();

        let packet = build_acl_packet(0x40, 0x0004, &[0x0a, 0x03, 0x00]);

        let data = reassembler.process(&packet[1..]).unwrap().unwrap();

        assert_eq!(0x40, data.handle);

        assert_eq!(0x0004, data.channel_id);

        assert_eq!(vec![0x0a, 0x03, 0x00], data.payload);

        assert!(!reassembler.is_pending(0x40));
    }

    #[test]
    fn fragmented_payload_reassembles() {
        let mut rng = rand::thread_rng();

        let mut reassembler = Reassembler::new();

        let payload: Vec<u8> = (0..300).map(|_| rng.gen()).collect();

        let fragments = split_pdu(0x41, 0x0004, &payload, 27);

        let last = fragments.len() - 1;

        assert!(last > 1);

        for (i, packet) in fragments.iter().enumerate() {
            let result = reassembler.process(packet).unwrap();

            if i == last {
                let data = result.unwrap();

                assert_eq!(payload, data.payload);

                assert_eq!(0x0004, data.channel_id);
            } else {
                assert!(result.is_none());

                assert!(reassembler.is_pending(0x41));
            }
        }

        assert!(!reassembler.is_pending(0x41));
    }

    #[test]
    fn fragments_are_kept_per_handle() {
        let mut reassembler = Reassembler::new();

        let first = split_pdu(0x01, 0x0004, &[1; 40], 20);
        let second = split_pdu(0x02, 0x0006, &[2; 30], 20);

        assert!(reassembler.process(&first[0]).unwrap().is_none());
        assert!(reassembler.process(&second[0]).unwrap().is_none());
        assert!(reassembler.process(&first[1]).unwrap().is_none());

        let done = reassembler.process(&second[1]).unwrap().unwrap();

        assert_eq!((0x02, 0x0006, vec![2; 30]), (done.handle, done.channel_id, done.payload));

        let done = reassembler.process(&first[2]).unwrap().unwrap();

        assert_eq!((0x01, vec![1; 40]), (done.handle, done.payload));
    }

    #[test]
    fn continuation_without_start_is_dropped() {
        let mut reassembler = Reassembler::new();

        let packet = fragment(0x40, AclPacketBoundary::ContinuingFragment, &[1, 2, 3]);

        assert_eq!(Ok(None), reassembler.process(&packet));

        assert!(!reassembler.is_pending(0x40));
    }

    #[test]
    fn truncated_packets() {
        let mut reassembler = Reassembler::new();

        assert!(reassembler.process(&[0x40]).is_err());

        let packet = fragment(0x40, AclPacketBoundary::FirstAutoFlushable, &[1, 0]);

        assert!(reassembler.process(&packet).is_err());
    }

    #[test]
    fn overflowing_fragment_is_an_error() {
        let mut reassembler = Reassembler::new();

        let fragments = split_pdu(0x40, 0x0004, &[0; 10], 8);

        reassembler.process(&fragments[0]).unwrap();

        let too_long = fragment(0x40, AclPacketBoundary::ContinuingFragment, &[0; 20]);

        assert!(matches!(reassembler.process(&too_long), Err(AclError::Overflow { .. })));

        assert!(!reassembler.is_pending(0x40));
    }
}
