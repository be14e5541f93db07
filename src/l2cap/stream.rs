use super::ChannelIdentifier;
use crate::{AddressType, BluetoothDeviceAddress};
use std::collections::VecDeque;

/// Output of an [`AclStream`] to be sent to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutput {
    /// A PDU for a channel
    Data {
        channel_id: ChannelIdentifier,
        payload: Vec<u8>,
    },
    /// Start encryption of the link with a key
    StartEncryption {
        random: [u8; 8],
        diversifier: [u8; 2],
        key: [u8; 16],
    },
}

/// The data stream of a connection
///
/// The protocols of a connection do not have access to the transport, they write to the stream
/// and the owner of the stream flushes it to the controller. The stream also carries the signals
/// between the protocols, a request to encrypt the link from the Attribute Protocol is picked up
/// by the Security Manager.
pub struct AclStream {
    handle: u16,
    local_address_type: AddressType,
    local_address: BluetoothDeviceAddress,
    remote_address_type: AddressType,
    remote_address: BluetoothDeviceAddress,
    encrypted: bool,
    encrypt_requested: bool,
    ended: bool,
    outbound: VecDeque<StreamOutput>,
}

impl AclStream {
    pub fn new(
        handle: u16,
        local_address_type: AddressType,
        local_address: BluetoothDeviceAddress,
        remote_address_type: AddressType,
        remote_address: BluetoothDeviceAddress,
    ) -> Self {
        AclStream {
            handle,
            local_address_type,
            local_address,
            remote_address_type,
            remote_address,
            encrypted: false,
            encrypt_requested: false,
            ended: false,
            outbound: VecDeque::new(),
        }
    }

    pub fn handle(&self) -> u16 {
        self.handle
    }

    pub fn local_address(&self) -> (AddressType, BluetoothDeviceAddress) {
        (self.local_address_type, self.local_address)
    }

    pub fn remote_address(&self) -> (AddressType, BluetoothDeviceAddress) {
        (self.remote_address_type, self.remote_address)
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Write a PDU to a channel
    pub fn write(&mut self, channel_id: ChannelIdentifier, payload: Vec<u8>) {
        if self.ended {
            log::debug!("write to ended stream of handle {:#06x} dropped", self.handle);
        } else {
            self.outbound.push_back(StreamOutput::Data { channel_id, payload })
        }
    }

    /// Request that the link be encrypted
    ///
    /// This starts pairing through the Security Manager.
    pub fn encrypt(&mut self) {
        if !self.ended {
            self.encrypt_requested = true;
        }
    }

    /// Take a pending request to encrypt the link
    pub fn take_encrypt_request(&mut self) -> bool {
        std::mem::take(&mut self.encrypt_requested)
    }

    /// Start encryption of the link with a key
    pub fn start_encryption(&mut self, random: [u8; 8], diversifier: [u8; 2], key: [u8; 16]) {
        if !self.ended {
            self.outbound.push_back(StreamOutput::StartEncryption {
                random,
                diversifier,
                key,
            })
        }
    }

    /// Record a change of the encryption of the link
    pub fn push_encrypt(&mut self, enabled: bool) {
        self.encrypted = enabled;
    }

    /// End the stream, everything not yet flushed is dropped
    pub fn end(&mut self) {
        self.ended = true;
        self.encrypt_requested = false;
        self.outbound.clear();
    }

    /// Take the output that is to be flushed to the controller
    pub fn take_outbound(&mut self) -> VecDeque<StreamOutput> {
        std::mem::take(&mut self.outbound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> AclStream {
        AclStream::new(
            0x40,
            AddressType::Public,
            BluetoothDeviceAddress([1; 6]),
            AddressType::Random,
            BluetoothDeviceAddress([2; 6]),
        )
    }

    #[test]
    fn output_is_in_order() {
        let mut stream = stream();

        stream.write(ChannelIdentifier::AttributeProtocol, vec![0x02, 0x00, 0x01]);
        stream.start_encryption([0; 8], [0; 2], [3; 16]);
        stream.write(ChannelIdentifier::SecurityManagerProtocol, vec![0x05, 0x08]);

        let outbound: Vec<_> = stream.take_outbound().into_iter().collect();

        assert_eq!(3, outbound.len());

        assert!(matches!(outbound[1], StreamOutput::StartEncryption { key, .. } if key == [3; 16]));

        assert!(stream.take_outbound().is_empty());
    }

    #[test]
    fn ended_stream_drops_everything() {
        let mut stream = stream();

        stream.write(ChannelIdentifier::AttributeProtocol, vec![0x0a, 0x03, 0x00]);
        stream.encrypt();
        stream.end();

        assert!(stream.take_outbound().is_empty());
        assert!(!stream.take_encrypt_request());

        stream.write(ChannelIdentifier::AttributeProtocol, vec![0x0a, 0x03, 0x00]);

        assert!(stream.take_outbound().is_empty());
    }

    #[test]
    fn encrypt_request_is_taken_once() {
        let mut stream = stream();

        stream.encrypt();

        assert!(stream.take_encrypt_request());
        assert!(!stream.take_encrypt_request());
    }
}
