//! L2CAP protocol
//!
//! Only the fixed channels of an LE-U logical link are used by the host, the Attribute Protocol
//! and the Security Manager Protocol. Each connection has one [`AclStream`] that the protocols
//! write their PDUs to.

mod stream;

pub use stream::{AclStream, StreamOutput};

/// The minimum MTU of an LE-U logical link
pub const LE_MIN_MTU: usize = 23;

/// Channel Identifier
///
/// Channel Identifiers are used by the L2CAP to associate the data with a given channel. Channels
/// are a numeric identifier for a protocol or an association of protocols that are part of L2CAP or
/// a higher layer (such as the Attribute (ATT) protocol).
///
/// # Specification Reference
/// See Bluetooth Specification V5 | Vol 3, Part A Section 2.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelIdentifier {
    AttributeProtocol,
    LowEnergyL2capSignalingChannel,
    SecurityManagerProtocol,
    /// Any other channel, these are not used by the host
    Other(u16),
}

impl ChannelIdentifier {
    /// Convert to the numerical value
    ///
    /// The returned value is in *native byte order*
    pub fn to_val(&self) -> u16 {
        match *self {
            ChannelIdentifier::AttributeProtocol => 0x4,
            ChannelIdentifier::LowEnergyL2capSignalingChannel => 0x5,
            ChannelIdentifier::SecurityManagerProtocol => 0x6,
            ChannelIdentifier::Other(val) => val,
        }
    }

    pub fn from_val(val: u16) -> Self {
        match val {
            0x4 => ChannelIdentifier::AttributeProtocol,
            0x5 => ChannelIdentifier::LowEnergyL2capSignalingChannel,
            0x6 => ChannelIdentifier::SecurityManagerProtocol,
            _ => ChannelIdentifier::Other(val),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_channels() {
        for val in 0..0x10u16 {
            assert_eq!(val, ChannelIdentifier::from_val(val).to_val());
        }

        assert_eq!(ChannelIdentifier::AttributeProtocol, ChannelIdentifier::from_val(4));

        assert_eq!(ChannelIdentifier::SecurityManagerProtocol, ChannelIdentifier::from_val(6));
    }
}
