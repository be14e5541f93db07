//! Controller status codes
//!
//! Every command complete, command status, and most events carry a status code. The table here
//! maps the codes to the names given to them by the Bluetooth Specification (Vol 2, Part D).

use std::fmt;

macro_rules! status_codes {
    ( $( $code:literal => $name:ident, $text:literal; )* ) => {

        /// A controller status (error) code
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Status {
            Success,
            $( $name, )*
            Unknown(u8),
        }

        impl From<u8> for Status {
            fn from(raw: u8) -> Self {
                match raw {
                    0x00 => Status::Success,
                    $( $code => Status::$name, )*
                    _ => Status::Unknown(raw),
                }
            }
        }

        impl From<Status> for u8 {
            fn from(status: Status) -> Self {
                match status {
                    Status::Success => 0x00,
                    $( Status::$name => $code, )*
                    Status::Unknown(raw) => raw,
                }
            }
        }

        impl fmt::Display for Status {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                match *self {
                    Status::Success => f.write_str("Success"),
                    $( Status::$name => f.write_str($text), )*
                    Status::Unknown(raw) => write!(f, "Unknown ({})", raw),
                }
            }
        }
    };
}

status_codes! {
    0x01 => UnknownHciCommand, "Unknown HCI Command";
    0x02 => UnknownConnectionIdentifier, "Unknown Connection Identifier";
    0x03 => HardwareFailure, "Hardware Failure";
    0x04 => PageTimeout, "Page Timeout";
    0x05 => AuthenticationFailure, "Authentication Failure";
    0x06 => PinOrKeyMissing, "PIN or Key Missing";
    0x07 => MemoryCapacityExceeded, "Memory Capacity Exceeded";
    0x08 => ConnectionTimeout, "Connection Timeout";
    0x09 => ConnectionLimitExceeded, "Connection Limit Exceeded";
    0x0a => SynchronousConnectionLimitExceeded, "Synchronous Connection Limit to a Device Exceeded";
    0x0b => AclConnectionAlreadyExists, "ACL Connection Already Exists";
    0x0c => CommandDisallowed, "Command Disallowed";
    0x0d => RejectedLimitedResources, "Connection Rejected due to Limited Resources";
    0x0e => RejectedSecurityReasons, "Connection Rejected due to Security Reasons";
    0x0f => RejectedUnacceptableBdAddr, "Connection Rejected due to Unacceptable BD_ADDR";
    0x10 => ConnectionAcceptTimeoutExceeded, "Connection Accept Timeout Exceeded";
    0x11 => UnsupportedFeatureOrParameterValue, "Unsupported Feature or Parameter Value";
    0x12 => InvalidHciCommandParameters, "Invalid HCI Command Parameters";
    0x13 => RemoteUserTerminatedConnection, "Remote User Terminated Connection";
    0x14 => RemoteDeviceTerminatedLowResources, "Remote Device Terminated due to Low Resources";
    0x15 => RemoteDeviceTerminatedPowerOff, "Remote Device Terminated due to Power Off";
    0x16 => ConnectionTerminatedByLocalHost, "Connection Terminated By Local Host";
    0x17 => RepeatedAttempts, "Repeated Attempts";
    0x18 => PairingNotAllowed, "Pairing Not Allowed";
    0x19 => UnknownLmpPdu, "Unknown LMP PDU";
    0x1a => UnsupportedRemoteFeature, "Unsupported Remote Feature / Unsupported LMP Feature";
    0x1b => ScoOffsetRejected, "SCO Offset Rejected";
    0x1c => ScoIntervalRejected, "SCO Interval Rejected";
    0x1d => ScoAirModeRejected, "SCO Air Mode Rejected";
    0x1e => InvalidLlParameters, "Invalid LMP Parameters / Invalid LL Parameters";
    0x1f => UnspecifiedError, "Unspecified Error";
    0x20 => UnsupportedLlParameterValue, "Unsupported LMP Parameter Value / Unsupported LL Parameter Value";
    0x21 => RoleChangeNotAllowed, "Role Change Not Allowed";
    0x22 => LlResponseTimeout, "LMP Response Timeout / LL Response Timeout";
    0x23 => LmpErrorTransactionCollision, "LMP Error Transaction Collision";
    0x24 => LmpPduNotAllowed, "LMP PDU Not Allowed";
    0x25 => EncryptionModeNotAcceptable, "Encryption Mode Not Acceptable";
    0x26 => LinkKeyCannotBeChanged, "Link Key cannot be Changed";
    0x27 => RequestedQosNotSupported, "Requested QoS Not Supported";
    0x28 => InstantPassed, "Instant Passed";
    0x29 => PairingWithUnitKeyNotSupported, "Pairing With Unit Key Not Supported";
    0x2a => DifferentTransactionCollision, "Different Transaction Collision";
    0x2c => QosUnacceptableParameter, "QoS Unacceptable Parameter";
    0x2d => QosRejected, "QoS Rejected";
    0x2e => ChannelAssessmentNotSupported, "Channel Assessment Not Supported";
    0x2f => InsufficientSecurity, "Insufficient Security";
    0x30 => ParameterOutOfMandatoryRange, "Parameter Out Of Mandatory Range";
    0x32 => RoleSwitchPending, "Role Switch Pending";
    0x34 => ReservedSlotViolation, "Reserved Slot Violation";
    0x35 => RoleSwitchFailed, "Role Switch Failed";
    0x36 => ExtendedInquiryResponseTooLarge, "Extended Inquiry Response Too Large";
    0x37 => SimplePairingNotSupportedByHost, "Secure Simple Pairing Not Supported By Host";
    0x38 => HostBusyPairing, "Host Busy - Pairing";
    0x39 => NoSuitableChannelFound, "Connection Rejected due to No Suitable Channel Found";
    0x3a => ControllerBusy, "Controller Busy";
    0x3b => UnacceptableConnectionInterval, "Unacceptable Connection Interval";
    0x3c => DirectedAdvertisingTimeout, "Directed Advertising Timeout";
    0x3d => MicFailure, "Connection Terminated due to MIC Failure";
    0x3e => ConnectionFailedToBeEstablished, "Connection Failed to be Established";
    0x3f => MacConnectionFailed, "MAC Connection Failed";
    0x40 => CoarseClockAdjustmentRejected, "Coarse Clock Adjustment Rejected but Will Try to Adjust Using Clock Dragging";
}

impl Status {
    pub fn is_success(&self) -> bool {
        *self == Status::Success
    }

    /// Convert into a `Result`, the error being the non-success status
    pub fn ok(self) -> Result<(), Status> {
        if self.is_success() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl std::error::Error for Status {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes() {
        assert_eq!(Status::CommandDisallowed, Status::from(0x0c));

        assert_eq!("Remote User Terminated Connection", Status::from(0x13).to_string());

        assert_eq!(0x3e, u8::from(Status::ConnectionFailedToBeEstablished));

        assert!(Status::from(0).is_success());
    }

    #[test]
    fn unmapped_codes() {
        assert_eq!(Status::Unknown(0x2b), Status::from(0x2b));

        assert_eq!("Unknown (200)", Status::from(200).to_string());

        assert_eq!(0x2b, u8::from(Status::Unknown(0x2b)));
    }
}
