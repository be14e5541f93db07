//! The Security Manager
//!
//! The security manager pairs two devices with LE legacy pairing. The only association model is
//! *just works*, neither side has input or output capabilities and out of band data is never
//! present, so the temporary key is always zero.
//!
//! A [`SecurityManager`] is created for each connection. The initiator of pairing is the central
//! of the connection, it starts encryption with the short term key once the confirm values have
//! been checked. The responder hands the short term key to the controller as the reply to the
//! long term key request of the link and, once the link is encrypted, distributes the key to the
//! initiator.

use crate::hci::events::Role;
use crate::l2cap::{self, AclStream};
use crate::BluetoothDeviceAddress;
use keys::LongTermKeyRecord;
use std::collections::VecDeque;
use std::fmt;
use toolbox::{u128_from_le_slice, Toolbox};

pub mod keys;
pub mod toolbox;

pub const L2CAP_CHANNEL_ID: l2cap::ChannelIdentifier = l2cap::ChannelIdentifier::SecurityManagerProtocol;

/// The length of the pairing request and pairing response PDUs
const PAIRING_PDU_LEN: usize = 7;

const ENCRYPTION_KEY_MAX_SIZE: u8 = 16;

/// IO capability: NoInputNoOutput
const NO_INPUT_NO_OUTPUT: u8 = 0x03;

/// OOB data: Authentication data not present
const OOB_NOT_PRESENT: u8 = 0x00;

/// Authentication requirement: Bonding, no MITM
const BONDING_NO_MITM: u8 = 0x01;

/// Key distribution of the encryption key (LTK, EDIV, and Rand)
const ENC_KEY: u8 = 0x01;

/// The temporary key of just works pairing
const TEMPORARY_KEY: u128 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Incorrect Size
    Size { command: CommandType, len: usize },
    /// Incorrect Value
    Value(u8),
    /// An empty PDU
    Empty,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Size { command, len } => write!(f, "incorrect size {} of a {:?} PDU", len, command),
            Error::Value(val) => write!(f, "unknown command code {:#04x}", val),
            Error::Empty => write!(f, "empty security manager PDU"),
        }
    }
}

impl std::error::Error for Error {}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CommandType {
    PairingRequest,
    PairingResponse,
    PairingConfirm,
    PairingRandom,
    PairingFailed,
    EncryptionInformation,
    MasterIdentification,
    IdentityInformation,
    IdentityAddressInformation,
    SigningInformation,
    SecurityRequest,
    PairingPublicKey,
    PairingDHKeyCheck,
    PairingKeyPressNotification,
}

impl CommandType {
    fn into_val(self) -> u8 {
        match self {
            CommandType::PairingRequest => 0x1,
            CommandType::PairingResponse => 0x2,
            CommandType::PairingConfirm => 0x3,
            CommandType::PairingRandom => 0x4,
            CommandType::PairingFailed => 0x5,
            CommandType::EncryptionInformation => 0x6,
            CommandType::MasterIdentification => 0x7,
            CommandType::IdentityInformation => 0x8,
            CommandType::IdentityAddressInformation => 0x9,
            CommandType::SigningInformation => 0xa,
            CommandType::SecurityRequest => 0xb,
            CommandType::PairingPublicKey => 0xc,
            CommandType::PairingDHKeyCheck => 0xd,
            CommandType::PairingKeyPressNotification => 0xe,
        }
    }

    fn try_from_val(val: u8) -> Result<Self, Error> {
        match val {
            0x1 => Ok(CommandType::PairingRequest),
            0x2 => Ok(CommandType::PairingResponse),
            0x3 => Ok(CommandType::PairingConfirm),
            0x4 => Ok(CommandType::PairingRandom),
            0x5 => Ok(CommandType::PairingFailed),
            0x6 => Ok(CommandType::EncryptionInformation),
            0x7 => Ok(CommandType::MasterIdentification),
            0x8 => Ok(CommandType::IdentityInformation),
            0x9 => Ok(CommandType::IdentityAddressInformation),
            0xa => Ok(CommandType::SigningInformation),
            0xb => Ok(CommandType::SecurityRequest),
            0xc => Ok(CommandType::PairingPublicKey),
            0xd => Ok(CommandType::PairingDHKeyCheck),
            0xe => Ok(CommandType::PairingKeyPressNotification),
            _ => Err(Error::Value(val)),
        }
    }

    /// The size of the PDU, including the code
    fn pdu_len(&self) -> Option<usize> {
        match self {
            CommandType::PairingRequest | CommandType::PairingResponse => Some(PAIRING_PDU_LEN),
            CommandType::PairingConfirm | CommandType::PairingRandom => Some(17),
            CommandType::PairingFailed | CommandType::SecurityRequest => Some(2),
            CommandType::EncryptionInformation => Some(17),
            CommandType::MasterIdentification => Some(11),
            _ => None,
        }
    }

    /// Get the command type of a PDU, checking its size
    fn try_from_pdu(pdu: &[u8]) -> Result<Self, Error> {
        let command = Self::try_from_val(*pdu.first().ok_or(Error::Empty)?)?;

        match command.pdu_len() {
            Some(len) if len != pdu.len() => Err(Error::Size {
                command,
                len: pdu.len(),
            }),
            _ => Ok(command),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingFailedReason {
    PasskeyEntryFailed,
    OobNotAvailable,
    AuthenticationRequirements,
    ConfirmValueFailed,
    PairingNotSupported,
    EncryptionKeySize,
    CommandNotSupported,
    UnspecifiedReason,
    RepeatedAttempts,
    InvalidParameters,
    DhKeyCheckFailed,
    NumericComparisonFailed,
    BrEdrPairingInProgress,
    CrossTransportKeyDerivationGenerationNotAllowed,
    Reserved(u8),
}

impl PairingFailedReason {
    fn into_val(self) -> u8 {
        match self {
            PairingFailedReason::PasskeyEntryFailed => 0x1,
            PairingFailedReason::OobNotAvailable => 0x2,
            PairingFailedReason::AuthenticationRequirements => 0x3,
            PairingFailedReason::ConfirmValueFailed => 0x4,
            PairingFailedReason::PairingNotSupported => 0x5,
            PairingFailedReason::EncryptionKeySize => 0x6,
            PairingFailedReason::CommandNotSupported => 0x7,
            PairingFailedReason::UnspecifiedReason => 0x8,
            PairingFailedReason::RepeatedAttempts => 0x9,
            PairingFailedReason::InvalidParameters => 0xa,
            PairingFailedReason::DhKeyCheckFailed => 0xb,
            PairingFailedReason::NumericComparisonFailed => 0xc,
            PairingFailedReason::BrEdrPairingInProgress => 0xd,
            PairingFailedReason::CrossTransportKeyDerivationGenerationNotAllowed => 0xe,
            PairingFailedReason::Reserved(val) => val,
        }
    }

    fn from_val(val: u8) -> Self {
        match val {
            0x1 => PairingFailedReason::PasskeyEntryFailed,
            0x2 => PairingFailedReason::OobNotAvailable,
            0x3 => PairingFailedReason::AuthenticationRequirements,
            0x4 => PairingFailedReason::ConfirmValueFailed,
            0x5 => PairingFailedReason::PairingNotSupported,
            0x6 => PairingFailedReason::EncryptionKeySize,
            0x7 => PairingFailedReason::CommandNotSupported,
            0x8 => PairingFailedReason::UnspecifiedReason,
            0x9 => PairingFailedReason::RepeatedAttempts,
            0xa => PairingFailedReason::InvalidParameters,
            0xb => PairingFailedReason::DhKeyCheckFailed,
            0xc => PairingFailedReason::NumericComparisonFailed,
            0xd => PairingFailedReason::BrEdrPairingInProgress,
            0xe => PairingFailedReason::CrossTransportKeyDerivationGenerationNotAllowed,
            _ => PairingFailedReason::Reserved(val),
        }
    }
}

impl fmt::Display for PairingFailedReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PairingFailedReason::PasskeyEntryFailed => write!(f, "Passkey Entry Failed"),
            PairingFailedReason::OobNotAvailable => write!(f, "OOB Not Available"),
            PairingFailedReason::AuthenticationRequirements => write!(f, "Authentication Requirements"),
            PairingFailedReason::ConfirmValueFailed => write!(f, "Confirm Value Failed"),
            PairingFailedReason::PairingNotSupported => write!(f, "Pairing Not Supported"),
            PairingFailedReason::EncryptionKeySize => write!(f, "Encryption Key Size"),
            PairingFailedReason::CommandNotSupported => write!(f, "Command Not Supported"),
            PairingFailedReason::UnspecifiedReason => write!(f, "Unspecified Reason"),
            PairingFailedReason::RepeatedAttempts => write!(f, "Repeated Attempts"),
            PairingFailedReason::InvalidParameters => write!(f, "Invalid Parameters"),
            PairingFailedReason::DhKeyCheckFailed => write!(f, "DHKey Check Failed"),
            PairingFailedReason::NumericComparisonFailed => write!(f, "Numeric Comparison Failed"),
            PairingFailedReason::BrEdrPairingInProgress => write!(f, "BR/EDR Pairing In Progress"),
            PairingFailedReason::CrossTransportKeyDerivationGenerationNotAllowed => {
                write!(f, "Cross-transport Key Derivation/Generation Not Allowed")
            }
            PairingFailedReason::Reserved(val) => write!(f, "Reserved ({})", val),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    Idle,
    /// The initiator sent the pairing request
    RequestSent,
    /// The pairing request and response are known to both sides
    ResponseExchanged,
    /// Both confirm values are sent
    ConfirmExchanged,
    /// The responder checked the initiator's random and sent its own
    StkDerived,
    /// The initiator started encryption of the link
    EncryptionStarted,
    Paired,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmpEvent {
    /// A short term key was generated
    ///
    /// The record is to be added to the keys of the controller.
    LongTermKey(LongTermKeyRecord),
    /// The peer distributed its long term key
    PeerLongTermKey([u8; 16]),
    /// The peer distributed the EDIV and Rand of its long term key
    PeerMasterIdentification { diversifier: [u8; 2], random: [u8; 8] },
    /// The link is encrypted with the key of pairing
    Paired,
    Fail(PairingFailedReason),
}

/// The values of one pairing attempt
struct PairingSession {
    preq: [u8; PAIRING_PDU_LEN],
    pres: [u8; PAIRING_PDU_LEN],
    temporary_key: u128,
    local_random: u128,
    peer_confirm: u128,
    short_term_key: Option<u128>,
    diversifier: [u8; 2],
    random: [u8; 8],
}

impl PairingSession {
    fn new() -> Self {
        PairingSession {
            preq: [0; PAIRING_PDU_LEN],
            pres: [0; PAIRING_PDU_LEN],
            temporary_key: TEMPORARY_KEY,
            local_random: 0,
            peer_confirm: 0,
            short_term_key: None,
            diversifier: [0; 2],
            random: [0; 8],
        }
    }
}

/// The pairing request of the initiator
fn pairing_request() -> [u8; PAIRING_PDU_LEN] {
    [
        CommandType::PairingRequest.into_val(),
        NO_INPUT_NO_OUTPUT,
        OOB_NOT_PRESENT,
        BONDING_NO_MITM,
        ENCRYPTION_KEY_MAX_SIZE,
        0x00, // initiator key distribution: none
        ENC_KEY,
    ]
}

/// The pairing response of the responder
fn pairing_response() -> [u8; PAIRING_PDU_LEN] {
    [
        CommandType::PairingResponse.into_val(),
        NO_INPUT_NO_OUTPUT,
        OOB_NOT_PRESENT,
        BONDING_NO_MITM,
        ENCRYPTION_KEY_MAX_SIZE,
        0x00, // initiator key distribution: none
        ENC_KEY,
    ]
}

fn address_value(address: &BluetoothDeviceAddress) -> u128 {
    u128_from_le_slice(&address.0)
}

/// The security manager of a connection
pub struct SecurityManager {
    role: Role,
    state: PairingState,
    session: Option<PairingSession>,
    events: VecDeque<SmpEvent>,
}

impl SecurityManager {
    pub fn new(role: Role) -> Self {
        SecurityManager {
            role,
            state: PairingState::Idle,
            session: None,
            events: VecDeque::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    pub fn take_events(&mut self) -> VecDeque<SmpEvent> {
        std::mem::take(&mut self.events)
    }

    /// The short term key of the current pairing
    pub fn short_term_key(&self) -> Option<[u8; 16]> {
        self.session
            .as_ref()
            .and_then(|s| s.short_term_key)
            .map(|key| key.to_le_bytes())
    }

    fn write(&self, stream: &mut AclStream, command: CommandType, data: &[u8]) {
        let mut pdu = Vec::with_capacity(1 + data.len());

        pdu.push(command.into_val());
        pdu.extend_from_slice(data);

        log::trace!("sending {:?}", command);

        stream.write(L2CAP_CHANNEL_ID, pdu)
    }

    /// Start pairing
    ///
    /// The central sends a pairing request, the peripheral asks the central to pair with a
    /// security request.
    pub fn request_pairing(&mut self, stream: &mut AclStream) {
        match self.role {
            Role::Central => {
                let mut session = PairingSession::new();

                session.preq = pairing_request();

                stream.write(L2CAP_CHANNEL_ID, session.preq.to_vec());

                self.session = Some(session);

                self.state = PairingState::RequestSent;
            }
            Role::Peripheral => self.write(stream, CommandType::SecurityRequest, &[BONDING_NO_MITM]),
        }
    }

    /// The initiator and responder address values for the confirm value
    fn confirm_addresses(&self, stream: &AclStream) -> (bool, u128, bool, u128) {
        let (local_type, local_address) = stream.local_address();
        let (remote_type, remote_address) = stream.remote_address();

        let local = (local_type.is_random(), address_value(&local_address));
        let remote = (remote_type.is_random(), address_value(&remote_address));

        let ((iat, ia), (rat, ra)) = match self.role {
            Role::Central => (local, remote),
            Role::Peripheral => (remote, local),
        };

        (iat, ia, rat, ra)
    }

    fn confirm_value<T: Toolbox>(&self, toolbox: &T, stream: &AclStream, session: &PairingSession, random: u128) -> u128 {
        let (iat, ia, rat, ra) = self.confirm_addresses(stream);

        toolbox.c1(
            session.temporary_key,
            random,
            u128_from_le_slice(&session.pres),
            u128_from_le_slice(&session.preq),
            iat,
            ia,
            rat,
            ra,
        )
    }

    /// Process a PDU received on the security manager channel
    pub fn receive<T: Toolbox>(&mut self, stream: &mut AclStream, toolbox: &mut T, data: &[u8]) {
        let command = match CommandType::try_from_pdu(data) {
            Ok(command) => command,
            Err(e) => {
                log::warn!("invalid security manager PDU: {}", e);
                return;
            }
        };

        log::debug!("received {:?}", command);

        match (command, self.role) {
            (CommandType::PairingRequest, Role::Peripheral) => self.on_pairing_request(stream, data),
            (CommandType::PairingResponse, Role::Central) => self.on_pairing_response(stream, toolbox, data),
            (CommandType::PairingConfirm, _) => self.on_pairing_confirm(stream, toolbox, data),
            (CommandType::PairingRandom, _) => self.on_pairing_random(stream, toolbox, data),
            (CommandType::PairingFailed, _) => {
                let reason = PairingFailedReason::from_val(data[1]);

                log::info!("pairing failed by the peer: {}", reason);

                self.session = None;
                self.state = PairingState::Failed;
                self.events.push_back(SmpEvent::Fail(reason))
            }
            (CommandType::EncryptionInformation, _) => {
                let mut key = [0u8; 16];

                key.copy_from_slice(&data[1..]);

                self.events.push_back(SmpEvent::PeerLongTermKey(key))
            }
            (CommandType::MasterIdentification, _) => {
                let mut diversifier = [0u8; 2];
                let mut random = [0u8; 8];

                diversifier.copy_from_slice(&data[1..3]);
                random.copy_from_slice(&data[3..]);

                self.events
                    .push_back(SmpEvent::PeerMasterIdentification { diversifier, random })
            }
            (CommandType::SecurityRequest, Role::Central) => {
                if self.session.is_none() {
                    self.request_pairing(stream)
                }
            }
            (CommandType::PairingPublicKey, _) | (CommandType::PairingDHKeyCheck, _) => {
                self.fail(stream, PairingFailedReason::PairingNotSupported)
            }
            (command, role) => log::debug!("{:?} ignored as {:?}", command, role),
        }
    }

    fn on_pairing_request(&mut self, stream: &mut AclStream, data: &[u8]) {
        let mut session = PairingSession::new();

        session.preq.copy_from_slice(data);
        session.pres = pairing_response();

        stream.write(L2CAP_CHANNEL_ID, session.pres.to_vec());

        self.session = Some(session);

        self.state = PairingState::ResponseExchanged;
    }

    fn on_pairing_response<T: Toolbox>(&mut self, stream: &mut AclStream, toolbox: &mut T, data: &[u8]) {
        if self.state != PairingState::RequestSent {
            log::warn!("unexpected pairing response in state {:?}", self.state);
            return;
        }

        let mut session = match self.session.take() {
            Some(session) => session,
            None => return,
        };

        let random = toolbox.rand();

        session.pres.copy_from_slice(data);
        session.local_random = random;

        let confirm = self.confirm_value(toolbox, stream, &session, random);

        self.write(stream, CommandType::PairingConfirm, &confirm.to_le_bytes());

        self.session = Some(session);

        self.state = PairingState::ResponseExchanged;
    }

    fn on_pairing_confirm<T: Toolbox>(&mut self, stream: &mut AclStream, toolbox: &mut T, data: &[u8]) {
        if self.state != PairingState::ResponseExchanged {
            log::warn!("unexpected pairing confirm in state {:?}", self.state);
            return;
        }

        let peer_confirm = u128_from_le_slice(&data[1..]);

        let random = toolbox.rand();

        let role = self.role;

        let session = match self.session.take() {
            Some(session) => session,
            None => return,
        };

        let session = PairingSession { peer_confirm, ..session };

        match role {
            Role::Central => {
                // the initiator already sent its confirm, its random follows
                self.write(stream, CommandType::PairingRandom, &session.local_random.to_le_bytes());

                self.session = Some(session);
            }
            Role::Peripheral => {
                let session = PairingSession {
                    local_random: random,
                    ..session
                };

                let confirm = self.confirm_value(toolbox, stream, &session, random);

                self.write(stream, CommandType::PairingConfirm, &confirm.to_le_bytes());

                self.session = Some(session);
            }
        }

        self.state = PairingState::ConfirmExchanged;
    }

    fn on_pairing_random<T: Toolbox>(&mut self, stream: &mut AclStream, toolbox: &mut T, data: &[u8]) {
        if self.state != PairingState::ConfirmExchanged {
            log::warn!("unexpected pairing random in state {:?}", self.state);
            return;
        }

        let peer_random = u128_from_le_slice(&data[1..]);

        let mut session = match self.session.take() {
            Some(session) => session,
            None => return,
        };

        let expected = self.confirm_value(toolbox, stream, &session, peer_random);

        if expected != session.peer_confirm {
            log::info!("the confirm value of the peer does not match its random");

            return self.fail(stream, PairingFailedReason::ConfirmValueFailed);
        }

        // STK = s1(TK, Srand, Mrand)
        let short_term_key = match self.role {
            Role::Central => toolbox.s1(session.temporary_key, peer_random, session.local_random),
            Role::Peripheral => toolbox.s1(session.temporary_key, session.local_random, peer_random),
        };

        session.short_term_key = Some(short_term_key);

        let (peer_address_type, peer_address) = stream.remote_address();

        self.events.push_back(SmpEvent::LongTermKey(LongTermKeyRecord {
            peer_address,
            peer_address_type,
            authenticated: false,
            master: false,
            key: short_term_key.to_le_bytes(),
            diversifier: session.diversifier,
            random: session.random,
        }));

        match self.role {
            Role::Central => {
                stream.start_encryption(session.random, session.diversifier, short_term_key.to_le_bytes());

                self.state = PairingState::EncryptionStarted;
            }
            Role::Peripheral => {
                self.write(stream, CommandType::PairingRandom, &session.local_random.to_le_bytes());

                self.state = PairingState::StkDerived;
            }
        }

        self.session = Some(session);
    }

    fn fail(&mut self, stream: &mut AclStream, reason: PairingFailedReason) {
        self.write(stream, CommandType::PairingFailed, &[reason.into_val()]);

        self.session = None;
        self.state = PairingState::Failed;
        self.events.push_back(SmpEvent::Fail(reason))
    }

    /// The encryption of the link changed
    ///
    /// The responder distributes the keys of the pairing once the link is encrypted.
    pub fn on_encrypt_change(&mut self, stream: &mut AclStream, enabled: bool) {
        if !enabled {
            return;
        }

        let session = match self.session.take() {
            Some(session) => session,
            None => return,
        };

        if let (Role::Peripheral, Some(key)) = (self.role, session.short_term_key) {
            self.write(stream, CommandType::EncryptionInformation, &key.to_le_bytes());

            let mut identification = session.diversifier.to_vec();

            identification.extend_from_slice(&session.random);

            self.write(stream, CommandType::MasterIdentification, &identification);
        }

        self.state = PairingState::Paired;
        self.events.push_back(SmpEvent::Paired)
    }

    /// The controller had no key for the long term key request of the link
    pub fn on_ltk_negative_reply(&mut self, stream: &mut AclStream) {
        log::info!("no long term key for the link, pairing failed");

        self.fail(stream, PairingFailedReason::UnspecifiedReason)
    }

    /// The connection ended
    pub fn end(&mut self) {
        self.session = None;
        self.state = PairingState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::toolbox::AesToolbox;
    use super::*;
    use crate::l2cap::{ChannelIdentifier, StreamOutput};
    use crate::AddressType;

    /// A toolbox with a fixed random value
    struct FixedToolbox(u128);

    impl Toolbox for FixedToolbox {
        fn c1(&self, k: u128, r: u128, pres: u128, preq: u128, iat: bool, ia: u128, rat: bool, ra: u128) -> u128 {
            toolbox::c1(k, r, pres, preq, iat, ia, rat, ra)
        }

        fn s1(&self, k: u128, r1: u128, r2: u128) -> u128 {
            toolbox::s1(k, r1, r2)
        }

        fn rand(&mut self) -> u128 {
            self.0
        }
    }

    const CENTRAL_ADDRESS: BluetoothDeviceAddress = BluetoothDeviceAddress([0xa6, 0xa5, 0xa4, 0xa3, 0xa2, 0xa1]);
    const PERIPHERAL_ADDRESS: BluetoothDeviceAddress = BluetoothDeviceAddress([0xb6, 0xb5, 0xb4, 0xb3, 0xb2, 0xb1]);

    fn streams() -> (AclStream, AclStream) {
        let _ = simplelog::TestLogger::init(simplelog::LevelFilter::Trace, simplelog::Config::default());

        let central = AclStream::new(
            0x40,
            AddressType::Random,
            CENTRAL_ADDRESS,
            AddressType::Public,
            PERIPHERAL_ADDRESS,
        );

        let peripheral = AclStream::new(
            0x41,
            AddressType::Public,
            PERIPHERAL_ADDRESS,
            AddressType::Random,
            CENTRAL_ADDRESS,
        );

        (central, peripheral)
    }

    fn smp_pdus(stream: &mut AclStream) -> Vec<Vec<u8>> {
        stream
            .take_outbound()
            .into_iter()
            .filter_map(|output| match output {
                StreamOutput::Data {
                    channel_id: ChannelIdentifier::SecurityManagerProtocol,
                    payload,
                } => Some(payload),
                _ => None,
            })
            .collect()
    }

    /// Forward every PDU written to `from` into the security manager `to`
    fn deliver<T: Toolbox>(from: &mut AclStream, to: &mut SecurityManager, stream: &mut AclStream, toolbox: &mut T) -> usize {
        let pdus = smp_pdus(from);

        for pdu in pdus.iter() {
            to.receive(stream, toolbox, pdu)
        }

        pdus.len()
    }

    #[test]
    fn command_sizes() {
        assert_eq!(Ok(CommandType::PairingConfirm), CommandType::try_from_pdu(&[0x03; 17]));
        assert_eq!(
            Err(Error::Size {
                command: CommandType::PairingRandom,
                len: 3
            }),
            CommandType::try_from_pdu(&[0x04, 0x00, 0x00])
        );
        assert_eq!(Err(Error::Value(0x20)), CommandType::try_from_pdu(&[0x20]));
        assert_eq!(Err(Error::Empty), CommandType::try_from_pdu(&[]));
    }

    #[test]
    fn just_works_pairing() {
        let (mut central_stream, mut peripheral_stream) = streams();

        let mut central = SecurityManager::new(Role::Central);
        let mut peripheral = SecurityManager::new(Role::Peripheral);

        let mut central_toolbox = FixedToolbox(0x5783D52156AD6F0E6388274EC6702EE0);
        let mut peripheral_toolbox = AesToolbox;

        central.request_pairing(&mut central_stream);

        assert_eq!(PairingState::RequestSent, central.state());

        // request, response, confirm, confirm, random, random
        assert_eq!(1, deliver(&mut central_stream, &mut peripheral, &mut peripheral_stream, &mut peripheral_toolbox));
        assert_eq!(1, deliver(&mut peripheral_stream, &mut central, &mut central_stream, &mut central_toolbox));
        assert_eq!(1, deliver(&mut central_stream, &mut peripheral, &mut peripheral_stream, &mut peripheral_toolbox));
        assert_eq!(1, deliver(&mut peripheral_stream, &mut central, &mut central_stream, &mut central_toolbox));
        assert_eq!(1, deliver(&mut central_stream, &mut peripheral, &mut peripheral_stream, &mut peripheral_toolbox));

        assert_eq!(PairingState::StkDerived, peripheral.state());

        let peripheral_stk = peripheral.short_term_key().unwrap();

        assert_eq!(1, deliver(&mut peripheral_stream, &mut central, &mut central_stream, &mut central_toolbox));

        assert_eq!(PairingState::EncryptionStarted, central.state());

        let start = central_stream.take_outbound().pop_front();

        assert_eq!(
            Some(StreamOutput::StartEncryption {
                random: [0; 8],
                diversifier: [0; 2],
                key: peripheral_stk,
            }),
            start
        );

        assert!(matches!(
            peripheral.take_events().pop_front(),
            Some(SmpEvent::LongTermKey(LongTermKeyRecord { peer_address: CENTRAL_ADDRESS, .. }))
        ));

        // the responder distributes its key once the link is encrypted
        central.on_encrypt_change(&mut central_stream, true);
        peripheral.on_encrypt_change(&mut peripheral_stream, true);

        assert!(smp_pdus(&mut central_stream).is_empty());

        let distributed = smp_pdus(&mut peripheral_stream);

        assert_eq!(2, distributed.len());
        assert_eq!(0x06, distributed[0][0]);
        assert_eq!(&peripheral_stk[..], &distributed[0][1..]);
        assert_eq!(vec![0x07, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0], distributed[1]);

        assert_eq!(PairingState::Paired, peripheral.state());
        assert_eq!(None, peripheral.short_term_key());

        for pdu in distributed {
            central.receive(&mut central_stream, &mut central_toolbox, &pdu);
        }

        let events: Vec<_> = central.take_events().into_iter().collect();

        assert!(events.contains(&SmpEvent::PeerLongTermKey(peripheral_stk)));
        assert!(events.contains(&SmpEvent::PeerMasterIdentification {
            diversifier: [0; 2],
            random: [0; 8]
        }));
    }

    #[test]
    fn pairing_response_values() {
        let (_, mut stream) = streams();

        let mut peripheral = SecurityManager::new(Role::Peripheral);

        peripheral.receive(&mut stream, &mut AesToolbox, &[0x01, 0x03, 0x00, 0x01, 0x10, 0x00, 0x01]);

        assert_eq!(vec![vec![0x02, 0x03, 0x00, 0x01, 0x10, 0x00, 0x01]], smp_pdus(&mut stream));
        assert_eq!(PairingState::ResponseExchanged, peripheral.state());
    }

    #[test]
    fn confirm_value_mismatch() {
        let (_, mut stream) = streams();

        let mut peripheral = SecurityManager::new(Role::Peripheral);
        let mut toolbox = FixedToolbox(1);

        peripheral.receive(&mut stream, &mut toolbox, &pairing_request());

        let mut confirm = vec![0x03];
        confirm.extend_from_slice(&[0x55; 16]);

        peripheral.receive(&mut stream, &mut toolbox, &confirm);

        smp_pdus(&mut stream);

        let mut random = vec![0x04];
        random.extend_from_slice(&[0x66; 16]);

        peripheral.receive(&mut stream, &mut toolbox, &random);

        // the reason is Confirm Value Failed (0x04), not the pairing confirm command code (0x03)
        assert_eq!(vec![vec![0x05, 0x04]], smp_pdus(&mut stream));

        assert_eq!(
            vec![SmpEvent::Fail(PairingFailedReason::ConfirmValueFailed)],
            peripheral.take_events().into_iter().collect::<Vec<_>>()
        );

        assert_eq!(None, peripheral.short_term_key());
        assert_eq!(PairingState::Failed, peripheral.state());

        // nothing is distributed for a failed pairing
        peripheral.on_encrypt_change(&mut stream, true);

        assert!(smp_pdus(&mut stream).is_empty());
    }

    #[test]
    fn negative_reply_fails_pairing() {
        let (_, mut stream) = streams();

        let mut peripheral = SecurityManager::new(Role::Peripheral);

        peripheral.on_ltk_negative_reply(&mut stream);

        assert_eq!(vec![vec![0x05, 0x08]], smp_pdus(&mut stream));
        assert_eq!(
            Some(SmpEvent::Fail(PairingFailedReason::UnspecifiedReason)),
            peripheral.take_events().pop_front()
        );
    }

    #[test]
    fn security_request_starts_pairing() {
        let (mut central_stream, mut peripheral_stream) = streams();

        let mut central = SecurityManager::new(Role::Central);
        let mut peripheral = SecurityManager::new(Role::Peripheral);

        peripheral.request_pairing(&mut peripheral_stream);

        assert_eq!(vec![vec![0x0b, 0x01]], smp_pdus(&mut peripheral_stream));

        central.receive(&mut central_stream, &mut AesToolbox, &[0x0b, 0x01]);

        assert_eq!(vec![pairing_request().to_vec()], smp_pdus(&mut central_stream));
    }

    #[test]
    fn peer_failure() {
        let (mut stream, _) = streams();

        let mut central = SecurityManager::new(Role::Central);

        central.request_pairing(&mut stream);

        central.receive(&mut stream, &mut AesToolbox, &[0x05, 0x05]);

        assert_eq!(PairingState::Failed, central.state());
        assert_eq!(
            Some(SmpEvent::Fail(PairingFailedReason::PairingNotSupported)),
            central.take_events().pop_front()
        );
    }
}
