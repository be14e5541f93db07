//! A live connection and the protocols running over it

use crate::gatt::GattClient;
use crate::hci::events::{LeConnectionComplete, Role};
use crate::l2cap::AclStream;
use crate::sm::SecurityManager;
use crate::{AddressType, BluetoothDeviceAddress};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionState {
    None,
    /// Pairing or encryption of the link is in progress
    Pending,
    Encrypted,
}

/// A connection with a peer
///
/// Every connection has its own data stream, attribute client, and security manager. They all
/// live as long as the connection does.
pub struct Connection {
    pub(super) handle: u16,
    pub(super) peer_address: BluetoothDeviceAddress,
    pub(super) peer_address_type: AddressType,
    pub(super) role: Role,
    pub(super) encryption: EncryptionState,
    pub(super) stream: AclStream,
    pub(super) gatt: GattClient,
    pub(super) smp: SecurityManager,
}

impl Connection {
    pub(super) fn new(
        complete: &LeConnectionComplete,
        local_address_type: AddressType,
        local_address: BluetoothDeviceAddress,
    ) -> Self {
        let stream = AclStream::new(
            complete.handle,
            local_address_type,
            local_address,
            complete.peer_address_type,
            complete.peer_address,
        );

        Connection {
            handle: complete.handle,
            peer_address: complete.peer_address,
            peer_address_type: complete.peer_address_type,
            role: complete.role,
            encryption: EncryptionState::None,
            stream,
            gatt: GattClient::new(),
            smp: SecurityManager::new(complete.role),
        }
    }

    pub fn handle(&self) -> u16 {
        self.handle
    }

    pub fn peer_address(&self) -> (AddressType, BluetoothDeviceAddress) {
        (self.peer_address_type, self.peer_address)
    }

    pub fn peripheral_id(&self) -> String {
        self.peer_address.peripheral_id()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn encryption(&self) -> EncryptionState {
        self.encryption
    }

    pub fn gatt(&self) -> &GattClient {
        &self.gatt
    }

    pub fn security_manager(&self) -> &SecurityManager {
        &self.smp
    }

    /// Tear down the protocols of the connection
    ///
    /// Everything still waiting to be sent and every queued command is dropped.
    pub(super) fn end(&mut self) {
        self.stream.end();
        self.gatt.end();
        self.smp.end();
    }
}
