//! Long term keys
//!
//! The keys created by pairing are kept in a [`KeyStore`]. The controller does not look up keys
//! from the host by itself, the whole list is loaded into the kernel through the management
//! interface every time it changes.

use crate::{AddressType, BluetoothDeviceAddress};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The management command to load the long term keys of a controller
pub const MGMT_OP_LOAD_LONG_TERM_KEYS: u16 = 0x0013;

/// The size of a key record of the load command
pub const LTK_INFO_SIZE: usize = 36;

const KEY_SIZE: u8 = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongTermKeyRecord {
    pub peer_address: BluetoothDeviceAddress,
    pub peer_address_type: AddressType,
    pub authenticated: bool,
    pub master: bool,
    pub key: [u8; 16],
    pub diversifier: [u8; 2],
    pub random: [u8; 8],
}

impl LongTermKeyRecord {
    /// The record of the load long term keys command
    pub fn to_mgmt_bytes(&self) -> [u8; LTK_INFO_SIZE] {
        let mut info = [0u8; LTK_INFO_SIZE];

        info[..6].copy_from_slice(&self.peer_address.0);

        // the management interface uses 1 for public and 2 for random
        info[6] = self.peer_address_type.val() + 1;

        info[7] = self.authenticated.into();
        info[8] = self.master.into();
        info[9] = KEY_SIZE;

        info[10..12].copy_from_slice(&self.diversifier);
        info[12..20].copy_from_slice(&self.random);
        info[20..].copy_from_slice(&self.key);

        info
    }

    pub fn matches(&self, address: &BluetoothDeviceAddress, diversifier: [u8; 2], random: [u8; 8]) -> bool {
        self.peer_address == *address && self.diversifier == diversifier && self.random == random
    }
}

/// Build the management packet to load `records` into the controller `index`
pub fn load_long_term_keys_command(index: u16, records: &[LongTermKeyRecord]) -> Vec<u8> {
    let length = 2 + records.len() * LTK_INFO_SIZE;

    let mut packet = Vec::with_capacity(6 + length);

    packet.extend_from_slice(&MGMT_OP_LOAD_LONG_TERM_KEYS.to_le_bytes());
    packet.extend_from_slice(&index.to_le_bytes());
    packet.extend_from_slice(&(length as u16).to_le_bytes());
    packet.extend_from_slice(&(records.len() as u16).to_le_bytes());

    for record in records {
        packet.extend_from_slice(&record.to_mgmt_bytes())
    }

    packet
}

/// Loads long term keys into the controller
pub trait KeyProvisioner {
    type Error: fmt::Display;

    /// Replace the keys of the controller `index` with `records`
    fn load_long_term_keys(&mut self, index: u16, records: &[LongTermKeyRecord]) -> Result<(), Self::Error>;
}

/// The long term keys of a controller
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct KeyStore {
    index: u16,
    records: Vec<LongTermKeyRecord>,
}

impl KeyStore {
    pub fn new(index: u16) -> Self {
        KeyStore {
            index,
            records: Vec::new(),
        }
    }

    pub fn records(&self) -> &[LongTermKeyRecord] {
        &self.records
    }

    pub fn find(
        &self,
        address: &BluetoothDeviceAddress,
        diversifier: [u8; 2],
        random: [u8; 8],
    ) -> Option<&LongTermKeyRecord> {
        self.records.iter().find(|r| r.matches(address, diversifier, random))
    }

    /// Add a key and load the full list into the controller
    ///
    /// A key of the same peer and role as `record` is replaced.
    pub fn add<P: KeyProvisioner>(&mut self, provisioner: &mut P, record: LongTermKeyRecord) {
        log::debug!("adding the long term key of {}", record.peer_address);

        self.records.retain(|r| {
            r.peer_address != record.peer_address
                || r.peer_address_type != record.peer_address_type
                || r.master != record.master
        });

        self.records.push(record);

        self.load(provisioner)
    }

    /// Remove every key from the controller
    pub fn clear<P: KeyProvisioner>(&mut self, provisioner: &mut P) {
        self.records.clear();

        self.load(provisioner)
    }

    fn load<P: KeyProvisioner>(&self, provisioner: &mut P) {
        if let Err(e) = provisioner.load_long_term_keys(self.index, &self.records) {
            log::error!("failed to load {} long term keys: {}", self.records.len(), e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Vec<Vec<u8>>);

    impl KeyProvisioner for Recorder {
        type Error = String;

        fn load_long_term_keys(&mut self, index: u16, records: &[LongTermKeyRecord]) -> Result<(), String> {
            self.0.push(load_long_term_keys_command(index, records));

            Ok(())
        }
    }

    fn record() -> LongTermKeyRecord {
        LongTermKeyRecord {
            peer_address: BluetoothDeviceAddress([1, 2, 3, 4, 5, 6]),
            peer_address_type: AddressType::Random,
            authenticated: false,
            master: false,
            key: [0xaa; 16],
            diversifier: [0; 2],
            random: [0; 8],
        }
    }

    #[test]
    fn record_layout() {
        let info = record().to_mgmt_bytes();

        assert_eq!(&[1, 2, 3, 4, 5, 6, 2, 0, 0, 16], &info[..10]);
        assert_eq!(&[0; 10], &info[10..20]);
        assert_eq!(&[0xaa; 16], &info[20..]);
    }

    #[test]
    fn whole_list_is_loaded() {
        let mut store = KeyStore::new(1);
        let mut recorder = Recorder::default();

        let other = LongTermKeyRecord {
            peer_address: BluetoothDeviceAddress([6, 5, 4, 3, 2, 1]),
            ..record()
        };

        store.add(&mut recorder, record());
        store.add(&mut recorder, other);

        assert_eq!(2, recorder.0.len());

        let second = &recorder.0[1];

        assert_eq!(&[0x13, 0x00, 0x01, 0x00, 74, 0x00, 0x02, 0x00], &second[..8]);
        assert_eq!(8 + 2 * LTK_INFO_SIZE, second.len());

        store.clear(&mut recorder);

        assert_eq!(vec![0x13, 0x00, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00], recorder.0[2]);
    }

    #[test]
    fn find_by_identity() {
        let mut store = KeyStore::new(0);

        store.add(&mut Recorder::default(), record());

        let address = BluetoothDeviceAddress([1, 2, 3, 4, 5, 6]);

        assert!(store.find(&address, [0; 2], [0; 8]).is_some());
        assert!(store.find(&address, [1, 0], [0; 8]).is_none());
    }

    #[test]
    fn pairing_again_replaces_the_key() {
        let mut store = KeyStore::new(0);
        let mut recorder = Recorder::default();

        store.add(&mut recorder, record());

        store.add(
            &mut recorder,
            LongTermKeyRecord {
                key: [0xbb; 16],
                ..record()
            },
        );

        // the key of the peer as the other role is kept
        store.add(
            &mut recorder,
            LongTermKeyRecord {
                master: true,
                key: [0xcc; 16],
                ..record()
            },
        );

        assert_eq!(2, store.records().len());

        let address = BluetoothDeviceAddress([1, 2, 3, 4, 5, 6]);

        assert_eq!(Some([0xbb; 16]), store.find(&address, [0; 2], [0; 8]).map(|r| r.key));

        assert_eq!(8 + 2 * LTK_INFO_SIZE, recorder.0[2].len());
    }
}
