//! Advertising reports received while scanning
//!
//! Reports are merged per peer address into a [`Discovery`]. Advertising data and scan response
//! data of a peer arrive in separate reports, the discovery is the accumulation of both.

use super::advertise::AssignedTypes;
use crate::hci::events::AdvertisingReport;
use crate::{AddressType, BluetoothDeviceAddress, Uuid};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Report event type of a non-connectable undirected advertisement
pub const ADV_NONCONN_IND: u8 = 0x03;

/// Report event type of a scan response
pub const SCAN_RSP: u8 = 0x04;

const INCOMPLETE_16_BIT_UUIDS: u8 = AssignedTypes::IncompleteListOf16bitServiceClassUUIDs.val();
const COMPLETE_16_BIT_UUIDS: u8 = AssignedTypes::CompleteListOf16bitServiceClassUUIDs.val();
const INCOMPLETE_128_BIT_UUIDS: u8 = AssignedTypes::IncompleteListOf128bitServiceClassUUIDs.val();
const COMPLETE_128_BIT_UUIDS: u8 = AssignedTypes::CompleteListOf128bitServiceClassUUIDs.val();
const SHORTENED_LOCAL_NAME: u8 = AssignedTypes::ShortenedLocalName.val();
const COMPLETE_LOCAL_NAME: u8 = AssignedTypes::CompleteLocalName.val();
const TX_POWER_LEVEL: u8 = AssignedTypes::TxPowerLevel.val();
const SERVICE_DATA_16_BIT: u8 = AssignedTypes::ServiceData16BitUUID.val();
const MANUFACTURER_SPECIFIC_DATA: u8 = AssignedTypes::ManufacturerSpecificData.val();

/// An iterator over the AD structures of a received payload
///
/// Each item is the AD type and its data. Iteration stops at the first structure with a zero
/// length or a length running past the end of the payload.
pub struct ScanPayloadIter<'a> {
    bytes: &'a [u8],
}

impl<'a> ScanPayloadIter<'a> {
    pub fn iter(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }
}

impl<'a> Iterator for ScanPayloadIter<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.bytes.len() < 2 {
            return None;
        }

        let len = self.bytes[0] as usize;

        if len < 1 || len + 1 > self.bytes.len() {
            if len > 0 {
                log::debug!("AD structure length {} overruns the payload", len);
            }

            self.bytes = &[];

            return None;
        }

        let (structure, rest) = self.bytes.split_at(len + 1);

        self.bytes = rest;

        Some((structure[1], &structure[2..]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceData {
    pub uuid: Uuid,
    pub data: Vec<u8>,
}

/// The advertised content of a peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    pub local_name: Option<String>,
    pub tx_power_level: Option<i8>,
    pub manufacturer_data: Option<Vec<u8>>,
    pub service_data: Vec<ServiceData>,
    pub service_uuids: Vec<Uuid>,
}

impl Advertisement {
    fn add_service_uuid(&mut self, uuid: Uuid) {
        if !self.service_uuids.contains(&uuid) {
            self.service_uuids.push(uuid)
        }
    }

    /// Merge the AD structures of `payload` into this advertisement
    pub fn merge_payload(&mut self, payload: &[u8]) {
        for (ad_type, data) in ScanPayloadIter::iter(payload) {
            match ad_type {
                INCOMPLETE_16_BIT_UUIDS | COMPLETE_16_BIT_UUIDS => data
                    .chunks_exact(2)
                    .filter_map(Uuid::from_le_slice)
                    .for_each(|uuid| self.add_service_uuid(uuid)),
                INCOMPLETE_128_BIT_UUIDS | COMPLETE_128_BIT_UUIDS => data
                    .chunks_exact(16)
                    .filter_map(Uuid::from_le_slice)
                    .for_each(|uuid| self.add_service_uuid(uuid)),
                SHORTENED_LOCAL_NAME | COMPLETE_LOCAL_NAME => {
                    self.local_name = Some(String::from_utf8_lossy(data).into_owned())
                }
                TX_POWER_LEVEL => {
                    if let Some(power) = data.first() {
                        self.tx_power_level = Some(*power as i8)
                    }
                }
                SERVICE_DATA_16_BIT => {
                    if let Some(uuid) = data.get(..2).and_then(Uuid::from_le_slice) {
                        self.service_data.push(ServiceData {
                            uuid,
                            data: data[2..].to_vec(),
                        })
                    }
                }
                MANUFACTURER_SPECIFIC_DATA => self.manufacturer_data = Some(data.to_vec()),
                _ => (),
            }
        }
    }
}

/// A peer found by scanning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discovery {
    pub address: BluetoothDeviceAddress,
    pub address_type: AddressType,
    pub connectable: bool,
    pub advertisement: Advertisement,
    pub rssi: i8,
    /// The number of reports received from the peer
    pub count: usize,
    pub has_scan_response: bool,
}

impl Discovery {
    pub fn peripheral_id(&self) -> String {
        self.address.peripheral_id()
    }
}

/// The accumulated discoveries of peers
#[derive(Default)]
pub struct Discoveries {
    peers: HashMap<BluetoothDeviceAddress, Discovery>,
}

impl Discoveries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &BluetoothDeviceAddress) -> Option<&Discovery> {
        self.peers.get(address)
    }

    /// Merge a report into the discovery of its peer
    ///
    /// The merged discovery is returned if it is to be reported, that is when the report is a
    /// scan response, when the peer has been reported before without a scan response, or always
    /// when `report_all` is set.
    pub fn merge(&mut self, report: &AdvertisingReport, report_all: bool) -> Option<Discovery> {
        let is_scan_response = report.event_type == SCAN_RSP;

        let discovery = self.peers.entry(report.address).or_insert_with(|| Discovery {
            address: report.address,
            address_type: report.address_type,
            connectable: false,
            advertisement: Advertisement::default(),
            rssi: report.rssi,
            count: 0,
            has_scan_response: false,
        });

        if is_scan_response {
            // connectability is inherited from the advertisement
            discovery.has_scan_response = true;
        } else {
            // these lists are refreshed by every advertisement
            discovery.advertisement.service_data.clear();
            discovery.advertisement.service_uuids.clear();

            discovery.connectable = report.event_type != ADV_NONCONN_IND;
        }

        discovery.advertisement.merge_payload(&report.data);

        discovery.address_type = report.address_type;
        discovery.rssi = report.rssi;
        discovery.count += 1;

        let emit = is_scan_response || (discovery.count > 1 && !discovery.has_scan_response) || report_all;

        emit.then(|| discovery.clone())
    }

    pub fn clear(&mut self) {
        self.peers.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(event_type: u8, data: &[u8]) -> AdvertisingReport {
        AdvertisingReport {
            event_type,
            address_type: AddressType::Random,
            address: BluetoothDeviceAddress([1, 2, 3, 4, 5, 6]),
            data: data.to_vec(),
            rssi: -70,
        }
    }

    #[test]
    fn payload_elements() {
        let mut advertisement = Advertisement::default();

        let payload = [
            0x02, 0x01, 0x06, // flags
            0x05, 0x03, 0x0d, 0x18, 0x0d, 0x18, // duplicated 16 bit uuid
            0x02, 0x0a, 0xf4, // tx power
            0x05, 0x16, 0x0f, 0x18, 0x64, 0x01, // service data
            0x04, 0xff, 0x4c, 0x00, 0x02, // manufacturer data
            0x04, 0x09, b'a', b'b', b'c', // complete local name
        ];

        advertisement.merge_payload(&payload);

        assert_eq!(vec![Uuid::Short(0x180d)], advertisement.service_uuids);
        assert_eq!(Some(-12), advertisement.tx_power_level);
        assert_eq!(
            vec![ServiceData {
                uuid: Uuid::Short(0x180f),
                data: vec![0x64, 0x01]
            }],
            advertisement.service_data
        );
        assert_eq!(Some(vec![0x4c, 0x00, 0x02]), advertisement.manufacturer_data);
        assert_eq!(Some("abc".to_string()), advertisement.local_name);
    }

    #[test]
    fn long_uuids_are_reversed() {
        let mut advertisement = Advertisement::default();

        let mut payload = vec![0x11, 0x07];

        payload.extend((0..16u8).rev());

        advertisement.merge_payload(&payload);

        assert_eq!(
            "000102030405060708090a0b0c0d0e0f",
            advertisement.service_uuids[0].to_string()
        );
    }

    #[test]
    fn bad_lengths_abort_parsing() {
        let mut advertisement = Advertisement::default();

        advertisement.merge_payload(&[0x02, 0x0a, 0x01, 0x00, 0x09, b'x', 0x02, 0x0a, 0x02]);

        assert_eq!(Some(1), advertisement.tx_power_level);
        assert_eq!(None, advertisement.local_name);

        let mut advertisement = Advertisement::default();

        advertisement.merge_payload(&[0x02, 0x0a, 0x01, 0x09, 0x09, b'x']);

        assert_eq!(Some(1), advertisement.tx_power_level);
        assert_eq!(None, advertisement.local_name);
    }

    #[test]
    fn second_advertisement_is_reported() {
        let mut discoveries = Discoveries::new();

        let first = report(0x00, &[0x03, 0x03, 0x0d, 0x18, 0x02, 0x0a, 0x04]);

        assert_eq!(None, discoveries.merge(&first, false));

        let second = report(0x00, &[0x03, 0x08, b'h', b'r']);

        let discovery = discoveries.merge(&second, false).unwrap();

        assert_eq!(2, discovery.count);
        assert!(discovery.connectable);
        assert!(!discovery.has_scan_response);
        assert_eq!(Some("hr".to_string()), discovery.advertisement.local_name);
        assert_eq!(Some(4), discovery.advertisement.tx_power_level);
        // refreshed by the second advertisement
        assert!(discovery.advertisement.service_uuids.is_empty());
    }

    #[test]
    fn scan_response_is_merged() {
        let mut discoveries = Discoveries::new();

        assert_eq!(None, discoveries.merge(&report(0x03, &[0x03, 0x03, 0x0d, 0x18]), false));

        let discovery = discoveries
            .merge(&report(SCAN_RSP, &[0x04, 0x09, b'd', b'e', b'v']), false)
            .unwrap();

        assert!(discovery.has_scan_response);
        assert!(!discovery.connectable);
        assert_eq!(vec![Uuid::Short(0x180d)], discovery.advertisement.service_uuids);
        assert_eq!(Some("dev".to_string()), discovery.advertisement.local_name);

        // only scan responses are reported after a scan response
        assert_eq!(None, discoveries.merge(&report(0x03, &[]), false));
    }

    #[test]
    fn report_all() {
        let mut discoveries = Discoveries::new();

        let discovery = discoveries.merge(&report(0x00, &[]), true).unwrap();

        assert_eq!(1, discovery.count);
        assert_eq!(-70, discovery.rssi);
        assert_eq!("060504030201", discovery.peripheral_id());
    }
}
