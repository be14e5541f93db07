//! Advertising and scan response data
//!
//! Advertising data is a sequence of AD structures. Each is a length, an assigned type, and the
//! data of the type. The assigned numbers can be found in the *Generic Access Profile* assigned
//! number document.

use crate::hci::commands::MAX_ADVERTISING_DATA_LEN;
use crate::Uuid;

/// Apple's company identifier
const APPLE_COMPANY_ID: u16 = 0x004c;

/// The iBeacon type within Apple's manufacturer specific data
const IBEACON_TYPE: u8 = 0x02;

/// LE general discoverable mode, BR/EDR not supported
const DEFAULT_FLAGS: u8 = 0x06;

pub enum AssignedTypes {
    Flags,
    IncompleteListOf16bitServiceClassUUIDs,
    CompleteListOf16bitServiceClassUUIDs,
    IncompleteListOf128bitServiceClassUUIDs,
    CompleteListOf128bitServiceClassUUIDs,
    ShortenedLocalName,
    CompleteLocalName,
    TxPowerLevel,
    ServiceData16BitUUID,
    ManufacturerSpecificData,
}

impl AssignedTypes {
    pub const fn val(&self) -> u8 {
        match *self {
            AssignedTypes::Flags => 0x01,
            AssignedTypes::IncompleteListOf16bitServiceClassUUIDs => 0x02,
            AssignedTypes::CompleteListOf16bitServiceClassUUIDs => 0x03,
            AssignedTypes::IncompleteListOf128bitServiceClassUUIDs => 0x06,
            AssignedTypes::CompleteListOf128bitServiceClassUUIDs => 0x07,
            AssignedTypes::ShortenedLocalName => 0x08,
            AssignedTypes::CompleteLocalName => 0x09,
            AssignedTypes::TxPowerLevel => 0x0A,
            AssignedTypes::ServiceData16BitUUID => 0x16,
            AssignedTypes::ManufacturerSpecificData => 0xFF,
        }
    }
}

/// Append an AD structure
fn push_structure(data: &mut Vec<u8>, ad_type: AssignedTypes, value: &[u8]) {
    data.push((value.len() + 1) as u8);

    data.push(ad_type.val());

    data.extend_from_slice(value);
}

fn flags(data: &mut Vec<u8>) {
    push_structure(data, AssignedTypes::Flags, &[DEFAULT_FLAGS]);
}

/// Build the advertising data listing `service_uuids`
///
/// 16 bit UUIDs are put in a complete list and 128 bit UUIDs in an incomplete list. UUIDs that
/// do not fit are left out.
pub fn advertising_data(service_uuids: &[Uuid]) -> Vec<u8> {
    let mut data = Vec::with_capacity(MAX_ADVERTISING_DATA_LEN);

    flags(&mut data);

    let (short, long): (Vec<Uuid>, Vec<Uuid>) = service_uuids.iter().copied().partition(|uuid| uuid.is_short());

    let lists = [
        (AssignedTypes::CompleteListOf16bitServiceClassUUIDs, short, 2),
        (AssignedTypes::IncompleteListOf128bitServiceClassUUIDs, long, 16),
    ];

    for (ad_type, uuids, size) in lists {
        let room = MAX_ADVERTISING_DATA_LEN.saturating_sub(data.len() + 2) / size;

        if uuids.is_empty() || room == 0 {
            continue;
        }

        if uuids.len() > room {
            log::warn!("{} service UUIDs do not fit in the advertising data", uuids.len() - room);
        }

        let value: Vec<u8> = uuids.iter().take(room).flat_map(|uuid| uuid.to_le_bytes()).collect();

        push_structure(&mut data, ad_type, &value);
    }

    data
}

/// Build the scan response data containing the local name
///
/// The name is truncated to fit and put in a shortened local name.
pub fn scan_response_data(name: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(MAX_ADVERTISING_DATA_LEN);

    if !name.is_empty() {
        let max = MAX_ADVERTISING_DATA_LEN - 2;

        let mut end = name.len().min(max);

        while !name.is_char_boundary(end) {
            end -= 1;
        }

        push_structure(&mut data, AssignedTypes::ShortenedLocalName, &name.as_bytes()[..end]);
    }

    data
}

/// Build iBeacon advertising data
///
/// `ibeacon` is the proximity UUID, major, minor, and measured power of the beacon.
pub fn ibeacon_data(ibeacon: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(MAX_ADVERTISING_DATA_LEN);

    flags(&mut data);

    let mut value = APPLE_COMPANY_ID.to_le_bytes().to_vec();

    value.push(IBEACON_TYPE);

    value.push(ibeacon.len() as u8);

    value.extend_from_slice(ibeacon);

    push_structure(&mut data, AssignedTypes::ManufacturerSpecificData, &value);

    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_and_uuids() {
        let data = advertising_data(&[Uuid::Short(0x180d), Uuid::Short(0x180f)]);

        assert_eq!(vec![0x02, 0x01, 0x06, 0x05, 0x03, 0x0d, 0x18, 0x0f, 0x18], data);

        assert_eq!(vec![0x05, 0x08, b't', b'e', b's', b't'], scan_response_data("test"));

        assert!(scan_response_data("").is_empty());
    }

    #[test]
    fn long_uuids_are_little_endian() {
        let uuid = Uuid::Long(0x000102030405060708090a0b0c0d0e0f);

        let data = advertising_data(&[uuid]);

        assert_eq!(3 + 18, data.len());

        assert_eq!(&[0x11, 0x06, 0x0f, 0x0e], &data[3..7]);

        assert_eq!(0x00, data[20]);
    }

    #[test]
    fn oversized_content_is_cut() {
        let uuids: Vec<Uuid> = (0..20u16).map(Uuid::Short).collect();

        assert!(advertising_data(&uuids).len() <= MAX_ADVERTISING_DATA_LEN);

        let name = "a name that is far too long for a scan response";

        assert_eq!(MAX_ADVERTISING_DATA_LEN, scan_response_data(name).len());
    }

    #[test]
    fn ibeacon() {
        let beacon = [0x11; 21];

        let data = ibeacon_data(&beacon);

        assert_eq!(&[0x02, 0x01, 0x06, 26, 0xff, 0x4c, 0x00, 0x02, 21], &data[..9]);

        assert_eq!(30, data.len());
    }
}
