//! Characteristics and their descriptors

use crate::Uuid;
use serde::{Deserialize, Serialize};

/// Characteristic Properties
///
/// These are the properties that are part of the Characteristic Declaration
#[derive(Clone, Copy, PartialEq, PartialOrd, Eq, Ord, Debug, Serialize, Deserialize)]
pub enum Properties {
    Broadcast,
    Read,
    WriteWithoutResponse,
    Write,
    Notify,
    Indicate,
    AuthenticatedSignedWrite,
    ExtendedProperties,
}

impl Properties {
    const ALL: [Properties; 8] = [
        Properties::Broadcast,
        Properties::Read,
        Properties::WriteWithoutResponse,
        Properties::Write,
        Properties::Notify,
        Properties::Indicate,
        Properties::AuthenticatedSignedWrite,
        Properties::ExtendedProperties,
    ];

    pub fn to_val(&self) -> u8 {
        match *self {
            Properties::Broadcast => 1 << 0,
            Properties::Read => 1 << 1,
            Properties::WriteWithoutResponse => 1 << 2,
            Properties::Write => 1 << 3,
            Properties::Notify => 1 << 4,
            Properties::Indicate => 1 << 5,
            Properties::AuthenticatedSignedWrite => 1 << 6,
            Properties::ExtendedProperties => 1 << 7,
        }
    }

    pub fn slice_to_bit_field(properties: &[Self]) -> u8 {
        properties.iter().fold(0u8, |u, p| u | p.to_val())
    }

    /// Get the properties set within a bit field
    pub fn from_bit_field(field: u8) -> Vec<Self> {
        Self::ALL.iter().copied().filter(|p| field & p.to_val() != 0).collect()
    }
}

/// The value of a characteristic declaration
#[derive(Debug, PartialEq)]
pub(crate) struct Declaration {
    pub properties: Vec<Properties>,
    pub value_handle: u16,
    pub uuid: Uuid,
}

impl Declaration {
    pub fn try_from_value(raw: &[u8]) -> Option<Self> {
        match raw {
            [properties, a, b, uuid @ ..] => Some(Declaration {
                properties: Properties::from_bit_field(*properties),
                value_handle: u16::from_le_bytes([*a, *b]),
                uuid: Uuid::from_le_slice(uuid)?,
            }),
            _ => None,
        }
    }
}

/// A descriptor of a characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub uuid: Uuid,
    pub handle: u16,
}

/// A discovered characteristic
///
/// The end handle is not part of the declaration, it is known only once every characteristic of
/// the service has been discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Characteristic {
    pub uuid: Uuid,
    /// The handle of the declaration
    pub start_handle: u16,
    pub value_handle: u16,
    pub end_handle: u16,
    pub properties: Vec<Properties>,
    pub descriptors: Vec<Descriptor>,
}

impl Characteristic {
    pub(crate) fn from_declaration(handle: u16, declaration: Declaration) -> Self {
        Characteristic {
            uuid: declaration.uuid,
            start_handle: handle,
            value_handle: declaration.value_handle,
            end_handle: declaration.value_handle,
            properties: declaration.properties,
            descriptors: Vec::new(),
        }
    }

    pub fn has_property(&self, property: Properties) -> bool {
        self.properties.contains(&property)
    }

    pub fn descriptor(&self, uuid: Uuid) -> Option<&Descriptor> {
        self.descriptors.iter().find(|d| d.uuid == uuid)
    }
}

/// Set the end handle of each characteristic
///
/// A characteristic ends right before the declaration of the next one, the last characteristic
/// ends with the service.
pub(crate) fn back_fill_end_handles(characteristics: &mut [Characteristic], service_end: u16) {
    characteristics.sort_by_key(|c| c.start_handle);

    let next_starts: Vec<u16> = characteristics
        .iter()
        .skip(1)
        .map(|c| c.start_handle.saturating_sub(1))
        .chain(std::iter::once(service_end))
        .collect();

    for (characteristic, end) in characteristics.iter_mut().zip(next_starts) {
        characteristic.end_handle = end;
    }
}
