//! The Generic Attribute Profile client
//!
//! A [`GattClient`] runs the attribute protocol of one connection. Requests are serialized
//! through a command queue, only the command at the front of the queue has been written and is
//! waiting for its response. The response is handed to the pending state of that command which
//! either finishes the operation (raising a [`GattEvent`]) or produces the command for the next
//! page of a discovery.
//!
//! The client never blocks, the owner of the connection pushes received ATT PDUs in with
//! [`receive`](GattClient::receive) and drains the events afterwards.

pub mod characteristic;
mod queue;

use crate::att::{self, pdu, ClientPduName, ServerPduName};
use crate::l2cap::AclStream;
use crate::Uuid;
use characteristic::{Characteristic, Declaration, Descriptor, Properties};
use queue::{Command, CommandQueue};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

const PRIMARY_SERVICE_TYPE: u16 = 0x2800;
const INCLUDE_TYPE: u16 = 0x2802;
const CHARACTERISTIC_TYPE: u16 = 0x2803;
const CLIENT_CHARACTERISTIC_CONFIGURATION: u16 = 0x2902;
const SERVER_CHARACTERISTIC_CONFIGURATION: u16 = 0x2903;

const NOTIFY_BIT: u16 = 0x0001;
const INDICATE_BIT: u16 = 0x0002;
const BROADCAST_BIT: u16 = 0x0001;

const FIRST_HANDLE: u16 = 0x0001;
const LAST_HANDLE: u16 = 0xFFFF;

/// Referential errors of the client operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    UnknownService(Uuid),
    UnknownCharacteristic {
        service: Uuid,
        characteristic: Uuid,
    },
    UnknownDescriptor {
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::UnknownService(uuid) => write!(f, "unknown service {}", uuid),
            Error::UnknownCharacteristic { service, characteristic } => {
                write!(f, "unknown characteristic {} of service {}", characteristic, service)
            }
            Error::UnknownDescriptor {
                service,
                characteristic,
                descriptor,
            } => write!(
                f,
                "unknown descriptor {} of characteristic {} of service {}",
                descriptor, characteristic, service
            ),
        }
    }
}

impl std::error::Error for Error {}

/// The security tier of the link as seen by the attribute client
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecurityLevel {
    Low,
    Medium,
    High,
}

/// A discovered primary service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub uuid: Uuid,
    pub start_handle: u16,
    pub end_handle: u16,
    pub included_services: Vec<Uuid>,
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    fn new(uuid: Uuid, start_handle: u16, end_handle: u16) -> Self {
        Service {
            uuid,
            start_handle,
            end_handle,
            included_services: Vec::new(),
            characteristics: Vec::new(),
        }
    }

    pub fn characteristic(&self, uuid: Uuid) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// The value of an include declaration
///
/// Only 16 bit UUIDs are part of the declaration, the UUID of an included service with a 128
/// bit UUID must be read separately.
struct ServiceInclude {
    short_service_type: Option<u16>,
}

impl ServiceInclude {
    fn try_from_value(raw: &[u8]) -> Option<Self> {
        match raw.len() {
            4 => Some(ServiceInclude {
                short_service_type: None,
            }),
            6 => Some(ServiceInclude {
                short_service_type: Some(u16::from_le_bytes([raw[4], raw[5]])),
            }),
            _ => None,
        }
    }
}

/// The attribute an operation is performed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Characteristic {
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
    },
    Descriptor {
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        descriptor_uuid: Uuid,
    },
    Handle(u16),
}

/// The configuration descriptors toggled by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Configuration {
    /// Notifications or indications through the client characteristic configuration
    Notify,
    /// Broadcasts through the server characteristic configuration
    Broadcast,
}

impl Configuration {
    fn descriptor_type(&self) -> u16 {
        match self {
            Configuration::Notify => CLIENT_CHARACTERISTIC_CONFIGURATION,
            Configuration::Broadcast => SERVER_CHARACTERISTIC_CONFIGURATION,
        }
    }
}

/// What is done with the response of a command
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Pending {
    ExchangeMtu {
        requested: u16,
    },
    DiscoverServices {
        filter: Vec<Uuid>,
        start: u16,
        found: Vec<Service>,
    },
    FindService {
        uuid: Uuid,
    },
    DiscoverIncludedServices {
        service_uuid: Uuid,
        filter: Vec<Uuid>,
        start: u16,
        end_handle: u16,
        found: Vec<Uuid>,
    },
    DiscoverCharacteristics {
        service_uuid: Uuid,
        filter: Vec<Uuid>,
        start: u16,
        end_handle: u16,
        found: Vec<Characteristic>,
    },
    DiscoverDescriptors {
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        start: u16,
        end_handle: u16,
        found: Vec<Descriptor>,
    },
    Read {
        target: Target,
        handle: u16,
        data: Vec<u8>,
    },
    Write {
        target: Target,
        with_response: bool,
    },
    ReadConfiguration {
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        configuration: Configuration,
        enable: bool,
    },
    WriteConfiguration {
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        configuration: Configuration,
        enable: bool,
    },
    Confirmation {
        handle: u16,
    },
}

impl Pending {
    /// Commands and confirmations are complete once they are written
    fn expects_response(&self) -> bool {
        !matches!(
            self,
            Pending::Write {
                with_response: false,
                ..
            } | Pending::Confirmation { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GattEvent {
    /// The MTU exchange is complete
    Mtu(u16),
    ServicesDiscover(Vec<Service>),
    /// A service searched for by UUID
    ServiceFound {
        uuid: Uuid,
        service: Option<Service>,
    },
    IncludedServicesDiscover {
        service_uuid: Uuid,
        included_service_uuids: Vec<Uuid>,
    },
    CharacteristicsDiscover {
        service_uuid: Uuid,
        characteristics: Vec<Characteristic>,
    },
    DescriptorsDiscover {
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        descriptors: Vec<Uuid>,
    },
    Read {
        target: Target,
        result: Result<Vec<u8>, att::Error>,
    },
    Write {
        target: Target,
        result: Result<(), att::Error>,
    },
    /// A notification or indication of a known characteristic
    Notification {
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        data: Vec<u8>,
    },
    HandleNotify {
        handle: u16,
        data: Vec<u8>,
    },
    HandleConfirmation {
        handle: u16,
    },
    Notify {
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        result: Result<bool, att::Error>,
    },
    Broadcast {
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        result: Result<bool, att::Error>,
    },
}

fn is_listed(filter: &[Uuid], uuid: &Uuid) -> bool {
    filter.is_empty() || filter.contains(uuid)
}

/// The attribute protocol client of a connection
pub struct GattClient {
    mtu: u16,
    security: SecurityLevel,
    queue: CommandQueue,
    services: Vec<Service>,
    /// The error response that started pairing
    deferred_error: Option<Vec<u8>>,
    events: VecDeque<GattEvent>,
}

impl Default for GattClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GattClient {
    pub fn new() -> Self {
        GattClient {
            mtu: att::MIN_ATT_MTU_LE,
            security: SecurityLevel::Low,
            queue: CommandQueue::default(),
            services: Vec::new(),
            deferred_error: None,
            events: VecDeque::new(),
        }
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.security
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn service(&self, uuid: Uuid) -> Option<&Service> {
        self.services.iter().find(|s| s.uuid == uuid)
    }

    /// The number of commands written or waiting to be written
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn take_events(&mut self) -> VecDeque<GattEvent> {
        std::mem::take(&mut self.events)
    }

    fn find_service(&self, service_uuid: Uuid) -> Result<&Service, Error> {
        self.service(service_uuid).ok_or(Error::UnknownService(service_uuid))
    }

    fn find_characteristic(&self, service_uuid: Uuid, characteristic_uuid: Uuid) -> Result<&Characteristic, Error> {
        self.find_service(service_uuid)?
            .characteristic(characteristic_uuid)
            .ok_or(Error::UnknownCharacteristic {
                service: service_uuid,
                characteristic: characteristic_uuid,
            })
    }

    fn find_descriptor(
        &self,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        descriptor_uuid: Uuid,
    ) -> Result<&Descriptor, Error> {
        self.find_characteristic(service_uuid, characteristic_uuid)?
            .descriptor(descriptor_uuid)
            .ok_or(Error::UnknownDescriptor {
                service: service_uuid,
                characteristic: characteristic_uuid,
                descriptor: descriptor_uuid,
            })
    }

    /// Find the service and characteristic with a value handle
    fn by_value_handle(&self, handle: u16) -> Option<(Uuid, Uuid)> {
        self.services.iter().find_map(|service| {
            service
                .characteristics
                .iter()
                .find(|c| c.value_handle == handle)
                .map(|c| (service.uuid, c.uuid))
        })
    }

    fn enqueue(&mut self, stream: &mut AclStream, command: Command) {
        if self.queue.push(command) {
            self.pump(stream)
        }
    }

    /// Write the command at the front of the queue
    ///
    /// Commands that do not expect a response are completed as soon as they are written, the
    /// queue then continues with the next command.
    fn pump(&mut self, stream: &mut AclStream) {
        while let Some(current) = self.queue.current() {
            log::trace!("writing ATT PDU {:x?}", current.request);

            stream.write(att::L2CAP_CHANNEL_ID, current.request.clone());

            if current.pending.expects_response() {
                break;
            }

            if let Some(written) = self.queue.pop() {
                self.on_written(written.pending)
            }
        }
    }

    fn on_written(&mut self, pending: Pending) {
        match pending {
            Pending::Write { target, .. } => self.events.push_back(GattEvent::Write { target, result: Ok(()) }),
            Pending::Confirmation { handle } => self.events.push_back(GattEvent::HandleConfirmation { handle }),
            other => log::error!("{:?} was completed without a response", other),
        }
    }

    /// Complete the current command with a response
    fn complete(&mut self, stream: &mut AclStream, response: &[u8]) {
        if let Some(current) = self.queue.pop() {
            if let Some(next) = self.on_response(current.pending, response) {
                self.queue.push(next);
            }

            self.pump(stream)
        }
    }

    pub fn exchange_mtu(&mut self, stream: &mut AclStream, mtu: u16) {
        let command = Command::new(pdu::exchange_mtu_request(mtu), Pending::ExchangeMtu { requested: mtu });

        self.enqueue(stream, command)
    }

    fn services_page(start: u16, filter: Vec<Uuid>, found: Vec<Service>) -> Command {
        Command::new(
            pdu::read_by_group_type_request(start, LAST_HANDLE, PRIMARY_SERVICE_TYPE.into()),
            Pending::DiscoverServices { filter, start, found },
        )
    }

    /// Discover the primary services of the peer
    ///
    /// An empty `filter` reports every service.
    pub fn discover_services(&mut self, stream: &mut AclStream, filter: &[Uuid]) {
        let command = Self::services_page(FIRST_HANDLE, filter.to_vec(), Vec::new());

        self.enqueue(stream, command)
    }

    /// Find a primary service by its UUID
    pub fn find_service_by_uuid(&mut self, stream: &mut AclStream, uuid: Uuid) {
        let request = pdu::find_by_type_value_request(FIRST_HANDLE, LAST_HANDLE, PRIMARY_SERVICE_TYPE, &uuid.to_le_bytes());

        self.enqueue(stream, Command::new(request, Pending::FindService { uuid }))
    }

    fn included_services_page(
        service_uuid: Uuid,
        filter: Vec<Uuid>,
        start: u16,
        end_handle: u16,
        found: Vec<Uuid>,
    ) -> Command {
        Command::new(
            pdu::read_by_type_request(start, end_handle, INCLUDE_TYPE.into()),
            Pending::DiscoverIncludedServices {
                service_uuid,
                filter,
                start,
                end_handle,
                found,
            },
        )
    }

    pub fn discover_included_services(
        &mut self,
        stream: &mut AclStream,
        service_uuid: Uuid,
        filter: &[Uuid],
    ) -> Result<(), Error> {
        let service = self.find_service(service_uuid)?;

        let command = Self::included_services_page(
            service_uuid,
            filter.to_vec(),
            service.start_handle,
            service.end_handle,
            Vec::new(),
        );

        self.enqueue(stream, command);

        Ok(())
    }

    fn characteristics_page(
        service_uuid: Uuid,
        filter: Vec<Uuid>,
        start: u16,
        end_handle: u16,
        found: Vec<Characteristic>,
    ) -> Command {
        Command::new(
            pdu::read_by_type_request(start, end_handle, CHARACTERISTIC_TYPE.into()),
            Pending::DiscoverCharacteristics {
                service_uuid,
                filter,
                start,
                end_handle,
                found,
            },
        )
    }

    pub fn discover_characteristics(
        &mut self,
        stream: &mut AclStream,
        service_uuid: Uuid,
        filter: &[Uuid],
    ) -> Result<(), Error> {
        let service = self.find_service(service_uuid)?;

        let command = Self::characteristics_page(
            service_uuid,
            filter.to_vec(),
            service.start_handle,
            service.end_handle,
            Vec::new(),
        );

        self.enqueue(stream, command);

        Ok(())
    }

    fn descriptors_page(
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        start: u16,
        end_handle: u16,
        found: Vec<Descriptor>,
    ) -> Command {
        Command::new(
            pdu::find_information_request(start, end_handle),
            Pending::DiscoverDescriptors {
                service_uuid,
                characteristic_uuid,
                start,
                end_handle,
                found,
            },
        )
    }

    pub fn discover_descriptors(
        &mut self,
        stream: &mut AclStream,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
    ) -> Result<(), Error> {
        let characteristic = self.find_characteristic(service_uuid, characteristic_uuid)?;

        let start = characteristic.value_handle.saturating_add(1);

        let end_handle = characteristic.end_handle;

        if characteristic.value_handle >= end_handle {
            // there is no room for a descriptor
            self.finish_descriptors(service_uuid, characteristic_uuid, Vec::new());
        } else {
            let command = Self::descriptors_page(service_uuid, characteristic_uuid, start, end_handle, Vec::new());

            self.enqueue(stream, command);
        }

        Ok(())
    }

    fn read_target(&mut self, stream: &mut AclStream, target: Target, handle: u16) {
        let command = Command::new(
            pdu::read_request(handle),
            Pending::Read {
                target,
                handle,
                data: Vec::new(),
            },
        );

        self.enqueue(stream, command)
    }

    fn write_target(&mut self, stream: &mut AclStream, target: Target, handle: u16, data: &[u8], with_response: bool) {
        let request = if with_response {
            pdu::write_request(handle, data)
        } else {
            pdu::write_command(handle, data)
        };

        self.enqueue(stream, Command::new(request, Pending::Write { target, with_response }))
    }

    /// Read the value of a characteristic
    ///
    /// Values longer than what fits in a response are read with blob requests.
    pub fn read(&mut self, stream: &mut AclStream, service_uuid: Uuid, characteristic_uuid: Uuid) -> Result<(), Error> {
        let handle = self.find_characteristic(service_uuid, characteristic_uuid)?.value_handle;

        let target = Target::Characteristic {
            service_uuid,
            characteristic_uuid,
        };

        self.read_target(stream, target, handle);

        Ok(())
    }

    pub fn write(
        &mut self,
        stream: &mut AclStream,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        data: &[u8],
        without_response: bool,
    ) -> Result<(), Error> {
        let handle = self.find_characteristic(service_uuid, characteristic_uuid)?.value_handle;

        let target = Target::Characteristic {
            service_uuid,
            characteristic_uuid,
        };

        self.write_target(stream, target, handle, data, !without_response);

        Ok(())
    }

    /// Read the value of a descriptor
    pub fn read_value(
        &mut self,
        stream: &mut AclStream,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        descriptor_uuid: Uuid,
    ) -> Result<(), Error> {
        let handle = self
            .find_descriptor(service_uuid, characteristic_uuid, descriptor_uuid)?
            .handle;

        let target = Target::Descriptor {
            service_uuid,
            characteristic_uuid,
            descriptor_uuid,
        };

        self.read_target(stream, target, handle);

        Ok(())
    }

    /// Write the value of a descriptor
    pub fn write_value(
        &mut self,
        stream: &mut AclStream,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        descriptor_uuid: Uuid,
        data: &[u8],
    ) -> Result<(), Error> {
        let handle = self
            .find_descriptor(service_uuid, characteristic_uuid, descriptor_uuid)?
            .handle;

        let target = Target::Descriptor {
            service_uuid,
            characteristic_uuid,
            descriptor_uuid,
        };

        self.write_target(stream, target, handle, data, true);

        Ok(())
    }

    pub fn read_handle(&mut self, stream: &mut AclStream, handle: u16) {
        self.read_target(stream, Target::Handle(handle), handle)
    }

    pub fn write_handle(&mut self, stream: &mut AclStream, handle: u16, data: &[u8], without_response: bool) {
        self.write_target(stream, Target::Handle(handle), handle, data, !without_response)
    }

    fn toggle(
        &mut self,
        stream: &mut AclStream,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        configuration: Configuration,
        enable: bool,
    ) -> Result<(), Error> {
        let characteristic = self.find_characteristic(service_uuid, characteristic_uuid)?;

        let request = pdu::read_by_type_request(
            characteristic.start_handle,
            characteristic.end_handle,
            configuration.descriptor_type().into(),
        );

        let pending = Pending::ReadConfiguration {
            service_uuid,
            characteristic_uuid,
            configuration,
            enable,
        };

        self.enqueue(stream, Command::new(request, pending));

        Ok(())
    }

    /// Enable or disable notifications (or indications) of a characteristic
    pub fn notify(
        &mut self,
        stream: &mut AclStream,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        enable: bool,
    ) -> Result<(), Error> {
        self.toggle(stream, service_uuid, characteristic_uuid, Configuration::Notify, enable)
    }

    /// Enable or disable broadcasting of a characteristic
    pub fn broadcast(
        &mut self,
        stream: &mut AclStream,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        enable: bool,
    ) -> Result<(), Error> {
        self.toggle(stream, service_uuid, characteristic_uuid, Configuration::Broadcast, enable)
    }

    /// Process a PDU received on the attribute channel
    pub fn receive(&mut self, stream: &mut AclStream, data: &[u8]) {
        let opcode = match data.first() {
            Some(opcode) => *opcode,
            None => {
                log::debug!("empty ATT PDU received");
                return;
            }
        };

        match ServerPduName::try_from(opcode) {
            Ok(ServerPduName::HandleValueNotification) => return self.on_handle_value(stream, data, false),
            Ok(ServerPduName::HandleValueIndication) => return self.on_handle_value(stream, data, true),
            _ => (),
        }

        if self.queue.current().map_or(false, |current| current.request == data) {
            log::trace!("ignoring the echo of a request");
            return;
        }

        if ClientPduName::is_request(opcode) {
            log::debug!("rejecting request {:#04x} from the peer", opcode);

            let response = pdu::error_response(opcode, 0x0000, pdu::Error::RequestNotSupported);

            stream.write(att::L2CAP_CHANNEL_ID, response);

            return;
        }

        if ServerPduName::try_from(opcode).is_err() {
            log::debug!("ignoring client PDU {:#04x} from the peer", opcode);
            return;
        }

        if self.queue.is_empty() {
            log::debug!("no request is waiting for the ATT PDU {:#04x}", opcode);
            return;
        }

        if opcode == ServerPduName::ErrorResponse.into() && self.security < SecurityLevel::Medium {
            if let Ok(response) = pdu::ErrorResponse::try_from_pdu(data) {
                if response.error.requires_encryption() {
                    log::info!("{}, encrypting the link", response);

                    if self.deferred_error.replace(data.to_vec()).is_none() {
                        stream.encrypt();
                    }

                    return;
                }
            }
        }

        self.complete(stream, data)
    }

    fn on_handle_value(&mut self, stream: &mut AclStream, data: &[u8], indication: bool) {
        let (handle, value) = match pdu::handle_value(data) {
            Some(handle_value) => handle_value,
            None => {
                log::warn!("handle value PDU is too short");
                return;
            }
        };

        self.events.push_back(GattEvent::HandleNotify {
            handle,
            data: value.to_vec(),
        });

        match self.by_value_handle(handle) {
            Some((service_uuid, characteristic_uuid)) => self.events.push_back(GattEvent::Notification {
                service_uuid,
                characteristic_uuid,
                data: value.to_vec(),
            }),
            None => log::warn!("notification of an unknown characteristic with handle {:#06x}", handle),
        }

        if indication {
            let command = Command::new(pdu::handle_value_confirmation(), Pending::Confirmation { handle });

            self.enqueue(stream, command)
        }
    }

    /// The link is now encrypted
    ///
    /// The command that failed for insufficient security is sent again.
    pub fn on_encrypt_change(&mut self, stream: &mut AclStream, enabled: bool) {
        if !enabled {
            self.security = SecurityLevel::Low;
            return;
        }

        self.security = SecurityLevel::Medium;

        if self.deferred_error.take().is_some() {
            if let Some(current) = self.queue.current() {
                log::debug!("resending ATT PDU {:x?} after encryption", current.request);

                stream.write(att::L2CAP_CHANNEL_ID, current.request.clone());
            }
        }
    }

    /// Pairing failed
    ///
    /// The error that started pairing becomes the response of the waiting command.
    pub fn on_encrypt_fail(&mut self, stream: &mut AclStream) {
        self.security = SecurityLevel::Low;

        if let Some(error) = self.deferred_error.take() {
            self.complete(stream, &error)
        }
    }

    /// The connection ended, waiting commands are dropped
    pub fn end(&mut self) {
        self.queue.clear();

        self.deferred_error = None;
    }

    fn on_response(&mut self, pending: Pending, response: &[u8]) -> Option<Command> {
        match pending {
            Pending::ExchangeMtu { requested } => {
                self.on_exchange_mtu(requested, response);
                None
            }
            Pending::DiscoverServices { filter, start, found } => self.on_services(filter, start, found, response),
            Pending::FindService { uuid } => {
                self.on_find_service(uuid, response);
                None
            }
            Pending::DiscoverIncludedServices {
                service_uuid,
                filter,
                start,
                end_handle,
                found,
            } => self.on_included_services(service_uuid, filter, start, end_handle, found, response),
            Pending::DiscoverCharacteristics {
                service_uuid,
                filter,
                start,
                end_handle,
                found,
            } => self.on_characteristics(service_uuid, filter, start, end_handle, found, response),
            Pending::DiscoverDescriptors {
                service_uuid,
                characteristic_uuid,
                start,
                end_handle,
                found,
            } => self.on_descriptors(service_uuid, characteristic_uuid, start, end_handle, found, response),
            Pending::Read { target, handle, data } => self.on_read(target, handle, data, response),
            Pending::Write { target, .. } => {
                let result = pdu::write_response(response);

                self.events.push_back(GattEvent::Write { target, result });

                None
            }
            Pending::ReadConfiguration {
                service_uuid,
                characteristic_uuid,
                configuration,
                enable,
            } => self.on_read_configuration(service_uuid, characteristic_uuid, configuration, enable, response),
            Pending::WriteConfiguration {
                service_uuid,
                characteristic_uuid,
                configuration,
                enable,
            } => {
                let result = pdu::write_response(response).map(|_| enable);

                self.push_configuration_event(service_uuid, characteristic_uuid, configuration, result);

                None
            }
            Pending::Confirmation { .. } => {
                log::error!("a confirmation received a response");
                None
            }
        }
    }

    fn on_exchange_mtu(&mut self, requested: u16, response: &[u8]) {
        match pdu::exchange_mtu_response(response) {
            Ok(server_mtu) => self.mtu = requested.min(server_mtu).max(att::MIN_ATT_MTU_LE),
            Err(e) => log::debug!("MTU exchange failed ({}), keeping the MTU at {}", e, self.mtu),
        }

        self.events.push_back(GattEvent::Mtu(self.mtu))
    }

    fn on_services(&mut self, filter: Vec<Uuid>, start: u16, mut found: Vec<Service>, response: &[u8]) -> Option<Command> {
        let records = pdu::read_by_group_type_response(response).unwrap_or_default();

        if let Some(last_end) = records.last().map(|r| r.end_group_handle) {
            found.extend(records.into_iter().filter_map(|record| {
                Uuid::from_le_slice(&record.value)
                    .map(|uuid| Service::new(uuid, record.handle, record.end_group_handle))
            }));

            if last_end >= start && last_end < LAST_HANDLE {
                return Some(Self::services_page(last_end + 1, filter, found));
            }
        }

        for service in found.iter() {
            match self.services.iter_mut().find(|s| s.uuid == service.uuid) {
                Some(known) => {
                    known.start_handle = service.start_handle;
                    known.end_handle = service.end_handle;
                }
                None => self.services.push(service.clone()),
            }
        }

        found.retain(|service| is_listed(&filter, &service.uuid));

        self.events.push_back(GattEvent::ServicesDiscover(found));

        None
    }

    fn on_find_service(&mut self, uuid: Uuid, response: &[u8]) {
        let range = pdu::find_by_type_value_response(response)
            .ok()
            .and_then(|ranges| ranges.first().copied());

        let service = range.map(|(start_handle, end_handle)| {
            match self.services.iter_mut().find(|s| s.uuid == uuid) {
                Some(known) => {
                    known.start_handle = start_handle;
                    known.end_handle = end_handle;
                    known.clone()
                }
                None => {
                    let service = Service::new(uuid, start_handle, end_handle);

                    self.services.push(service.clone());

                    service
                }
            }
        });

        self.events.push_back(GattEvent::ServiceFound { uuid, service })
    }

    fn on_included_services(
        &mut self,
        service_uuid: Uuid,
        filter: Vec<Uuid>,
        start: u16,
        end_handle: u16,
        mut found: Vec<Uuid>,
        response: &[u8],
    ) -> Option<Command> {
        let records = pdu::read_by_type_response(response).unwrap_or_default();

        if let Some(last) = records.last().map(|r| r.handle) {
            for record in records {
                match ServiceInclude::try_from_value(&record.value) {
                    Some(ServiceInclude {
                        short_service_type: Some(uuid),
                    }) => found.push(Uuid::Short(uuid)),
                    Some(_) => log::debug!("included service at {:#06x} has a 128 bit UUID", record.handle),
                    None => log::warn!("invalid include declaration at {:#06x}", record.handle),
                }
            }

            if last >= start && last < end_handle {
                return Some(Self::included_services_page(service_uuid, filter, last + 1, end_handle, found));
            }
        }

        if let Some(service) = self.services.iter_mut().find(|s| s.uuid == service_uuid) {
            service.included_services = found.clone();
        }

        found.retain(|uuid| is_listed(&filter, uuid));

        self.events.push_back(GattEvent::IncludedServicesDiscover {
            service_uuid,
            included_service_uuids: found,
        });

        None
    }

    fn on_characteristics(
        &mut self,
        service_uuid: Uuid,
        filter: Vec<Uuid>,
        start: u16,
        end_handle: u16,
        mut found: Vec<Characteristic>,
        response: &[u8],
    ) -> Option<Command> {
        let records = pdu::read_by_type_response(response).unwrap_or_default();

        let mut last_value_handle = None;

        for record in records {
            match Declaration::try_from_value(&record.value) {
                Some(declaration) => {
                    last_value_handle = Some(declaration.value_handle);

                    found.push(Characteristic::from_declaration(record.handle, declaration))
                }
                None => log::warn!("invalid characteristic declaration at {:#06x}", record.handle),
            }
        }

        if let Some(last) = last_value_handle {
            if last >= start && last < end_handle {
                return Some(Self::characteristics_page(service_uuid, filter, last + 1, end_handle, found));
            }
        }

        characteristic::back_fill_end_handles(&mut found, end_handle);

        if let Some(service) = self.services.iter_mut().find(|s| s.uuid == service_uuid) {
            service.characteristics = found.clone();
        }

        found.retain(|characteristic| is_listed(&filter, &characteristic.uuid));

        self.events.push_back(GattEvent::CharacteristicsDiscover {
            service_uuid,
            characteristics: found,
        });

        None
    }

    fn on_descriptors(
        &mut self,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        start: u16,
        end_handle: u16,
        mut found: Vec<Descriptor>,
        response: &[u8],
    ) -> Option<Command> {
        let information = pdu::find_information_response(response).unwrap_or_default();

        if let Some(last) = information.last().map(|(handle, _)| *handle) {
            found.extend(information.into_iter().map(|(handle, uuid)| Descriptor { uuid, handle }));

            if last >= start && last < end_handle {
                return Some(Self::descriptors_page(
                    service_uuid,
                    characteristic_uuid,
                    last + 1,
                    end_handle,
                    found,
                ));
            }
        }

        self.finish_descriptors(service_uuid, characteristic_uuid, found);

        None
    }

    fn finish_descriptors(&mut self, service_uuid: Uuid, characteristic_uuid: Uuid, found: Vec<Descriptor>) {
        let descriptors = found.iter().map(|d| d.uuid).collect();

        let characteristic = self
            .services
            .iter_mut()
            .find(|s| s.uuid == service_uuid)
            .and_then(|s| s.characteristics.iter_mut().find(|c| c.uuid == characteristic_uuid));

        if let Some(characteristic) = characteristic {
            characteristic.descriptors = found;
        }

        self.events.push_back(GattEvent::DescriptorsDiscover {
            service_uuid,
            characteristic_uuid,
            descriptors,
        })
    }

    fn on_read(&mut self, target: Target, handle: u16, mut data: Vec<u8>, response: &[u8]) -> Option<Command> {
        let is_blob = !data.is_empty();

        let result = match pdu::read_response(response, is_blob) {
            Ok(value) => {
                data.extend_from_slice(value);

                // a full response means there may be more of the value
                if response.len() == self.mtu as usize {
                    if let Ok(offset) = u16::try_from(data.len()) {
                        return Some(Command::new(
                            pdu::read_blob_request(handle, offset),
                            Pending::Read { target, handle, data },
                        ));
                    }
                }

                Ok(data)
            }
            Err(e) if is_blob => {
                log::debug!("blob read ended with {}", e);

                Ok(data)
            }
            Err(e) => Err(e),
        };

        self.events.push_back(GattEvent::Read { target, result });

        None
    }

    fn on_read_configuration(
        &mut self,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        configuration: Configuration,
        enable: bool,
        response: &[u8],
    ) -> Option<Command> {
        let record = match pdu::read_by_type_response(response) {
            Ok(records) => match records.into_iter().next() {
                Some(record) => record,
                None => {
                    log::warn!("empty configuration descriptor response");

                    let error = att::Error::BadSize {
                        name: "Read By Type Response",
                        len: response.len(),
                    };

                    self.push_configuration_event(service_uuid, characteristic_uuid, configuration, Err(error));

                    return None;
                }
            },
            Err(e) => {
                self.push_configuration_event(service_uuid, characteristic_uuid, configuration, Err(e));
                return None;
            }
        };

        let current = match record.value.as_slice() {
            [a, b, ..] => u16::from_le_bytes([*a, *b]),
            [a] => *a as u16,
            [] => 0,
        };

        let bit = match configuration {
            Configuration::Broadcast => BROADCAST_BIT,
            Configuration::Notify => {
                let notify = self
                    .find_characteristic(service_uuid, characteristic_uuid)
                    .map_or(false, |c| c.has_property(Properties::Notify));

                if notify {
                    NOTIFY_BIT
                } else {
                    INDICATE_BIT
                }
            }
        };

        let value = if enable { current | bit } else { current & !bit };

        Some(Command::new(
            pdu::write_request(record.handle, &value.to_le_bytes()),
            Pending::WriteConfiguration {
                service_uuid,
                characteristic_uuid,
                configuration,
                enable,
            },
        ))
    }

    fn push_configuration_event(
        &mut self,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        configuration: Configuration,
        result: Result<bool, att::Error>,
    ) {
        let event = match configuration {
            Configuration::Notify => GattEvent::Notify {
                service_uuid,
                characteristic_uuid,
                result,
            },
            Configuration::Broadcast => GattEvent::Broadcast {
                service_uuid,
                characteristic_uuid,
                result,
            },
        };

        self.events.push_back(event)
    }
}
