//! The host
//!
//! [`Bindings`] ties the layers of the stack together. It owns the [`HciTransport`], the GAP
//! controller, the long term key store, and one [`Connection`] per live link. Data read from the
//! socket is pushed into the bindings, which routes every decoded event to the layer it belongs
//! to and flushes whatever the layers write back out to the controller.
//!
//! Peers are identified by their *peripheral id*, the address of the peer as lower case hex
//! without separators.

mod connection;

pub use connection::{Connection, EncryptionState};

use crate::config::Config;
use crate::gap::scan::Discovery;
use crate::gap::{self, Gap, GapEvent};
use crate::gatt::{self, GattEvent};
use crate::hci::commands::Disconnect;
use crate::hci::events::{LeConnectionComplete, Role};
use crate::hci::status::Status;
use crate::hci_transport::{AdapterState, HciSocket, HciTransport, SocketError, TransportEvent};
use crate::l2cap::{ChannelIdentifier, StreamOutput};
use crate::sm::keys::{KeyProvisioner, KeyStore};
use crate::sm::toolbox::{AesToolbox, Toolbox};
use crate::sm::SmpEvent;
use crate::{AddressType, BluetoothDeviceAddress, Uuid};
use std::collections::{HashMap, VecDeque};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The peer was never discovered
    UnknownPeripheral(String),
    /// There is no connection with the peer
    NotConnected(String),
    Gatt(gatt::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::UnknownPeripheral(id) => write!(f, "unknown peripheral {}", id),
            Error::NotConnected(id) => write!(f, "not connected to peripheral {}", id),
            Error::Gatt(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl std::error::Error for Error {}

impl From<gatt::Error> for Error {
    fn from(e: gatt::Error) -> Self {
        Error::Gatt(e)
    }
}

/// An event raised by the host
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    StateChange(AdapterState),
    AddressChange {
        address: BluetoothDeviceAddress,
        address_type: AddressType,
    },
    ScanStart {
        filter_duplicates: bool,
    },
    ScanStop,
    /// A scan enable command seen on the socket, possibly sent by another process
    ScanEnableObserved {
        enable: bool,
        filter_duplicates: bool,
    },
    Discover(Discovery),
    AdvertisingStart(Result<(), gap::Error>),
    AdvertisingStop,
    /// The result of [`Bindings::connect`]
    Connect {
        peripheral_id: String,
        result: Result<(), Status>,
    },
    /// A central connected to the local device
    Accept {
        peripheral_id: String,
        address: BluetoothDeviceAddress,
        address_type: AddressType,
    },
    Disconnect {
        peripheral_id: String,
        reason: Status,
    },
    RssiUpdate {
        peripheral_id: String,
        rssi: i8,
    },
    ConnectionUpdate {
        peripheral_id: String,
        /// Milliseconds
        interval: f32,
        latency: u16,
        /// Milliseconds
        supervision_timeout: u32,
    },
    Gatt {
        peripheral_id: String,
        event: GattEvent,
    },
    Security {
        peripheral_id: String,
        event: SmpEvent,
    },
}

/// The bindings of the host to a controller
pub struct Bindings<S, P, T = AesToolbox> {
    config: Config,
    transport: HciTransport<S>,
    gap: Gap,
    provisioner: P,
    keys: KeyStore,
    toolbox: T,
    /// Peers found by scanning, by peripheral id
    peripherals: HashMap<String, (AddressType, BluetoothDeviceAddress)>,
    /// `None` until scanning is started, discoveries are dropped until then
    scan_filter: Option<Vec<Uuid>>,
    /// Connection attempts waiting for the one in progress
    connect_queue: VecDeque<(AddressType, BluetoothDeviceAddress)>,
    connecting: Option<BluetoothDeviceAddress>,
    connections: HashMap<u16, Connection>,
    handles: HashMap<String, u16>,
    advertising: bool,
    events: VecDeque<HostEvent>,
}

impl<S: HciSocket, P: KeyProvisioner> Bindings<S, P, AesToolbox> {
    pub fn new(socket: S, provisioner: P, config: Config) -> Self {
        Self::with_toolbox(socket, provisioner, AesToolbox, config)
    }
}

impl<S: HciSocket, P: KeyProvisioner, T: Toolbox> Bindings<S, P, T> {
    /// Create bindings with a specific implementation of the pairing functions
    pub fn with_toolbox(socket: S, provisioner: P, toolbox: T, config: Config) -> Self {
        Bindings {
            transport: HciTransport::new(socket, &config),
            gap: Gap::new(&config),
            provisioner,
            keys: KeyStore::new(config.adapter_id()),
            toolbox,
            peripherals: HashMap::new(),
            scan_filter: None,
            connect_queue: VecDeque::new(),
            connecting: None,
            connections: HashMap::new(),
            handles: HashMap::new(),
            advertising: false,
            events: VecDeque::new(),
            config,
        }
    }

    pub fn state(&self) -> AdapterState {
        self.transport.state()
    }

    pub fn address(&self) -> Option<BluetoothDeviceAddress> {
        self.transport.address()
    }

    pub fn transport(&self) -> &HciTransport<S> {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut HciTransport<S> {
        &mut self.transport
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    pub fn connection(&self, peripheral_id: &str) -> Option<&Connection> {
        self.handles
            .get(peripheral_id)
            .and_then(|handle| self.connections.get(handle))
    }

    /// Take the events raised since the last call
    pub fn take_events(&mut self) -> VecDeque<HostEvent> {
        std::mem::take(&mut self.events)
    }

    /// Start up the host
    pub fn init(&mut self) {
        self.transport.init();

        self.process();
    }

    /// Check if the adapter went up or down
    ///
    /// The driver of the socket is expected to call this about once a second.
    pub fn poll_dev_up(&mut self) {
        self.transport.poll_dev_up();

        self.process();
    }

    /// Process data read from the socket
    pub fn on_socket_data(&mut self, data: &[u8]) {
        self.transport.on_socket_data(data);

        self.process();
    }

    pub fn on_socket_error(&mut self, error: &SocketError) {
        self.transport.on_socket_error(error);

        self.process();
    }

    /// Start scanning
    ///
    /// Only peers advertising one of `service_uuids` are reported, every peer is reported when
    /// the list is empty.
    pub fn start_scanning(&mut self, service_uuids: &[Uuid], allow_duplicates: bool) {
        self.scan_filter = Some(service_uuids.to_vec());

        self.gap.start_scanning(&mut self.transport, allow_duplicates);

        self.process();
    }

    pub fn stop_scanning(&mut self) {
        self.gap.stop_scanning(&mut self.transport);

        self.process();
    }

    pub fn start_advertising(&mut self, name: &str, service_uuids: &[Uuid]) {
        self.advertising = true;

        self.gap.start_advertising(&mut self.transport, name, service_uuids);

        self.process();
    }

    pub fn start_advertising_ibeacon(&mut self, data: &[u8]) {
        self.advertising = true;

        self.gap.start_advertising_ibeacon(&mut self.transport, data);

        self.process();
    }

    pub fn start_advertising_with_eir_data(&mut self, advertising_data: &[u8], scan_response_data: &[u8]) {
        self.advertising = true;

        self.gap
            .start_advertising_with_eir_data(&mut self.transport, advertising_data, scan_response_data);

        self.process();
    }

    pub fn stop_advertising(&mut self) {
        self.advertising = false;

        self.gap.stop_advertising(&mut self.transport);

        self.process();
    }

    /// Connect to a discovered peer
    ///
    /// Only one connection is created at a time, the attempt is queued behind any attempt in
    /// progress.
    pub fn connect(&mut self, peripheral_id: &str) -> Result<(), Error> {
        let peer = *self
            .peripherals
            .get(peripheral_id)
            .ok_or_else(|| Error::UnknownPeripheral(peripheral_id.to_string()))?;

        self.connect_queue.push_back(peer);

        if self.connecting.is_none() {
            self.create_next_connection();
        }

        self.process();

        Ok(())
    }

    fn create_next_connection(&mut self) {
        if let Some((address_type, address)) = self.connect_queue.pop_front() {
            log::debug!("creating a connection to {}", address);

            self.connecting = Some(address);

            self.transport.create_le_connection(address, address_type);
        }
    }

    fn handle_of(&self, peripheral_id: &str) -> Result<u16, Error> {
        self.handles
            .get(peripheral_id)
            .copied()
            .ok_or_else(|| Error::NotConnected(peripheral_id.to_string()))
    }

    pub fn disconnect(&mut self, peripheral_id: &str) -> Result<(), Error> {
        let handle = self.handle_of(peripheral_id)?;

        self.transport.disconnect(handle, Disconnect::DEFAULT_REASON);

        Ok(())
    }

    pub fn update_rssi(&mut self, peripheral_id: &str) -> Result<(), Error> {
        let handle = self.handle_of(peripheral_id)?;

        self.transport.read_rssi(handle);

        Ok(())
    }

    /// Run an operation on the connection with a peer and flush what it writes
    fn with_connection<F>(&mut self, peripheral_id: &str, operation: F) -> Result<(), Error>
    where
        F: FnOnce(&mut Connection) -> Result<(), gatt::Error>,
    {
        let handle = self.handle_of(peripheral_id)?;

        let result = match self.connections.get_mut(&handle) {
            Some(connection) => operation(connection),
            None => return Err(Error::NotConnected(peripheral_id.to_string())),
        };

        self.service_connection(handle);

        self.process();

        result.map_err(Error::from)
    }

    /// Pair with the peer
    ///
    /// As a central this starts pairing, as a peripheral the central is asked to start pairing.
    pub fn encrypt(&mut self, peripheral_id: &str) -> Result<(), Error> {
        self.with_connection(peripheral_id, |c| {
            c.stream.encrypt();
            Ok(())
        })
    }

    pub fn exchange_mtu(&mut self, peripheral_id: &str, mtu: u16) -> Result<(), Error> {
        self.with_connection(peripheral_id, |c| {
            c.gatt.exchange_mtu(&mut c.stream, mtu);
            Ok(())
        })
    }

    pub fn discover_services(&mut self, peripheral_id: &str, service_uuids: &[Uuid]) -> Result<(), Error> {
        self.with_connection(peripheral_id, |c| {
            c.gatt.discover_services(&mut c.stream, service_uuids);
            Ok(())
        })
    }

    pub fn find_service(&mut self, peripheral_id: &str, service_uuid: Uuid) -> Result<(), Error> {
        self.with_connection(peripheral_id, |c| {
            c.gatt.find_service_by_uuid(&mut c.stream, service_uuid);
            Ok(())
        })
    }

    pub fn discover_included_services(
        &mut self,
        peripheral_id: &str,
        service_uuid: Uuid,
        service_uuids: &[Uuid],
    ) -> Result<(), Error> {
        self.with_connection(peripheral_id, |c| {
            c.gatt
                .discover_included_services(&mut c.stream, service_uuid, service_uuids)
        })
    }

    pub fn discover_characteristics(
        &mut self,
        peripheral_id: &str,
        service_uuid: Uuid,
        characteristic_uuids: &[Uuid],
    ) -> Result<(), Error> {
        self.with_connection(peripheral_id, |c| {
            c.gatt
                .discover_characteristics(&mut c.stream, service_uuid, characteristic_uuids)
        })
    }

    pub fn discover_descriptors(
        &mut self,
        peripheral_id: &str,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
    ) -> Result<(), Error> {
        self.with_connection(peripheral_id, |c| {
            c.gatt
                .discover_descriptors(&mut c.stream, service_uuid, characteristic_uuid)
        })
    }

    pub fn read(&mut self, peripheral_id: &str, service_uuid: Uuid, characteristic_uuid: Uuid) -> Result<(), Error> {
        self.with_connection(peripheral_id, |c| {
            c.gatt.read(&mut c.stream, service_uuid, characteristic_uuid)
        })
    }

    pub fn write(
        &mut self,
        peripheral_id: &str,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        data: &[u8],
        without_response: bool,
    ) -> Result<(), Error> {
        self.with_connection(peripheral_id, |c| {
            c.gatt
                .write(&mut c.stream, service_uuid, characteristic_uuid, data, without_response)
        })
    }

    pub fn broadcast(
        &mut self,
        peripheral_id: &str,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        enable: bool,
    ) -> Result<(), Error> {
        self.with_connection(peripheral_id, |c| {
            c.gatt
                .broadcast(&mut c.stream, service_uuid, characteristic_uuid, enable)
        })
    }

    pub fn notify(
        &mut self,
        peripheral_id: &str,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        enable: bool,
    ) -> Result<(), Error> {
        self.with_connection(peripheral_id, |c| {
            c.gatt.notify(&mut c.stream, service_uuid, characteristic_uuid, enable)
        })
    }

    pub fn read_value(
        &mut self,
        peripheral_id: &str,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        descriptor_uuid: Uuid,
    ) -> Result<(), Error> {
        self.with_connection(peripheral_id, |c| {
            c.gatt
                .read_value(&mut c.stream, service_uuid, characteristic_uuid, descriptor_uuid)
        })
    }

    pub fn write_value(
        &mut self,
        peripheral_id: &str,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        descriptor_uuid: Uuid,
        data: &[u8],
    ) -> Result<(), Error> {
        self.with_connection(peripheral_id, |c| {
            c.gatt.write_value(
                &mut c.stream,
                service_uuid,
                characteristic_uuid,
                descriptor_uuid,
                data,
            )
        })
    }

    pub fn read_handle(&mut self, peripheral_id: &str, handle: u16) -> Result<(), Error> {
        self.with_connection(peripheral_id, |c| {
            c.gatt.read_handle(&mut c.stream, handle);
            Ok(())
        })
    }

    pub fn write_handle(
        &mut self,
        peripheral_id: &str,
        handle: u16,
        data: &[u8],
        without_response: bool,
    ) -> Result<(), Error> {
        self.with_connection(peripheral_id, |c| {
            c.gatt.write_handle(&mut c.stream, handle, data, without_response);
            Ok(())
        })
    }

    /// Remove every long term key from the controller
    pub fn clear_long_term_keys(&mut self) {
        self.keys.clear(&mut self.provisioner)
    }

    /// Stop scanning, disconnect from every peer, and stop advertising
    pub fn shutdown(&mut self) {
        log::info!("shutting down the host");

        self.gap.stop_scanning(&mut self.transport);

        let mut handles: Vec<u16> = self.connections.keys().copied().collect();

        handles.sort_unstable();

        for handle in handles {
            self.transport.disconnect(handle, Disconnect::DEFAULT_REASON)
        }

        self.advertising = false;

        self.gap.stop_advertising(&mut self.transport);

        self.process();
    }

    /// Dispatch everything decoded by the transport and raised by the GAP controller
    fn process(&mut self) {
        loop {
            let events = self.transport.take_events();

            if events.is_empty() {
                break;
            }

            for event in events {
                self.on_transport_event(event)
            }
        }

        self.process_gap_events();
    }

    fn process_gap_events(&mut self) {
        for event in self.gap.take_events() {
            let event = match event {
                GapEvent::ScanStart { filter_duplicates } => HostEvent::ScanStart { filter_duplicates },
                GapEvent::ScanStop => HostEvent::ScanStop,
                GapEvent::AdvertisingStart(result) => HostEvent::AdvertisingStart(result),
                GapEvent::AdvertisingStop => HostEvent::AdvertisingStop,
                GapEvent::Discover(discovery) => match self.on_discovery(discovery) {
                    Some(event) => event,
                    None => continue,
                },
            };

            self.events.push_back(event)
        }
    }

    fn on_discovery(&mut self, discovery: Discovery) -> Option<HostEvent> {
        let filter = self.scan_filter.as_ref()?;

        let listed = filter.is_empty()
            || discovery
                .advertisement
                .service_uuids
                .iter()
                .any(|uuid| filter.contains(uuid));

        listed.then(|| HostEvent::Discover(discovery))
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        self.gap.on_transport_event(&event);

        match event {
            TransportEvent::StateChange(state) => self.events.push_back(HostEvent::StateChange(state)),
            TransportEvent::AddressChange { address, address_type } => self
                .events
                .push_back(HostEvent::AddressChange { address, address_type }),
            TransportEvent::ScanEnableCommand {
                enable,
                filter_duplicates,
            } => self.events.push_back(HostEvent::ScanEnableObserved {
                enable,
                filter_duplicates,
            }),
            TransportEvent::AdvertisingReport(report) => {
                self.peripherals
                    .insert(report.address.peripheral_id(), (report.address_type, report.address));
            }
            TransportEvent::LeConnectionComplete(result) => self.on_connection_complete(result),
            TransportEvent::LeConnectionUpdateComplete(update) => {
                if let Some(connection) = self.connections.get(&update.handle) {
                    self.events.push_back(HostEvent::ConnectionUpdate {
                        peripheral_id: connection.peripheral_id(),
                        interval: update.interval,
                        latency: update.latency,
                        supervision_timeout: update.supervision_timeout,
                    })
                }
            }
            TransportEvent::DisconnectionComplete { handle, reason } => self.on_disconnection(handle, reason),
            TransportEvent::RssiRead { handle, rssi } => match self.connections.get(&handle) {
                Some(connection) => self.events.push_back(HostEvent::RssiUpdate {
                    peripheral_id: connection.peripheral_id(),
                    rssi,
                }),
                None => log::warn!("RSSI of unknown handle {:#06x}", handle),
            },
            TransportEvent::AclData(data) => {
                let Some(connection) = self.connections.get_mut(&data.handle) else {
                    log::warn!("ACL data for unknown handle {:#06x}", data.handle);
                    return;
                };

                match ChannelIdentifier::from_val(data.channel_id) {
                    ChannelIdentifier::AttributeProtocol => {
                        connection.gatt.receive(&mut connection.stream, &data.payload)
                    }
                    ChannelIdentifier::SecurityManagerProtocol => {
                        connection
                            .smp
                            .receive(&mut connection.stream, &mut self.toolbox, &data.payload)
                    }
                    channel => log::debug!("data for unused channel {:?} dropped", channel),
                }

                self.service_connection(data.handle)
            }
            TransportEvent::EncryptionChange { handle, enabled } => {
                let Some(connection) = self.connections.get_mut(&handle) else {
                    log::warn!("encryption change of unknown handle {:#06x}", handle);
                    return;
                };

                log::info!("encryption of handle {:#06x} enabled: {}", handle, enabled);

                connection.stream.push_encrypt(enabled);

                connection.smp.on_encrypt_change(&mut connection.stream, enabled);

                if enabled {
                    connection.encryption = EncryptionState::Encrypted;

                    connection.gatt.on_encrypt_change(&mut connection.stream, true);
                } else {
                    connection.encryption = EncryptionState::None;

                    connection.gatt.on_encrypt_fail(&mut connection.stream);
                }

                self.service_connection(handle)
            }
            TransportEvent::LongTermKeyRequest {
                handle,
                random,
                diversifier,
            } => self.on_long_term_key_request(handle, random, diversifier),
            TransportEvent::LongTermKeyNegativeReplied { handle } => {
                if let Some(connection) = self.connections.get_mut(&handle) {
                    connection.smp.on_ltk_negative_reply(&mut connection.stream);

                    self.service_connection(handle)
                }
            }
            _ => (),
        }

        self.process_gap_events();
    }

    fn on_connection_complete(&mut self, result: Result<LeConnectionComplete, Status>) {
        match result {
            Ok(complete) => {
                let local_address = self.transport.address().unwrap_or_default();

                let mut connection = Connection::new(&complete, self.transport.address_type(), local_address);

                let peripheral_id = connection.peripheral_id();

                log::info!(
                    "connected to {} as {:?} (handle {:#06x})",
                    complete.peer_address,
                    complete.role,
                    complete.handle
                );

                let event = match complete.role {
                    Role::Central => {
                        connection
                            .gatt
                            .exchange_mtu(&mut connection.stream, self.config.preferred_mtu);

                        HostEvent::Connect {
                            peripheral_id: peripheral_id.clone(),
                            result: Ok(()),
                        }
                    }
                    Role::Peripheral => HostEvent::Accept {
                        peripheral_id: peripheral_id.clone(),
                        address: complete.peer_address,
                        address_type: complete.peer_address_type,
                    },
                };

                self.handles.insert(peripheral_id, complete.handle);

                self.connections.insert(complete.handle, connection);

                self.events.push_back(event);

                self.service_connection(complete.handle);

                if complete.role == Role::Central {
                    self.connecting = None;

                    self.create_next_connection();
                }
            }
            Err(status) => {
                log::warn!("connection failed: {}", status);

                match self.connecting.take() {
                    Some(address) => self.events.push_back(HostEvent::Connect {
                        peripheral_id: address.peripheral_id(),
                        result: Err(status),
                    }),
                    None => log::warn!("failed connection without a connection attempt"),
                }

                self.create_next_connection();
            }
        }
    }

    fn on_disconnection(&mut self, handle: u16, reason: Status) {
        let Some(mut connection) = self.connections.remove(&handle) else {
            log::warn!("disconnection of unknown handle {:#06x}", handle);
            return;
        };

        let peripheral_id = connection.peripheral_id();

        log::info!("disconnected from {}: {}", connection.peer_address, reason);

        connection.end();

        self.handles.remove(&peripheral_id);

        self.transport.clear_acl_buffer(handle);

        self.events.push_back(HostEvent::Disconnect { peripheral_id, reason });

        if self.advertising {
            self.gap.restart_advertising(&mut self.transport);
        }
    }

    fn on_long_term_key_request(&mut self, handle: u16, random: [u8; 8], diversifier: [u8; 2]) {
        let Some(connection) = self.connections.get_mut(&handle) else {
            log::warn!("long term key request of unknown handle {:#06x}", handle);
            return;
        };

        let key = connection.smp.short_term_key().or_else(|| {
            self.keys
                .find(&connection.peer_address, diversifier, random)
                .map(|record| record.key)
        });

        match key {
            Some(key) => {
                connection.encryption = EncryptionState::Pending;

                self.transport.le_long_term_key_reply(handle, key)
            }
            None => {
                log::info!("no long term key for {}", connection.peer_address);

                self.transport.le_long_term_key_negative_reply(handle)
            }
        }
    }

    /// Let the protocols of a connection react to each other and flush their output
    fn service_connection(&mut self, handle: u16) {
        let Some(connection) = self.connections.get_mut(&handle) else {
            return;
        };

        let peripheral_id = connection.peripheral_id();

        loop {
            if connection.stream.take_encrypt_request() {
                connection.encryption = EncryptionState::Pending;

                connection.smp.request_pairing(&mut connection.stream);
            }

            for event in connection.smp.take_events() {
                match &event {
                    SmpEvent::LongTermKey(record) => self.keys.add(&mut self.provisioner, record.clone()),
                    SmpEvent::Fail(reason) => {
                        log::info!("pairing with {} failed: {}", connection.peer_address, reason);

                        connection.encryption = EncryptionState::None;

                        connection.gatt.on_encrypt_fail(&mut connection.stream);
                    }
                    SmpEvent::Paired => log::info!("paired with {}", connection.peer_address),
                    _ => (),
                }

                self.events.push_back(HostEvent::Security {
                    peripheral_id: peripheral_id.clone(),
                    event,
                })
            }

            for event in connection.gatt.take_events() {
                self.events.push_back(HostEvent::Gatt {
                    peripheral_id: peripheral_id.clone(),
                    event,
                })
            }

            let outbound = connection.stream.take_outbound();

            if outbound.is_empty() {
                break;
            }

            for output in outbound {
                match output {
                    StreamOutput::Data { channel_id, payload } => {
                        self.transport
                            .write_acl_data(handle, channel_id.to_val(), &payload)
                    }
                    StreamOutput::StartEncryption {
                        random,
                        diversifier,
                        key,
                    } => {
                        connection.encryption = EncryptionState::Pending;

                        self.transport
                            .start_le_encryption(handle, random, diversifier, key)
                    }
                }
            }
        }
    }
}
