//! Drives the host bindings with the packets a controller would send

use able::config::Config;
use able::gatt::{GattEvent, Target};
use able::hci::acl::build_acl_packet;
use able::hci::status::Status;
use able::hci::{opcodes, Opcode};
use able::hci_transport::{AdapterState, HciSocket, SocketError, SocketFilter};
use able::host::{Bindings, EncryptionState, Error, HostEvent};
use able::sm::keys::{KeyProvisioner, LongTermKeyRecord};
use able::sm::toolbox::{self, u128_from_le_slice, Toolbox};
use able::sm::{PairingFailedReason, SmpEvent};
use able::{BluetoothDeviceAddress, Uuid};
use std::cell::RefCell;
use std::rc::Rc;

const PEER: BluetoothDeviceAddress = BluetoothDeviceAddress([0x66, 0x55, 0x44, 0x33, 0x22, 0x11]);
const PEER_ID: &str = "112233445566";

const OTHER: BluetoothDeviceAddress = BluetoothDeviceAddress([0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
const OTHER_ID: &str = "010203040506";

const ATT: u16 = 0x0004;
const SMP: u16 = 0x0006;

const CENTRAL_RANDOM: u128 = 0x5783D52156AD6F0E6388274EC6702EE0;

#[derive(Default)]
struct FakeSocket {
    written: Vec<Vec<u8>>,
}

impl HciSocket for FakeSocket {
    fn write(&mut self, packet: &[u8]) -> Result<(), SocketError> {
        self.written.push(packet.to_vec());
        Ok(())
    }

    fn set_filter(&mut self, _: &SocketFilter) -> Result<(), SocketError> {
        Ok(())
    }

    fn is_dev_up(&mut self) -> bool {
        true
    }
}

/// Records every key list loaded into the controller
#[derive(Clone, Default)]
struct Provisioner(Rc<RefCell<Vec<Vec<LongTermKeyRecord>>>>);

impl KeyProvisioner for Provisioner {
    type Error = String;

    fn load_long_term_keys(&mut self, _: u16, records: &[LongTermKeyRecord]) -> Result<(), String> {
        self.0.borrow_mut().push(records.to_vec());
        Ok(())
    }
}

struct FixedToolbox;

impl Toolbox for FixedToolbox {
    fn c1(&self, k: u128, r: u128, pres: u128, preq: u128, iat: bool, ia: u128, rat: bool, ra: u128) -> u128 {
        toolbox::c1(k, r, pres, preq, iat, ia, rat, ra)
    }

    fn s1(&self, k: u128, r1: u128, r2: u128) -> u128 {
        toolbox::s1(k, r1, r2)
    }

    fn rand(&mut self) -> u128 {
        CENTRAL_RANDOM
    }
}

type TestBindings = Bindings<FakeSocket, Provisioner, FixedToolbox>;

fn bindings() -> (TestBindings, Provisioner) {
    let _ = simplelog::TestLogger::init(simplelog::LevelFilter::Trace, simplelog::Config::default());

    let provisioner = Provisioner::default();

    let bindings = Bindings::with_toolbox(FakeSocket::default(), provisioner.clone(), FixedToolbox, Config::default());

    (bindings, provisioner)
}

fn command_complete(opcode: Opcode, parameters: &[u8]) -> Vec<u8> {
    let mut packet = vec![0x04, 0x0e, (3 + parameters.len()) as u8, 0x01];

    packet.extend_from_slice(&opcode.val().to_le_bytes());
    packet.extend_from_slice(parameters);

    packet
}

fn connection_complete(handle: u16, role: u8, address: BluetoothDeviceAddress) -> Vec<u8> {
    let mut packet = vec![0x04, 0x3e, 0x13, 0x01, 0x00];

    packet.extend_from_slice(&handle.to_le_bytes());
    packet.push(role);
    packet.push(0x01); // random address
    packet.extend_from_slice(&address.0);
    packet.extend_from_slice(&[0x08, 0x00, 0x00, 0x00, 0xc8, 0x00, 0x00]);

    packet
}

fn advertising_report(event_type: u8, address: BluetoothDeviceAddress, data: &[u8]) -> Vec<u8> {
    let mut packet = vec![0x04, 0x3e, 0x00, 0x02, 0x01, event_type, 0x01];

    packet.extend_from_slice(&address.0);
    packet.push(data.len() as u8);
    packet.extend_from_slice(data);
    packet.push(0xc4);

    packet[2] = (packet.len() - 3) as u8;

    packet
}

fn disconnection_complete(handle: u16) -> Vec<u8> {
    let [lo, hi] = handle.to_le_bytes();

    vec![0x04, 0x05, 0x04, 0x00, lo, hi, 0x13]
}

fn encryption_change(handle: u16, enabled: bool) -> Vec<u8> {
    let [lo, hi] = handle.to_le_bytes();

    vec![0x04, 0x08, 0x04, 0x00, lo, hi, enabled.into()]
}

fn take_written(bindings: &mut TestBindings) -> Vec<Vec<u8>> {
    std::mem::take(&mut bindings.transport_mut().socket_mut().written)
}

fn commands(written: &[Vec<u8>]) -> Vec<u16> {
    written
        .iter()
        .filter(|p| p[0] == 0x01)
        .map(|p| u16::from_le_bytes([p[1], p[2]]))
        .collect()
}

fn acl_payloads(written: &[Vec<u8>], channel_id: u16) -> Vec<Vec<u8>> {
    written
        .iter()
        .filter(|p| p[0] == 0x02 && u16::from_le_bytes([p[7], p[8]]) == channel_id)
        .map(|p| p[9..].to_vec())
        .collect()
}

fn with_code(code: u8, value: u128) -> Vec<u8> {
    let mut pdu = vec![code];

    pdu.extend_from_slice(&value.to_le_bytes());

    pdu
}

/// Discover the peer and connect to it as the central on handle 0x40
fn connect_to_peer(bindings: &mut TestBindings) {
    bindings.on_socket_data(&advertising_report(0x00, PEER, &[0x02, 0x01, 0x06]));

    bindings.connect(PEER_ID).unwrap();

    bindings.on_socket_data(&connection_complete(0x40, 0x00, PEER));

    // MTU exchange at setup
    bindings.on_socket_data(&build_acl_packet(0x40, ATT, &[0x03, 0x00, 0x01]));

    take_written(bindings);
    bindings.take_events();
}

#[test]
fn powering_on() {
    let (mut bindings, _) = bindings();

    bindings.init();

    assert_eq!(
        vec![
            opcodes::SET_EVENT_MASK.val(),
            opcodes::LE_SET_EVENT_MASK.val(),
            opcodes::READ_LOCAL_VERSION_INFORMATION.val(),
            opcodes::READ_BD_ADDR.val(),
        ],
        commands(&take_written(&mut bindings))
    );

    bindings.on_socket_data(&command_complete(
        opcodes::READ_LOCAL_VERSION_INFORMATION,
        &[0x00, 0x09, 0x00, 0x00, 0x09, 0x0f, 0x00, 0x00, 0x00],
    ));

    assert_eq!(
        vec![
            opcodes::LE_SET_SCAN_ENABLE.val(),
            opcodes::LE_SET_SCAN_PARAMETERS.val(),
            opcodes::LE_SET_ADVERTISING_PARAMETERS.val(),
        ],
        commands(&take_written(&mut bindings))
    );

    bindings.on_socket_data(&command_complete(opcodes::LE_SET_SCAN_PARAMETERS, &[0x00]));

    let mut read_bd_addr = vec![0x00];
    read_bd_addr.extend_from_slice(&OTHER.0);

    bindings.on_socket_data(&command_complete(opcodes::READ_BD_ADDR, &read_bd_addr));

    let events: Vec<_> = bindings.take_events().into_iter().collect();

    assert!(events.contains(&HostEvent::StateChange(AdapterState::PoweredOn)));
    assert!(events.contains(&HostEvent::AddressChange {
        address: OTHER,
        address_type: able::AddressType::Public
    }));
    assert_eq!(Some(OTHER), bindings.address());
}

#[test]
fn discoveries_are_filtered() {
    let (mut bindings, _) = bindings();

    let heart_rate = [0x03, 0x03, 0x0d, 0x18];
    let battery = [0x03, 0x03, 0x0f, 0x18];

    // dropped before scanning is started
    bindings.on_socket_data(&advertising_report(0x00, PEER, &heart_rate));
    bindings.on_socket_data(&advertising_report(0x00, PEER, &heart_rate));

    assert!(bindings.take_events().is_empty());

    bindings.start_scanning(&[Uuid::Short(0x180d)], false);

    bindings.on_socket_data(&command_complete(opcodes::LE_SET_SCAN_ENABLE, &[0x00]));

    bindings.on_socket_data(&advertising_report(0x00, OTHER, &battery));
    bindings.on_socket_data(&advertising_report(0x00, OTHER, &battery));
    bindings.on_socket_data(&advertising_report(0x04, PEER, &[0x04, 0x09, b'h', b'r', b'm']));

    let events: Vec<_> = bindings.take_events().into_iter().collect();

    assert_eq!(HostEvent::ScanStart { filter_duplicates: true }, events[0]);

    let discovered: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            HostEvent::Discover(discovery) => Some(discovery),
            _ => None,
        })
        .collect();

    assert_eq!(1, discovered.len());
    assert_eq!(PEER_ID, discovered[0].peripheral_id());
    assert_eq!(Some("hrm".to_string()), discovered[0].advertisement.local_name);
    assert_eq!(vec![Uuid::Short(0x180d)], discovered[0].advertisement.service_uuids);
}

#[test]
fn connections_are_created_one_at_a_time() {
    let (mut bindings, _) = bindings();

    assert_eq!(
        Err(Error::UnknownPeripheral(PEER_ID.to_string())),
        bindings.connect(PEER_ID)
    );

    bindings.on_socket_data(&advertising_report(0x00, PEER, &[]));
    bindings.on_socket_data(&advertising_report(0x00, OTHER, &[]));

    bindings.connect(PEER_ID).unwrap();
    bindings.connect(OTHER_ID).unwrap();

    assert_eq!(
        vec![opcodes::LE_CREATE_CONNECTION.val()],
        commands(&take_written(&mut bindings))
    );

    bindings.on_socket_data(&connection_complete(0x40, 0x00, PEER));

    let written = take_written(&mut bindings);

    // the MTU exchange of the new connection and the next connection attempt
    assert_eq!(vec![vec![0x02, 0x00, 0x01]], acl_payloads(&written, ATT));
    assert_eq!(vec![opcodes::LE_CREATE_CONNECTION.val()], commands(&written));

    assert_eq!(
        Some(HostEvent::Connect {
            peripheral_id: PEER_ID.to_string(),
            result: Ok(())
        }),
        bindings.take_events().pop_front()
    );

    // command status: command disallowed
    let [lo, hi] = opcodes::LE_CREATE_CONNECTION.val().to_le_bytes();

    bindings.on_socket_data(&[0x04, 0x0f, 0x04, 0x0c, 0x01, lo, hi]);

    assert_eq!(
        Some(HostEvent::Connect {
            peripheral_id: OTHER_ID.to_string(),
            result: Err(Status::CommandDisallowed)
        }),
        bindings.take_events().pop_front()
    );

    bindings.on_socket_data(&build_acl_packet(0x40, ATT, &[0x03, 0x00, 0x01]));

    assert_eq!(
        Some(HostEvent::Gatt {
            peripheral_id: PEER_ID.to_string(),
            event: GattEvent::Mtu(256)
        }),
        bindings.take_events().pop_front()
    );
}

#[test]
fn insufficient_authentication_pairs_and_resends() {
    let (mut bindings, provisioner) = bindings();

    connect_to_peer(&mut bindings);

    bindings.read_handle(PEER_ID, 0x0003).unwrap();

    assert_eq!(
        vec![vec![0x0a, 0x03, 0x00]],
        acl_payloads(&take_written(&mut bindings), ATT)
    );

    // insufficient authentication
    bindings.on_socket_data(&build_acl_packet(0x40, ATT, &[0x01, 0x0a, 0x03, 0x00, 0x05]));

    let preq = [0x01, 0x03, 0x00, 0x01, 0x10, 0x00, 0x01];

    assert_eq!(vec![preq.to_vec()], acl_payloads(&take_written(&mut bindings), SMP));

    assert_eq!(
        Some(EncryptionState::Pending),
        bindings.connection(PEER_ID).map(|c| c.encryption())
    );

    let pres = [0x02, 0x03, 0x00, 0x01, 0x10, 0x00, 0x01];

    bindings.on_socket_data(&build_acl_packet(0x40, SMP, &pres));

    let confirm = |random| {
        toolbox::c1(
            0,
            random,
            u128_from_le_slice(&pres),
            u128_from_le_slice(&preq),
            false,
            0,
            true,
            u128_from_le_slice(&PEER.0),
        )
    };

    assert_eq!(
        vec![with_code(0x03, confirm(CENTRAL_RANDOM))],
        acl_payloads(&take_written(&mut bindings), SMP)
    );

    let peer_random = 0x0123_4567_89ab_cdef_0011_2233_4455_6677;

    bindings.on_socket_data(&build_acl_packet(0x40, SMP, &with_code(0x03, confirm(peer_random))));

    assert_eq!(
        vec![with_code(0x04, CENTRAL_RANDOM)],
        acl_payloads(&take_written(&mut bindings), SMP)
    );

    bindings.on_socket_data(&build_acl_packet(0x40, SMP, &with_code(0x04, peer_random)));

    let short_term_key = toolbox::s1(0, peer_random, CENTRAL_RANDOM).to_le_bytes();

    let written = take_written(&mut bindings);

    assert_eq!(vec![opcodes::LE_START_ENCRYPTION.val()], commands(&written));

    // handle, Rand, EDIV, then the key
    assert_eq!(&short_term_key[..], &written[0][16..32]);

    assert_eq!(1, bindings.keys().records().len());
    assert_eq!(short_term_key, bindings.keys().records()[0].key);
    assert_eq!(PEER, provisioner.0.borrow().last().unwrap()[0].peer_address);

    bindings.on_socket_data(&encryption_change(0x40, true));

    // the read is sent again
    assert_eq!(
        vec![vec![0x0a, 0x03, 0x00]],
        acl_payloads(&take_written(&mut bindings), ATT)
    );

    bindings.on_socket_data(&build_acl_packet(0x40, ATT, &[0x0b, 1, 2, 3]));

    let events: Vec<_> = bindings.take_events().into_iter().collect();

    assert!(events.contains(&HostEvent::Security {
        peripheral_id: PEER_ID.to_string(),
        event: SmpEvent::Paired
    }));

    assert_eq!(
        Some(&HostEvent::Gatt {
            peripheral_id: PEER_ID.to_string(),
            event: GattEvent::Read {
                target: Target::Handle(0x0003),
                result: Ok(vec![1, 2, 3])
            }
        }),
        events.last()
    );

    assert_eq!(
        Some(EncryptionState::Encrypted),
        bindings.connection(PEER_ID).map(|c| c.encryption())
    );
}

#[test]
fn missing_long_term_key_fails_pairing() {
    let (mut bindings, _) = bindings();

    bindings.on_socket_data(&connection_complete(0x41, 0x01, PEER));

    assert_eq!(
        Some(HostEvent::Accept {
            peripheral_id: PEER_ID.to_string(),
            address: PEER,
            address_type: able::AddressType::Random
        }),
        bindings.take_events().pop_front()
    );

    bindings.on_socket_data(&[0x04, 0x3e, 0x0d, 0x05, 0x41, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);

    assert_eq!(
        vec![opcodes::LE_LONG_TERM_KEY_REQUEST_NEGATIVE_REPLY.val()],
        commands(&take_written(&mut bindings))
    );

    bindings.on_socket_data(&command_complete(
        opcodes::LE_LONG_TERM_KEY_REQUEST_NEGATIVE_REPLY,
        &[0x00, 0x41, 0x00],
    ));

    assert_eq!(vec![vec![0x05, 0x08]], acl_payloads(&take_written(&mut bindings), SMP));

    assert_eq!(
        Some(HostEvent::Security {
            peripheral_id: PEER_ID.to_string(),
            event: SmpEvent::Fail(PairingFailedReason::UnspecifiedReason)
        }),
        bindings.take_events().pop_front()
    );
}

#[test]
fn disconnect_restarts_advertising() {
    let (mut bindings, _) = bindings();

    bindings.start_advertising("dev", &[]);

    bindings.on_socket_data(&command_complete(opcodes::LE_SET_ADVERTISE_ENABLE, &[0x00]));

    bindings.on_socket_data(&connection_complete(0x41, 0x01, PEER));

    take_written(&mut bindings);
    bindings.take_events();

    bindings.on_socket_data(&disconnection_complete(0x41));

    assert_eq!(
        Some(HostEvent::Disconnect {
            peripheral_id: PEER_ID.to_string(),
            reason: Status::RemoteUserTerminatedConnection
        }),
        bindings.take_events().pop_front()
    );

    assert_eq!(
        vec![opcodes::LE_SET_ADVERTISE_ENABLE.val()],
        commands(&take_written(&mut bindings))
    );

    assert!(bindings.connection(PEER_ID).is_none());

    assert_eq!(
        Err(Error::NotConnected(PEER_ID.to_string())),
        bindings.read_handle(PEER_ID, 0x0003)
    );

    // unknown handle
    bindings.on_socket_data(&disconnection_complete(0x41));

    assert!(bindings.take_events().is_empty());
}

#[test]
fn unknown_attributes_are_errors() {
    let (mut bindings, _) = bindings();

    connect_to_peer(&mut bindings);

    assert_eq!(
        Err(Error::Gatt(able::gatt::Error::UnknownService(Uuid::Short(0x180d)))),
        bindings.read(PEER_ID, Uuid::Short(0x180d), Uuid::Short(0x2a37))
    );

    assert!(take_written(&mut bindings).is_empty());
}

#[test]
fn shutdown_disconnects_everything() {
    let (mut bindings, _) = bindings();

    connect_to_peer(&mut bindings);

    bindings.shutdown();

    let written = take_written(&mut bindings);

    assert_eq!(
        vec![
            opcodes::LE_SET_SCAN_ENABLE.val(),
            opcodes::DISCONNECT.val(),
            opcodes::LE_SET_ADVERTISE_ENABLE.val(),
        ],
        commands(&written)
    );

    assert_eq!(vec![0x01, 0x06, 0x04, 0x03, 0x40, 0x00, 0x13], written[1]);
}
