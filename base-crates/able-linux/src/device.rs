//! Linux Bluetooth device control
//!
//! These are the pieces of the kernel interface to the Bluetooth driver that are used by this
//! library. They are Linux specific and have no relation to the Bluetooth specification.

use nix::libc;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

pub const BTPROTO_HCI: libc::c_int = 1;

/// Socket option level of the HCI sockets
const SOL_HCI: libc::c_int = 0;

/// Socket option of the packet filter
const HCI_FILTER: libc::c_int = 2;

/// Device index that binds to no device
pub const HCI_DEV_NONE: u16 = 0xffff;

pub const HCI_CHANNEL_RAW: u16 = 0;

/// A user channel gives exclusive control of the controller, the device must be down to bind it
pub const HCI_CHANNEL_USER: u16 = 1;

pub const HCI_CHANNEL_CONTROL: u16 = 3;

/// Bit of the device flags set when the device is up
const HCI_UP: u32 = 0;

/// Bit of the device flags set when the device is unconfigured
const HCI_RAW: u32 = 6;

/// The maximum number of adapters searched for
const MAX_DEVICES: u16 = 16;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
#[allow(non_camel_case_types)]
pub struct sockaddr_hci {
    pub hci_family: libc::sa_family_t,
    pub hci_dev: u16,
    pub hci_channel: u16,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
#[allow(non_camel_case_types)]
struct hci_dev_stats {
    err_rx: u32,
    err_tx: u32,
    cmd_tx: u32,
    evt_rx: u32,
    acl_tx: u32,
    acl_rx: u32,
    sco_tx: u32,
    sco_rx: u32,
    byte_rx: u32,
    byte_tx: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
#[allow(non_camel_case_types)]
pub struct hci_dev_info {
    pub dev_id: u16,
    name: [libc::c_char; 8],
    pub bdaddr: [u8; 6],
    pub flags: u32,
    type_: u8,
    features: [u8; 8],
    pkt_type: u32,
    link_policy: u32,
    link_mode: u32,
    acl_mtu: u16,
    acl_pkts: u16,
    sco_mtu: u16,
    sco_pkts: u16,
    stat: hci_dev_stats,
}

impl hci_dev_info {
    pub fn is_up(&self) -> bool {
        self.flags & (1 << HCI_UP) != 0
    }

    pub fn is_unconfigured(&self) -> bool {
        self.flags & (1 << HCI_RAW) != 0
    }
}

// ioctl magic for the IOCTL values
const HCI_IOC_MAGIC: u8 = b'H';

const HCI_IOC_HCIDEVDOWN: u8 = 202;
const HCI_IOC_HCIGETDEVINFO: u8 = 211;

nix::ioctl_write_int!(hci_dev_down, HCI_IOC_MAGIC, HCI_IOC_HCIDEVDOWN);

/// Create an HCI socket bound to a device and channel
pub fn bind_socket(dev_id: u16, channel: u16) -> nix::Result<OwnedFd> {
    let raw_fd = unsafe { libc::socket(libc::AF_BLUETOOTH, libc::SOCK_RAW | libc::SOCK_CLOEXEC, BTPROTO_HCI) };

    let fd = unsafe { OwnedFd::from_raw_fd(nix::errno::Errno::result(raw_fd)?) };

    let address = sockaddr_hci {
        hci_family: libc::AF_BLUETOOTH as libc::sa_family_t,
        hci_dev: dev_id,
        hci_channel: channel,
    };

    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &address as *const sockaddr_hci as *const libc::sockaddr,
            std::mem::size_of::<sockaddr_hci>() as libc::socklen_t,
        )
    };

    nix::errno::Errno::result(ret)?;

    Ok(fd)
}

/// Get the information of a device through any HCI socket
pub fn dev_info(fd: &OwnedFd, dev_id: u16) -> nix::Result<hci_dev_info> {
    // The request code does not use the size of `hci_dev_info`, so the nix ioctl macros
    // cannot be used.
    let request_code = nix::request_code_read!(HCI_IOC_MAGIC, HCI_IOC_HCIGETDEVINFO, std::mem::size_of::<libc::c_int>());

    let mut info = hci_dev_info {
        dev_id,
        ..Default::default()
    };

    let ret = unsafe { libc::ioctl(fd.as_raw_fd(), request_code, &mut info as *mut hci_dev_info) };

    nix::errno::Errno::result(ret)?;

    Ok(info)
}

/// Set the packet filter of an HCI socket
///
/// `filter` is the kernel's `struct hci_filter`, the option is specific to HCI sockets so nix has
/// no wrapper for it.
pub fn set_filter(fd: &OwnedFd, filter: &[u8; 14]) -> nix::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            SOL_HCI,
            HCI_FILTER,
            filter.as_ptr() as *const libc::c_void,
            filter.len() as libc::socklen_t,
        )
    };

    nix::errno::Errno::result(ret).map(|_| ())
}

/// Bring a device down
pub fn dev_down(fd: &OwnedFd, dev_id: u16) -> nix::Result<()> {
    unsafe { hci_dev_down(fd.as_raw_fd(), dev_id.into()) }.map(|_| ())
}

/// Get the id of the first configured adapter of the system
pub fn first_dev_id() -> nix::Result<u16> {
    let fd = bind_socket(HCI_DEV_NONE, HCI_CHANNEL_RAW)?;

    (0..MAX_DEVICES)
        .find(|id| matches!(dev_info(&fd, *id), Ok(info) if !info.is_unconfigured()))
        .ok_or(nix::errno::Errno::ENODEV)
}
