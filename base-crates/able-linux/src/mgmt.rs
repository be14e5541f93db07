//! The Bluetooth management socket
//!
//! The socket is bound to the HCI *control* channel of the kernel driver. The host only uses it
//! to load the long term keys of pairing into the kernel, the commands are described in
//! `bluez/doc/mgmt-api.txt`.

use crate::device;
use crate::Error;
use able::sm::keys::{load_long_term_keys_command, KeyProvisioner, LongTermKeyRecord};
use std::os::fd::{AsRawFd, OwnedFd};

pub struct MgmtSocket {
    fd: OwnedFd,
}

impl MgmtSocket {
    pub fn open() -> Result<Self, Error> {
        let fd = device::bind_socket(device::HCI_DEV_NONE, device::HCI_CHANNEL_CONTROL)?;

        Ok(MgmtSocket { fd })
    }

    fn write(&mut self, packet: &[u8]) -> Result<(), Error> {
        let written = nix::unistd::write(self.fd.as_raw_fd(), packet)?;

        if written == packet.len() {
            Ok(())
        } else {
            Err(Error::Other(format!(
                "wrote {} of {} bytes to the management socket",
                written,
                packet.len()
            )))
        }
    }
}

impl KeyProvisioner for MgmtSocket {
    type Error = Error;

    fn load_long_term_keys(&mut self, index: u16, records: &[LongTermKeyRecord]) -> Result<(), Error> {
        log::debug!("loading {} long term keys into controller {}", records.len(), index);

        self.write(&load_long_term_keys_command(index, records))
    }
}
