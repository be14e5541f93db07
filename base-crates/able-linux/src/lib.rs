//! The Linux controller socket of the `able` host
//!
//! Linux has a driver for the interface to the controller. This crate opens an HCI socket with
//! that driver, reads from it on a dedicated thread, and runs the host [`Bindings`] on a tokio
//! task. Applications talk to the running host through a [`Handle`] and receive its events from
//! a channel.
//!
//! ```no_run
//! # async fn example() -> Result<(), able_linux::Error> {
//! use able::config::Config;
//!
//! let config = Config::from_env().unwrap_or_default();
//!
//! let (driver, handle, mut events) = able_linux::start(&config, false)?;
//!
//! tokio::spawn(driver.run());
//!
//! handle.request(|host| host.start_scanning(&[], false))?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

use able::config::Config;
use able::hci_transport::{HciSocket, SocketError, SocketFilter};
use able::host::{Bindings, HostEvent};
use able::sm::keys::KeyProvisioner;
use nix::errno::Errno;
use nix::sys::socket::{setsockopt, sockopt};
use nix::sys::time::{TimeVal, TimeValLike};
use nix::unistd::{read, write};
use std::fmt;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

mod device;
pub mod mgmt;

pub use mgmt::MgmtSocket;

/// How often the adapter is checked for going up or down
const DEV_UP_POLL_PERIOD: Duration = Duration::from_secs(1);

/// The receive timeout of the reader thread, it stops once its channel is closed
const READ_TIMEOUT_SECS: i64 = 1;

const READ_BUFFER_SIZE: usize = 1024;

#[derive(Clone, PartialEq, Debug)]
pub enum Error {
    IOError(Errno),
    /// The host is no longer running
    Stopped,
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::IOError(ref errno) => write!(f, "IO error: {}", errno),
            Error::Stopped => write!(f, "the host is not running"),
            Error::Other(ref msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<Errno> for Error {
    fn from(e: Errno) -> Self {
        Error::IOError(e)
    }
}

/// Map the error of a socket operation to the error seen by the transport
pub fn socket_error(errno: Errno) -> SocketError {
    match errno {
        Errno::EPERM | Errno::EACCES => SocketError::PermissionDenied,
        Errno::ENETDOWN => SocketError::NetworkDown,
        errno => SocketError::Other(errno.to_string()),
    }
}

/// The HCI socket of an adapter
pub struct LinuxSocket {
    fd: Arc<OwnedFd>,
    dev_id: u16,
}

impl LinuxSocket {
    /// Open the socket of an adapter
    ///
    /// A user channel takes exclusive control of the controller away from the kernel, otherwise
    /// the socket is a raw channel shared with the kernel.
    pub fn open(dev_id: u16, user_channel: bool) -> Result<Self, Error> {
        let fd = if user_channel {
            let control = device::bind_socket(device::HCI_DEV_NONE, device::HCI_CHANNEL_RAW)?;

            // a user channel can only be bound to a device that is down
            if let Err(e) = device::dev_down(&control, dev_id) {
                log::warn!("failed to bring down hci{}: {}", dev_id, e);
            }

            device::bind_socket(dev_id, device::HCI_CHANNEL_USER)?
        } else {
            device::bind_socket(dev_id, device::HCI_CHANNEL_RAW)?
        };

        log::info!("opened hci{} ({} channel)", dev_id, if user_channel { "user" } else { "raw" });

        Ok(LinuxSocket {
            fd: Arc::new(fd),
            dev_id,
        })
    }

    pub fn dev_id(&self) -> u16 {
        self.dev_id
    }

    /// Start reading the socket on a new thread
    ///
    /// Everything read, and every read error, is sent to the returned channel. The thread exits
    /// once the receiver is dropped.
    pub fn spawn_reader(&self) -> Result<UnboundedReceiver<Result<Vec<u8>, SocketError>>, Error> {
        let fd = self.fd.clone();

        setsockopt(&*fd, sockopt::ReceiveTimeout, &TimeVal::seconds(READ_TIMEOUT_SECS))?;

        let (sender, receiver) = unbounded_channel();

        thread::spawn(move || read_task(fd, sender));

        Ok(receiver)
    }
}

fn read_task(fd: Arc<OwnedFd>, sender: UnboundedSender<Result<Vec<u8>, SocketError>>) {
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    while !sender.is_closed() {
        let message = match read(fd.as_raw_fd(), &mut buffer) {
            Ok(0) => continue,
            Ok(len) => Ok(buffer[..len].to_vec()),
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => continue,
            Err(errno) => {
                let error = socket_error(errno);

                if errno == Errno::ENETDOWN {
                    // the adapter is down, the dev up poll notices when it is back
                    thread::sleep(DEV_UP_POLL_PERIOD);
                }

                Err(error)
            }
        };

        if sender.send(message).is_err() {
            break;
        }
    }

    log::debug!("HCI reader exiting");
}

impl HciSocket for LinuxSocket {
    fn write(&mut self, packet: &[u8]) -> Result<(), SocketError> {
        loop {
            match write(self.fd.as_raw_fd(), packet) {
                Err(Errno::EAGAIN) | Err(Errno::EINTR) => continue,
                result => break result.map(|_| ()).map_err(socket_error),
            }
        }
    }

    fn set_filter(&mut self, filter: &SocketFilter) -> Result<(), SocketError> {
        device::set_filter(&self.fd, &filter.to_bytes()).map_err(socket_error)
    }

    fn is_dev_up(&mut self) -> bool {
        match device::dev_info(&self.fd, self.dev_id) {
            Ok(info) => info.is_up(),
            Err(e) => {
                log::debug!("cannot read the info of hci{}: {}", self.dev_id, e);
                false
            }
        }
    }
}

/// An operation run by the driver on the host
pub type Request<P> = Box<dyn FnOnce(&mut Bindings<LinuxSocket, P>) + Send>;

/// Sends operations to a running host
pub struct Handle<P> {
    requests: UnboundedSender<Request<P>>,
}

impl<P> Clone for Handle<P> {
    fn clone(&self) -> Self {
        Handle {
            requests: self.requests.clone(),
        }
    }
}

impl<P> Handle<P> {
    /// Run an operation on the host
    ///
    /// The result of the operation is seen through the events of the host.
    pub fn request<F>(&self, operation: F) -> Result<(), Error>
    where
        F: FnOnce(&mut Bindings<LinuxSocket, P>) + Send + 'static,
    {
        self.requests.send(Box::new(operation)).map_err(|_| Error::Stopped)
    }
}

/// Runs the host
pub struct Driver<P> {
    bindings: Bindings<LinuxSocket, P>,
    received: UnboundedReceiver<Result<Vec<u8>, SocketError>>,
    requests: UnboundedReceiver<Request<P>>,
    events: UnboundedSender<HostEvent>,
}

impl<P: KeyProvisioner> Driver<P> {
    /// Run until every [`Handle`] is dropped or the event receiver is closed
    pub async fn run(mut self) {
        let mut dev_up_poll = tokio::time::interval(DEV_UP_POLL_PERIOD);

        self.bindings.init();

        loop {
            tokio::select! {
                received = self.received.recv() => match received {
                    Some(Ok(data)) => self.bindings.on_socket_data(&data),
                    Some(Err(e)) => self.bindings.on_socket_error(&e),
                    None => {
                        log::error!("the HCI reader stopped");
                        break
                    }
                },
                request = self.requests.recv() => match request {
                    Some(operation) => operation(&mut self.bindings),
                    None => break,
                },
                _ = dev_up_poll.tick() => self.bindings.poll_dev_up(),
            }

            for event in self.bindings.take_events() {
                if self.events.send(event).is_err() {
                    log::info!("host events are no longer received");

                    self.bindings.shutdown();

                    return;
                }
            }
        }

        self.bindings.shutdown();
    }
}

/// Open the adapter of the configuration and create the driver of a host for it
pub fn start(
    config: &Config,
    user_channel: bool,
) -> Result<(Driver<MgmtSocket>, Handle<MgmtSocket>, UnboundedReceiver<HostEvent>), Error> {
    let dev_id = match config.adapter_id {
        Some(id) => id,
        None => device::first_dev_id()?,
    };

    let socket = LinuxSocket::open(dev_id, user_channel)?;

    let received = socket.spawn_reader()?;

    let provisioner = MgmtSocket::open()?;

    let mut config = config.clone();

    config.adapter_id = Some(dev_id);

    let (request_sender, requests) = unbounded_channel();

    let (events, event_receiver) = unbounded_channel();

    let driver = Driver {
        bindings: Bindings::new(socket, provisioner, config),
        received,
        requests,
        events,
    };

    Ok((driver, Handle { requests: request_sender }, event_receiver))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixDatagram;

    #[test]
    fn socket_errors() {
        assert_eq!(SocketError::PermissionDenied, socket_error(Errno::EPERM));
        assert_eq!(SocketError::PermissionDenied, socket_error(Errno::EACCES));
        assert_eq!(SocketError::NetworkDown, socket_error(Errno::ENETDOWN));
        assert!(matches!(socket_error(Errno::EIO), SocketError::Other(_)));
    }

    #[test]
    fn packets_pass_through_the_socket() {
        let (local, peer) = UnixDatagram::pair().unwrap();

        let mut socket = LinuxSocket {
            fd: Arc::new(OwnedFd::from(local)),
            dev_id: 0,
        };

        let mut received = socket.spawn_reader().unwrap();

        peer.send(&[0x04, 0x0e, 0x00]).unwrap();

        assert_eq!(Some(Ok(vec![0x04, 0x0e, 0x00])), received.blocking_recv());

        socket.write(&[0x01, 0x03, 0x0c, 0x00]).unwrap();

        let mut buffer = [0u8; 8];

        let len = peer.recv(&mut buffer).unwrap();

        assert_eq!(&[0x01, 0x03, 0x0c, 0x00], &buffer[..len]);
    }

    #[test]
    fn stopped_host() {
        let (sender, receiver) = unbounded_channel::<Request<MgmtSocket>>();

        drop(receiver);

        let handle = Handle { requests: sender };

        assert_eq!(Err(Error::Stopped), handle.request(|host| host.stop_scanning()));
    }
}
