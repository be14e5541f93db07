//! The Generic Access Profile
//!
//! The [`Gap`] controller runs the scanning and advertising procedures of the host. Both are
//! simple state machines driven by the commands sent through the
//! [`HciTransport`](crate::hci_transport::HciTransport) and the command complete events that
//! answer them.

pub mod advertise;
pub mod scan;

use crate::config::Config;
use crate::hci::commands::MAX_ADVERTISING_DATA_LEN;
use crate::hci::status::Status;
use crate::hci_transport::{HciSocket, HciTransport, TransportEvent};
use crate::Uuid;
use scan::{Discoveries, Discovery};
use std::collections::VecDeque;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    AdvertisingDataTooLong(usize),
    ScanResponseDataTooLong(usize),
    /// The controller rejected the command
    Controller(Status),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::AdvertisingDataTooLong(len) => write!(
                f,
                "advertising data is {} bytes, the maximum is {}",
                len, MAX_ADVERTISING_DATA_LEN
            ),
            Error::ScanResponseDataTooLong(len) => write!(
                f,
                "scan response data is {} bytes, the maximum is {}",
                len, MAX_ADVERTISING_DATA_LEN
            ),
            Error::Controller(status) => fmt::Display::fmt(&status, f),
        }
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Starting,
    Started,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertiseState {
    Idle,
    Starting,
    Started,
    Stopping,
    Stopped,
    Restarting,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GapEvent {
    ScanStart { filter_duplicates: bool },
    ScanStop,
    Discover(Discovery),
    AdvertisingStart(Result<(), Error>),
    AdvertisingStop,
}

pub struct Gap {
    scan_state: ScanState,
    filter_duplicates: bool,
    advertise_state: AdvertiseState,
    report_all: bool,
    discoveries: Discoveries,
    events: VecDeque<GapEvent>,
}

impl Gap {
    pub fn new(config: &Config) -> Self {
        Gap {
            scan_state: ScanState::Idle,
            filter_duplicates: true,
            advertise_state: AdvertiseState::Idle,
            report_all: config.report_all_hci_events,
            discoveries: Discoveries::new(),
            events: VecDeque::new(),
        }
    }

    pub fn scan_state(&self) -> ScanState {
        self.scan_state
    }

    pub fn advertise_state(&self) -> AdvertiseState {
        self.advertise_state
    }

    pub fn take_events(&mut self) -> VecDeque<GapEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn start_scanning<S: HciSocket>(&mut self, hci: &mut HciTransport<S>, allow_duplicates: bool) {
        self.filter_duplicates = !allow_duplicates;

        self.scan_state = ScanState::Starting;

        hci.set_scan_enable(true, self.filter_duplicates);
    }

    pub fn stop_scanning<S: HciSocket>(&mut self, hci: &mut HciTransport<S>) {
        self.scan_state = ScanState::Stopping;

        hci.set_scan_enable(false, true);
    }

    /// Start advertising a name and a list of services
    pub fn start_advertising<S: HciSocket>(&mut self, hci: &mut HciTransport<S>, name: &str, service_uuids: &[Uuid]) {
        let advertising_data = advertise::advertising_data(service_uuids);

        let scan_response_data = advertise::scan_response_data(name);

        self.start_advertising_with_eir_data(hci, &advertising_data, &scan_response_data);
    }

    /// Start advertising as an iBeacon
    pub fn start_advertising_ibeacon<S: HciSocket>(&mut self, hci: &mut HciTransport<S>, ibeacon: &[u8]) {
        let advertising_data = advertise::ibeacon_data(ibeacon);

        self.start_advertising_with_eir_data(hci, &advertising_data, &[]);
    }

    /// Start advertising with the raw advertising and scan response payloads
    pub fn start_advertising_with_eir_data<S: HciSocket>(
        &mut self,
        hci: &mut HciTransport<S>,
        advertising_data: &[u8],
        scan_response_data: &[u8],
    ) {
        let error = if advertising_data.len() > MAX_ADVERTISING_DATA_LEN {
            Some(Error::AdvertisingDataTooLong(advertising_data.len()))
        } else if scan_response_data.len() > MAX_ADVERTISING_DATA_LEN {
            Some(Error::ScanResponseDataTooLong(scan_response_data.len()))
        } else {
            None
        };

        match error {
            Some(error) => {
                log::warn!("cannot advertise: {}", error);

                self.events.push_back(GapEvent::AdvertisingStart(Err(error)))
            }
            None => {
                self.advertise_state = AdvertiseState::Starting;

                hci.set_scan_response_data(scan_response_data);
                hci.set_advertising_data(advertising_data);
                hci.set_advertise_enable(true);
            }
        }
    }

    /// Enable advertising again after a connection ended
    ///
    /// The controller stops advertising when a connection is established with the advertiser.
    pub fn restart_advertising<S: HciSocket>(&mut self, hci: &mut HciTransport<S>) {
        self.advertise_state = AdvertiseState::Restarting;

        hci.set_advertise_enable(true);
    }

    pub fn stop_advertising<S: HciSocket>(&mut self, hci: &mut HciTransport<S>) {
        self.advertise_state = AdvertiseState::Stopping;

        hci.set_advertise_enable(false);
    }

    /// Process an event from the transport
    pub fn on_transport_event(&mut self, event: &TransportEvent) {
        match event {
            TransportEvent::ScanEnableSet(status) => self.on_scan_enable_set(*status),
            TransportEvent::AdvertiseEnableSet(status) => self.on_advertise_enable_set(*status),
            TransportEvent::AdvertisingReport(report) => {
                if let Some(discovery) = self.discoveries.merge(report, self.report_all) {
                    self.events.push_back(GapEvent::Discover(discovery))
                }
            }
            _ => (),
        }
    }

    fn on_scan_enable_set(&mut self, status: Status) {
        if !status.is_success() {
            log::warn!("scan enable failed: {}", status);
        }

        match self.scan_state {
            ScanState::Starting => {
                self.scan_state = ScanState::Started;

                self.events.push_back(GapEvent::ScanStart {
                    filter_duplicates: self.filter_duplicates,
                })
            }
            ScanState::Stopping => {
                self.scan_state = ScanState::Stopped;

                self.events.push_back(GapEvent::ScanStop)
            }
            _ => (),
        }
    }

    fn on_advertise_enable_set(&mut self, status: Status) {
        match self.advertise_state {
            AdvertiseState::Starting => {
                if status.is_success() {
                    self.advertise_state = AdvertiseState::Started;

                    self.events.push_back(GapEvent::AdvertisingStart(Ok(())))
                } else {
                    self.advertise_state = AdvertiseState::Stopped;

                    self.events
                        .push_back(GapEvent::AdvertisingStart(Err(Error::Controller(status))))
                }
            }
            AdvertiseState::Restarting => {
                if !status.is_success() {
                    log::warn!("advertising was not restarted: {}", status);
                }

                self.advertise_state = AdvertiseState::Started;
            }
            AdvertiseState::Stopping => {
                self.advertise_state = AdvertiseState::Stopped;

                self.events.push_back(GapEvent::AdvertisingStop)
            }
            _ => (),
        }
    }
}
