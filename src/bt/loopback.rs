//! In-process Bluetooth stack over Unix-domain sockets.
//!
//! A [`LoopbackNetwork`] owns a temporary directory and the state of every
//! simulated device: its service records, registered security policies and
//! bound channels. Each device gets a [`LoopbackStack`]; RFCOMM channel `c`
//! of device `d` is the socket file `<dir>/<d>-<c>`.
//!
//! Channels stay reserved for the network's lifetime once a listener has
//! bound them.

use crate::bt::sdp::{AttrId, AttrValue, RecordHandle, SdpAgent, SdpDatabase, Uuid, attr};
use crate::bt::{BtAddr, BtStack, SecurityPolicy};
use crate::error::{Error, Status};
use crate::net::utils::{self, SockAddr};

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io;
use std::ops::RangeInclusive;
use std::os::fd::{OwnedFd, RawFd};
use std::path::PathBuf;
use std::rc::Rc;

use futures::FutureExt;
use futures::future::{self, LocalBoxFuture};
use tempfile::TempDir;

/// Highest RFCOMM channel number.
pub const MAX_CHANNEL: u8 = 30;

type Attributes = BTreeMap<AttrId, AttrValue>;

#[derive(Default)]
struct DeviceState {
    records: BTreeMap<RecordHandle, Attributes>,
    security: HashSet<u32>,
    bound_channels: BTreeSet<u8>,
    security_failure: Option<Error>,
}

/// A set of simulated devices that can reach each other.
pub struct LoopbackNetwork {
    dir: TempDir,
    devices: RefCell<HashMap<BtAddr, DeviceState>>,
    next_handle: Cell<u32>,
}

impl LoopbackNetwork {
    pub fn new() -> io::Result<Rc<Self>> {
        let dir = tempfile::Builder::new().prefix("aosocket-bt").tempdir()?;
        tracing::debug!(path = %dir.path().display(), "loopback network created");

        Ok(Rc::new(Self {
            dir,
            devices: RefCell::new(HashMap::new()),
            next_handle: Cell::new(0x0001_0000),
        }))
    }

    /// Adds device `address` to the network and returns its stack.
    pub fn device(self: &Rc<Self>, address: BtAddr) -> Rc<LoopbackStack> {
        self.devices.borrow_mut().entry(address).or_default();

        Rc::new(LoopbackStack {
            network: self.clone(),
            address,
        })
    }

    /// Number of service records `device` publishes.
    pub fn record_count(&self, device: BtAddr) -> usize {
        self.devices
            .borrow()
            .get(&device)
            .map_or(0, |state| state.records.len())
    }

    /// Attributes of every record `device` publishes, by handle.
    pub fn records(&self, device: BtAddr) -> Vec<Attributes> {
        self.devices
            .borrow()
            .get(&device)
            .map(|state| state.records.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_security(&self, device: BtAddr, service_id: u32) -> bool {
        self.devices
            .borrow()
            .get(&device)
            .is_some_and(|state| state.security.contains(&service_id))
    }

    /// Makes the next security registration on `device` fail with `error`.
    pub fn fail_next_security(&self, device: BtAddr, error: Error) {
        if let Some(state) = self.devices.borrow_mut().get_mut(&device) {
            state.security_failure = Some(error);
        }
    }

    /// Publishes a hand-built serial-port record on `device`.
    pub fn insert_record(&self, device: BtAddr, attributes: Vec<(AttrId, AttrValue)>) -> Option<RecordHandle> {
        let handle = self.create_record(device, Uuid::SERIAL_PORT).ok()?;

        let mut devices = self.devices.borrow_mut();
        let record = devices.get_mut(&device)?.records.get_mut(&handle)?;
        record.extend(attributes);

        Some(handle)
    }

    fn channel_path(&self, device: BtAddr, channel: u8) -> PathBuf {
        let name: String = device
            .octets()
            .iter()
            .map(|octet| format!("{octet:02x}"))
            .collect();

        self.dir.path().join(format!("{name}-{channel}"))
    }

    fn with_device<R>(&self, device: BtAddr, f: impl FnOnce(&mut DeviceState) -> Result<R, Error>) -> Result<R, Error> {
        let mut devices = self.devices.borrow_mut();
        let state = devices.get_mut(&device).ok_or(Error::Os(libc::EHOSTUNREACH))?;
        f(state)
    }

    fn create_record(&self, device: BtAddr, service_class: Uuid) -> Result<RecordHandle, Error> {
        let handle = RecordHandle(self.next_handle.get());

        self.with_device(device, |state| {
            let mut attributes = Attributes::new();
            attributes.insert(attr::SERVICE_RECORD_HANDLE, AttrValue::Uint(handle.0 as u64));
            attributes.insert(
                attr::SERVICE_CLASS_ID_LIST,
                AttrValue::List(vec![AttrValue::Uuid(service_class)]),
            );

            state.records.insert(handle, attributes);
            Ok(())
        })?;

        self.next_handle.set(handle.0 + 1);
        Ok(handle)
    }
}

/// One simulated device's Bluetooth stack.
pub struct LoopbackStack {
    network: Rc<LoopbackNetwork>,
    address: BtAddr,
}

impl LoopbackStack {
    pub fn address(&self) -> BtAddr {
        self.address
    }

    pub fn network(&self) -> &Rc<LoopbackNetwork> {
        &self.network
    }
}

fn check_channel(channel: u8) -> Result<u8, Error> {
    match channel {
        1..=MAX_CHANNEL => Ok(channel),
        _ => Err(Error::InvalidInput),
    }
}

impl BtStack for LoopbackStack {
    fn open_socket(&self) -> io::Result<OwnedFd> {
        utils::stream_socket(libc::AF_UNIX)
    }

    fn available_channel(&self, _socket: RawFd) -> Result<u8, Error> {
        self.network.with_device(self.address, |state| {
            (1..=MAX_CHANNEL)
                .find(|channel| !state.bound_channels.contains(channel))
                .ok_or(Error::Os(libc::EADDRINUSE))
        })
    }

    fn listen_address(&self, channel: u8) -> Result<SockAddr, Error> {
        let channel = check_channel(channel)?;

        self.network.with_device(self.address, |state| {
            if !state.bound_channels.insert(channel) {
                return Err(Error::Os(libc::EADDRINUSE));
            }
            Ok(())
        })?;

        let path = self.network.channel_path(self.address, channel);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => return Err(error.into()),
        }

        Ok(SockAddr::unix(&path)?)
    }

    fn peer_address(&self, device: BtAddr, channel: u8) -> Result<SockAddr, Error> {
        let channel = check_channel(channel)?;
        self.network.with_device(device, |_| Ok(()))?;

        Ok(SockAddr::unix(&self.network.channel_path(device, channel))?)
    }

    fn register_security(&self, policy: SecurityPolicy) -> LocalBoxFuture<'static, Status> {
        let result = self.network.with_device(self.address, |state| {
            if let Some(error) = state.security_failure.take() {
                return Err(error);
            }

            state.security.insert(policy.service_id);
            Ok(())
        });

        tracing::trace!(service_id = policy.service_id, ?result, "security registration");
        future::ready(result).boxed_local()
    }

    fn unregister_security(&self, service_id: u32) {
        let _ = self.network.with_device(self.address, |state| {
            state.security.remove(&service_id);
            Ok(())
        });
    }

    fn sdp_database(&self) -> Result<Box<dyn SdpDatabase>, Error> {
        Ok(Box::new(LoopbackDatabase {
            network: self.network.clone(),
            device: self.address,
        }))
    }

    fn sdp_agent(&self, device: BtAddr) -> Result<Box<dyn SdpAgent>, Error> {
        self.network.with_device(device, |_| Ok(()))?;

        Ok(Box::new(LoopbackAgent {
            network: self.network.clone(),
            device,
            filter: None,
            cursor: None,
        }))
    }
}

struct LoopbackDatabase {
    network: Rc<LoopbackNetwork>,
    device: BtAddr,
}

impl SdpDatabase for LoopbackDatabase {
    fn create_record(&mut self, service_class: Uuid) -> Result<RecordHandle, Error> {
        self.network.create_record(self.device, service_class)
    }

    fn update_attribute(&mut self, record: RecordHandle, id: AttrId, value: AttrValue) -> Status {
        self.network.with_device(self.device, |state| {
            let attributes = state.records.get_mut(&record).ok_or(Error::NotFound)?;
            attributes.insert(id, value);
            Ok(())
        })
    }

    fn delete_record(&mut self, record: RecordHandle) -> Status {
        self.network.with_device(self.device, |state| {
            state.records.remove(&record).map(|_| ()).ok_or(Error::NotFound)
        })
    }
}

struct LoopbackAgent {
    network: Rc<LoopbackNetwork>,
    device: BtAddr,
    filter: Option<Uuid>,
    cursor: Option<RecordHandle>,
}

fn has_class(attributes: &Attributes, class: Uuid) -> bool {
    match attributes.get(&attr::SERVICE_CLASS_ID_LIST) {
        Some(AttrValue::List(classes)) => classes.contains(&AttrValue::Uuid(class)),
        _ => false,
    }
}

impl SdpAgent for LoopbackAgent {
    fn set_record_filter(&mut self, service_class: Uuid) -> Status {
        self.filter = Some(service_class);
        self.cursor = None;
        Ok(())
    }

    fn next_record(&mut self) -> LocalBoxFuture<'static, Result<Option<RecordHandle>, Error>> {
        let filter = self.filter;
        let cursor = self.cursor;

        let result = self.network.with_device(self.device, |state| {
            let next = state
                .records
                .iter()
                .filter(|(handle, _)| cursor.is_none_or(|cursor| **handle > cursor))
                .find(|(_, attributes)| filter.is_none_or(|class| has_class(attributes, class)))
                .map(|(handle, _)| *handle);
            Ok(next)
        });

        if let Ok(Some(handle)) = result {
            self.cursor = Some(handle);
        }

        future::ready(result).boxed_local()
    }

    fn attributes(
        &mut self,
        record: RecordHandle,
        range: RangeInclusive<AttrId>,
    ) -> LocalBoxFuture<'static, Result<Vec<(AttrId, AttrValue)>, Error>> {
        let result = self.network.with_device(self.device, |state| {
            let attributes = state.records.get(&record).ok_or(Error::NotFound)?;
            Ok(attributes
                .range(range)
                .map(|(id, value)| (*id, value.clone()))
                .collect())
        });

        future::ready(result).boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: BtAddr = BtAddr::new([0, 0, 0, 0, 0, 1]);
    const REMOTE: BtAddr = BtAddr::new([0, 0, 0, 0, 0, 2]);

    #[test]
    fn bound_channels_are_not_offered_again() {
        let network = LoopbackNetwork::new().expect("network");
        let stack = network.device(LOCAL);

        let first = stack.available_channel(-1).expect("channel");
        stack.listen_address(first).expect("bind address");

        assert_ne!(stack.available_channel(-1).expect("channel"), first);
        assert_eq!(
            stack.listen_address(first).map(|_| ()),
            Err(Error::Os(libc::EADDRINUSE))
        );
    }

    #[test]
    fn unknown_device_is_unreachable() {
        let network = LoopbackNetwork::new().expect("network");
        let stack = network.device(LOCAL);

        assert_eq!(
            stack.sdp_agent(REMOTE).map(|_| ()),
            Err(Error::Os(libc::EHOSTUNREACH))
        );
    }

    #[test]
    fn records_are_listed_in_handle_order() {
        let network = LoopbackNetwork::new().expect("network");
        let stack = network.device(LOCAL);
        network.device(REMOTE);

        let first = network.insert_record(REMOTE, Vec::new()).expect("record");
        let second = network.insert_record(REMOTE, Vec::new()).expect("record");

        let mut agent = stack.sdp_agent(REMOTE).expect("agent");
        agent.set_record_filter(Uuid::SERIAL_PORT).expect("filter");

        let mut seen = Vec::new();
        while let Some(handle) = agent
            .next_record()
            .now_or_never()
            .expect("ready")
            .expect("record")
        {
            seen.push(handle);
        }

        assert_eq!(seen, vec![first, second]);
    }
}
