//! RFCOMM port discovery over SDP.
//!
//! For a remote device and a service id, the discoverer walks the device's
//! serial-port records one at a time. For each record it fetches every
//! attribute and reports the RFCOMM channel of the first record that matches
//! the service id, is marked available and carries a readable channel.

use crate::bt::sdp::{
    ALL_ATTRIBUTES, AttrId, AttrValue, AttrVisitor, RecordHandle, SdpAgent, Uuid, attr,
};
use crate::bt::{BtAddr, BtStack};
use crate::error::Error;
use crate::runtime::callback::Callback;
use crate::task::AsyncTask;

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// Receives the outcome of a discovery.
pub trait PortDiscoveryObserver {
    fn port_discovered(&self, result: Result<u8, Error>);
}

/// Nesting depth at which the protocol descriptor list holds the channel.
const CHANNEL_DEPTH: u32 = 3;

/// Captures the value met once three lists have been entered.
///
/// The counter is not decremented on list end, so for
/// `((L2CAP), (RFCOMM, channel))` the third list entered is the RFCOMM one.
#[derive(Default)]
struct PortVisitor {
    lists_entered: u32,
    port: Option<u8>,
}

impl AttrVisitor for PortVisitor {
    fn visit(&mut self, value: &AttrValue) {
        if self.lists_entered != CHANNEL_DEPTH {
            return;
        }

        if let AttrValue::Uint(channel) = value {
            if let Ok(channel) = u8::try_from(*channel) {
                self.port = Some(channel);
            }
        }
    }

    fn start_list(&mut self) {
        self.lists_entered += 1;
    }
}

/// What one record says about the wanted service.
#[derive(Debug, Default, PartialEq, Eq)]
struct RecordMatch {
    id_matched: bool,
    available: bool,
    port: Option<u8>,
}

impl RecordMatch {
    fn inspect(service_id: u32, attributes: &[(AttrId, AttrValue)]) -> Self {
        let wanted = Uuid::from_u32(service_id);
        let mut found = RecordMatch::default();

        for (id, value) in attributes {
            match (*id, value) {
                (attr::SERVICE_ID, AttrValue::Uuid(uuid)) => {
                    found.id_matched = *uuid == wanted;
                }
                (attr::SERVICE_AVAILABILITY, AttrValue::Uint(level)) => {
                    found.available = *level != 0;
                }
                (attr::SERVICE_AVAILABILITY, AttrValue::Bool(flag)) => {
                    found.available = *flag;
                }
                (attr::PROTOCOL_DESCRIPTOR_LIST, value) => {
                    let mut visitor = PortVisitor::default();
                    value.accept(&mut visitor);
                    found.port = visitor.port;
                }
                _ => {}
            }
        }

        found
    }

    fn port(&self) -> Option<u8> {
        match self {
            RecordMatch {
                id_matched: true,
                available: true,
                port: Some(port),
            } => Some(*port),
            _ => None,
        }
    }
}

struct Query {
    stack: Rc<dyn BtStack>,
    observer: Weak<dyn PortDiscoveryObserver>,
    agent: RefCell<Option<Box<dyn SdpAgent>>>,
    records: AsyncTask<Option<RecordHandle>>,
    attributes: AsyncTask<Vec<(AttrId, AttrValue)>>,
    service_id: Cell<u32>,
    active: Cell<bool>,
    me: Weak<Query>,
}

impl Query {
    fn next_record(&self) {
        let me = self.me.clone();
        let handler = move |result| {
            if let Some(query) = me.upgrade() {
                query.record_found(result);
            }
        };

        let request = self.agent.borrow_mut().as_mut().map(|agent| agent.next_record());
        match request {
            Some(request) => self.records.start(request, handler),
            None => self.records.complete(Err(Error::NotConnected), handler),
        }
    }

    fn record_found(&self, result: Result<Option<RecordHandle>, Error>) {
        if !self.active.get() {
            return;
        }

        let record = match result {
            Ok(Some(record)) => record,
            Ok(None) => return self.finish(Err(Error::NotFound)),
            Err(error) => return self.finish(Err(error)),
        };

        tracing::trace!(record = record.0, "inspecting service record");

        let me = self.me.clone();
        let handler = move |result| {
            if let Some(query) = me.upgrade() {
                query.attributes_read(result);
            }
        };

        let request = self
            .agent
            .borrow_mut()
            .as_mut()
            .map(|agent| agent.attributes(record, ALL_ATTRIBUTES));
        match request {
            Some(request) => self.attributes.start(request, handler),
            None => self.attributes.complete(Err(Error::NotConnected), handler),
        }
    }

    fn attributes_read(&self, result: Result<Vec<(AttrId, AttrValue)>, Error>) {
        if !self.active.get() {
            return;
        }

        match result {
            Ok(attributes) => {
                let found = RecordMatch::inspect(self.service_id.get(), &attributes);
                match found.port() {
                    Some(port) => self.finish(Ok(port)),
                    None => {
                        tracing::trace!(?found, "record skipped");
                        self.next_record();
                    }
                }
            }
            Err(error) => self.finish(Err(error)),
        }
    }

    fn finish(&self, result: Result<u8, Error>) {
        self.active.set(false);
        self.agent.borrow_mut().take();

        tracing::debug!(?result, "port discovery finished");

        if let Some(observer) = self.observer.upgrade() {
            observer.port_discovered(result);
        }
    }
}

/// Finds the RFCOMM channel a remote service listens on.
pub struct PortDiscoverer {
    query: Rc<Query>,
}

impl PortDiscoverer {
    /// Creates an idle discoverer reporting to `observer`.
    ///
    /// # Panics
    /// If no reactor is installed on this thread.
    #[track_caller]
    pub fn new<O>(stack: Rc<dyn BtStack>, observer: &Rc<O>) -> Self
    where
        O: PortDiscoveryObserver + 'static,
    {
        let observer: Weak<O> = Rc::downgrade(observer);
        let observer: Weak<dyn PortDiscoveryObserver> = observer;

        Self {
            query: Rc::new_cyclic(|me| Query {
                stack,
                observer,
                agent: RefCell::new(None),
                records: AsyncTask::new("sdp-records"),
                attributes: AsyncTask::new("sdp-attributes"),
                service_id: Cell::new(0),
                active: Cell::new(false),
                me: me.clone(),
            }),
        }
    }

    /// Starts looking for `service_id` on `device`.
    ///
    /// A discovery already in flight is cancelled first. The outcome is
    /// always delivered through the observer, including failures to open the
    /// query session.
    pub fn discover(&self, device: BtAddr, service_id: u32) {
        self.cancel();

        let query = &self.query;
        query.service_id.set(service_id);
        query.active.set(true);

        tracing::debug!(%device, service_id, "port discovery started");

        let opened = query.stack.sdp_agent(device).and_then(|mut agent| {
            agent.set_record_filter(Uuid::SERIAL_PORT)?;
            Ok(agent)
        });

        match opened {
            Ok(agent) => {
                *query.agent.borrow_mut() = Some(agent);
                query.next_record();
            }
            Err(error) => {
                let me = query.me.clone();
                query.records.complete(Err(error), move |result| {
                    if let Some(query) = me.upgrade() {
                        query.record_found(result);
                    }
                });
            }
        }
    }

    /// Stops a discovery in flight; the observer sees [`Error::Cancelled`] once.
    pub fn cancel(&self) {
        let query = &self.query;
        if !query.active.get() {
            return;
        }

        query.active.set(false);
        query.records.cancel();
        query.attributes.cancel();
        query.finish(Err(Error::Cancelled));
    }

    pub fn is_pending(&self) -> bool {
        self.query.active.get()
    }
}

struct Relay {
    callback: RefCell<Option<Callback<Result<u8, Error>>>>,
}

impl PortDiscoveryObserver for Relay {
    fn port_discovered(&self, result: Result<u8, Error>) {
        let callback = self.callback.borrow_mut().take();
        if let Some(callback) = callback {
            callback.invoke(result);
        }
    }
}

/// Callback-style port discovery.
///
/// # Example
/// ```ignore
/// let discovery = PortDiscovery::new(stack);
/// discovery.discover("00:0a:3a:11:22:33", 0x1234, |port, _| println!("{port:?}"), ());
/// ```
pub struct PortDiscovery {
    relay: Rc<Relay>,
    discoverer: PortDiscoverer,
}

impl PortDiscovery {
    #[track_caller]
    pub fn new(stack: Rc<dyn BtStack>) -> Self {
        let relay = Rc::new(Relay {
            callback: RefCell::new(None),
        });
        let discoverer = PortDiscoverer::new(stack, &relay);

        Self { relay, discoverer }
    }

    /// Looks up the channel of `service_id` on the device at `address`.
    ///
    /// # Arguments
    /// * `address` - Device address, `"xx:xx:xx:xx:xx:xx"`
    /// * `callback` - Called with the channel or the error, and `param`
    ///
    /// # Panics
    /// If `address` is malformed.
    #[track_caller]
    pub fn discover<P, F>(&self, address: &str, service_id: u32, callback: F, param: P)
    where
        P: 'static,
        F: FnOnce(Result<u8, Error>, P) + 'static,
    {
        let device = BtAddr::parse(address);

        self.discoverer.cancel();
        *self.relay.callback.borrow_mut() = Some(Callback::new(callback, param));
        self.discoverer.discover(device, service_id);
    }

    pub fn cancel(&self) {
        self.discoverer.cancel();
    }

    pub fn is_pending(&self) -> bool {
        self.discoverer.is_pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bt::sdp::rfcomm_protocol_list;

    const SERVICE: u32 = 0xbeef;

    fn record(service_id: u32, availability: u64, protocols: AttrValue) -> Vec<(AttrId, AttrValue)> {
        vec![
            (attr::PROTOCOL_DESCRIPTOR_LIST, protocols),
            (attr::SERVICE_ID, AttrValue::Uuid(Uuid::from_u32(service_id))),
            (attr::SERVICE_AVAILABILITY, AttrValue::Uint(availability)),
        ]
    }

    #[test]
    fn matching_record_yields_channel() {
        let found = RecordMatch::inspect(SERVICE, &record(SERVICE, 0xff, rfcomm_protocol_list(9)));

        assert_eq!(found.port(), Some(9));
    }

    #[test]
    fn other_service_is_skipped() {
        let found = RecordMatch::inspect(SERVICE, &record(0x1, 0xff, rfcomm_protocol_list(9)));

        assert!(!found.id_matched);
        assert_eq!(found.port(), None);
    }

    #[test]
    fn unavailable_record_is_skipped() {
        let found = RecordMatch::inspect(SERVICE, &record(SERVICE, 0, rfcomm_protocol_list(9)));

        assert_eq!(found.port(), None);
    }

    #[test]
    fn unreadable_channel_does_not_match() {
        let protocols = AttrValue::List(vec![
            AttrValue::List(vec![AttrValue::Uuid(Uuid::L2CAP)]),
            AttrValue::List(vec![
                AttrValue::Uuid(Uuid::RFCOMM),
                AttrValue::Text("nine".into()),
            ]),
        ]);
        let found = RecordMatch::inspect(SERVICE, &record(SERVICE, 0xff, protocols));

        assert!(found.id_matched && found.available);
        assert_eq!(found.port(), None);
    }

    #[test]
    fn channel_is_read_at_third_list_entered() {
        let mut visitor = PortVisitor::default();
        AttrValue::List(vec![
            AttrValue::Uint(1),
            AttrValue::List(vec![AttrValue::Uint(2)]),
            AttrValue::List(vec![AttrValue::Uint(3)]),
        ])
        .accept(&mut visitor);

        assert_eq!(visitor.lists_entered, 3);
        assert_eq!(visitor.port, Some(3));
    }

    #[test]
    fn out_of_range_value_keeps_captured_channel() {
        let mut visitor = PortVisitor::default();
        AttrValue::List(vec![
            AttrValue::List(vec![AttrValue::Uuid(Uuid::L2CAP)]),
            AttrValue::List(vec![
                AttrValue::Uuid(Uuid::RFCOMM),
                AttrValue::Uint(5),
                AttrValue::Uint(0x1_0000),
            ]),
        ])
        .accept(&mut visitor);

        assert_eq!(visitor.port, Some(5));
    }
}
