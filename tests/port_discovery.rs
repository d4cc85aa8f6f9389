#![cfg(feature = "loopback")]

use aosocket::bt::BtAddr;
use aosocket::bt::discoverer::{PortDiscoverer, PortDiscoveryObserver, PortDiscovery};
use aosocket::bt::loopback::LoopbackNetwork;
use aosocket::bt::sdp::{AttrValue, Uuid, attr, rfcomm_protocol_list};
use aosocket::{Error, Reactor};
use std::cell::RefCell;
use std::rc::Rc;

const LOCAL: BtAddr = BtAddr::new([0x02, 0, 0, 0, 0, 0x01]);
const REMOTE: BtAddr = BtAddr::new([0x02, 0, 0, 0, 0, 0x02]);
const SERVICE: u32 = 0xc0de;

#[derive(Default)]
struct Outcomes(RefCell<Vec<Result<u8, Error>>>);

impl PortDiscoveryObserver for Outcomes {
    fn port_discovered(&self, result: Result<u8, Error>) {
        self.0.borrow_mut().push(result);
    }
}

fn service_record(service_id: u32, availability: u64, protocols: AttrValue) -> Vec<(u16, AttrValue)> {
    vec![
        (attr::SERVICE_ID, AttrValue::Uuid(Uuid::from_u32(service_id))),
        (attr::SERVICE_AVAILABILITY, AttrValue::Uint(availability)),
        (attr::PROTOCOL_DESCRIPTOR_LIST, protocols),
    ]
}

#[test]
fn skips_records_until_one_fully_matches() {
    let reactor = Reactor::new().expect("reactor");
    let network = LoopbackNetwork::new().expect("network");
    let local = network.device(LOCAL);
    network.device(REMOTE);

    network.insert_record(REMOTE, service_record(0x1111, 0xff, rfcomm_protocol_list(2)));
    network.insert_record(REMOTE, service_record(SERVICE, 0x00, rfcomm_protocol_list(3)));
    network.insert_record(
        REMOTE,
        service_record(SERVICE, 0xff, AttrValue::List(vec![AttrValue::Text("no channel".into())])),
    );
    network.insert_record(REMOTE, service_record(SERVICE, 0xff, rfcomm_protocol_list(7)));

    let outcomes = Rc::new(Outcomes::default());
    let discoverer = PortDiscoverer::new(local, &outcomes);
    discoverer.discover(REMOTE, SERVICE);
    assert!(discoverer.is_pending());

    reactor
        .run_until(|| !outcomes.0.borrow().is_empty())
        .expect("run");

    assert_eq!(*outcomes.0.borrow(), vec![Ok(7)]);
    assert!(!discoverer.is_pending());
}

#[test]
fn exhausted_records_report_not_found() {
    let reactor = Reactor::new().expect("reactor");
    let network = LoopbackNetwork::new().expect("network");
    let local = network.device(LOCAL);
    network.device(REMOTE);
    network.insert_record(REMOTE, service_record(SERVICE, 0x00, rfcomm_protocol_list(4)));

    let outcomes = Rc::new(Outcomes::default());
    let discoverer = PortDiscoverer::new(local, &outcomes);
    discoverer.discover(REMOTE, SERVICE);

    reactor
        .run_until(|| !outcomes.0.borrow().is_empty())
        .expect("run");
    assert_eq!(*outcomes.0.borrow(), vec![Err(Error::NotFound)]);
}

#[test]
fn unknown_device_fails_through_observer() {
    let reactor = Reactor::new().expect("reactor");
    let network = LoopbackNetwork::new().expect("network");
    let local = network.device(LOCAL);

    let outcomes = Rc::new(Outcomes::default());
    let discoverer = PortDiscoverer::new(local, &outcomes);
    discoverer.discover(REMOTE, SERVICE);
    assert!(outcomes.0.borrow().is_empty());

    reactor
        .run_until(|| !outcomes.0.borrow().is_empty())
        .expect("run");
    assert_eq!(
        *outcomes.0.borrow(),
        vec![Err(Error::Os(libc::EHOSTUNREACH))]
    );
}

#[test]
fn restart_cancels_previous_discovery_once() {
    let reactor = Reactor::new().expect("reactor");
    let network = LoopbackNetwork::new().expect("network");
    let local = network.device(LOCAL);
    network.device(REMOTE);
    network.insert_record(REMOTE, service_record(SERVICE, 0xff, rfcomm_protocol_list(9)));

    let outcomes = Rc::new(Outcomes::default());
    let discoverer = PortDiscoverer::new(local, &outcomes);
    discoverer.discover(REMOTE, SERVICE);
    discoverer.discover(REMOTE, SERVICE);

    reactor
        .run_until(|| outcomes.0.borrow().len() == 2)
        .expect("run");
    assert_eq!(*outcomes.0.borrow(), vec![Err(Error::Cancelled), Ok(9)]);

    discoverer.cancel();
    assert_eq!(outcomes.0.borrow().len(), 2);
}

#[test]
fn callback_wrapper_passes_param_through() {
    let reactor = Reactor::new().expect("reactor");
    let network = LoopbackNetwork::new().expect("network");
    let local = network.device(LOCAL);
    network.device(REMOTE);
    network.insert_record(REMOTE, service_record(SERVICE, 0xff, rfcomm_protocol_list(12)));

    let seen = Rc::new(RefCell::new(None));
    let discovery = PortDiscovery::new(local);
    discovery.discover(
        "02:00:00:00:00:02",
        SERVICE,
        |result, (seen, tag): (Rc<RefCell<Option<(Result<u8, Error>, &'static str)>>>, &'static str)| {
            *seen.borrow_mut() = Some((result, tag));
        },
        (seen.clone(), "remote"),
    );

    reactor
        .run_until(|| seen.borrow().is_some())
        .expect("run");
    assert_eq!(seen.borrow_mut().take(), Some((Ok(12), "remote")));
}

#[test]
fn callback_wrapper_cancel_delivers_cancelled() {
    let _reactor = Reactor::new().expect("reactor");
    let network = LoopbackNetwork::new().expect("network");
    let local = network.device(LOCAL);
    network.device(REMOTE);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let discovery = PortDiscovery::new(local);
    discovery.discover(
        "02:00:00:00:00:02",
        SERVICE,
        |result, seen: Rc<RefCell<Vec<Result<u8, Error>>>>| seen.borrow_mut().push(result),
        seen.clone(),
    );

    discovery.cancel();
    discovery.cancel();
    assert_eq!(*seen.borrow(), vec![Err(Error::Cancelled)]);
    assert!(!discovery.is_pending());
}

#[test]
#[should_panic(expected = "argument error")]
fn wrapper_rejects_short_address() {
    let _reactor = Reactor::new().expect("reactor");
    let network = LoopbackNetwork::new().expect("network");
    let discovery = PortDiscovery::new(network.device(LOCAL));

    discovery.discover("02:00:00:00:00", SERVICE, |_, _| {}, ());
}
