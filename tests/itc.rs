use aosocket::{Error, Itc, Reactor, Status};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

type Calls = Rc<RefCell<Vec<Status>>>;

fn record(status: Status, calls: Calls) {
    calls.borrow_mut().push(status);
}

#[test]
fn signal_from_other_thread_completes_request() {
    let reactor = Reactor::new().expect("reactor");
    let itc = Itc::new();
    let calls = Calls::default();

    itc.request(record, calls.clone());
    let signal = itc.signaller();
    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        signal.complete();
    });

    reactor
        .run_until(|| !calls.borrow().is_empty())
        .expect("run");
    worker.join().expect("worker");

    assert_eq!(*calls.borrow(), vec![Ok(())]);
    assert!(!itc.is_pending());
}

#[test]
fn signal_before_first_poll_is_kept() {
    let reactor = Reactor::new().expect("reactor");
    let itc = Itc::new();
    let calls = Calls::default();

    itc.request(record, calls.clone());
    let signal = itc.signaller();
    thread::spawn(move || signal.complete())
        .join()
        .expect("worker");

    reactor.run().expect("run");
    assert_eq!(*calls.borrow(), vec![Ok(())]);
}

#[test]
fn repeated_signals_complete_once() {
    let reactor = Reactor::new().expect("reactor");
    let itc = Itc::new();
    let calls = Calls::default();

    itc.request(record, calls.clone());
    let signal = itc.signaller();
    thread::spawn(move || {
        signal.complete();
        signal.complete();
    })
    .join()
    .expect("worker");

    reactor.run().expect("run");
    assert_eq!(*calls.borrow(), vec![Ok(())]);
}

#[test]
fn signal_after_cancel_is_discarded() {
    let reactor = Reactor::new().expect("reactor");
    let itc = Itc::new();
    let calls = Calls::default();

    itc.request(record, calls.clone());
    itc.cancel();
    itc.signaller().complete();
    reactor.run().expect("run");
    assert_eq!(*calls.borrow(), vec![Err(Error::Cancelled)]);

    itc.request(record, calls.clone());
    let signal = itc.signaller();
    thread::spawn(move || signal.complete())
        .join()
        .expect("worker");
    reactor.run().expect("run");

    assert_eq!(*calls.borrow(), vec![Err(Error::Cancelled), Ok(())]);
}

#[test]
fn signal_to_finished_thread_is_dropped() {
    let completions = Arc::new(AtomicUsize::new(0));
    let cancelled = Arc::new(AtomicUsize::new(0));

    let counters = (completions.clone(), cancelled.clone());
    let signal = thread::spawn(move || {
        let _reactor = Reactor::new().expect("reactor");
        let itc = Itc::new();
        itc.request(
            |status, (completions, cancelled): (Arc<AtomicUsize>, Arc<AtomicUsize>)| {
                completions.fetch_add(1, Ordering::SeqCst);
                if status == Err(Error::Cancelled) {
                    cancelled.fetch_add(1, Ordering::SeqCst);
                }
            },
            counters,
        );
        itc.signaller()
    })
    .join()
    .expect("owner thread");

    assert_eq!(completions.load(Ordering::SeqCst), 1);
    assert_eq!(cancelled.load(Ordering::SeqCst), 1);

    signal.complete();
    signal.complete();

    assert_eq!(completions.load(Ordering::SeqCst), 1);
    assert_eq!(cancelled.load(Ordering::SeqCst), 1);
}

#[test]
#[should_panic(expected = "request already pending")]
fn second_request_is_fatal() {
    let _reactor = Reactor::new().expect("reactor");
    let itc = Itc::new();

    itc.request(|_, _| {}, ());
    itc.request(|_, _| {}, ());
}
