use aosocket::{
    AsyncTask, Error, ExecutionContext, Immediate, Loop, Reactor, Status, TaskState, Timer,
    with_context,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

type Calls = Rc<RefCell<Vec<Status>>>;

fn record(status: Status, calls: Calls) {
    calls.borrow_mut().push(status);
}

#[test]
fn immediate_completes_on_next_turn() {
    let reactor = Reactor::new().expect("reactor");
    let immediate = Immediate::new();
    let calls = Calls::default();

    immediate.complete(record, calls.clone());
    assert!(immediate.is_pending());
    assert!(calls.borrow().is_empty());

    reactor.turn().expect("turn");
    assert_eq!(*calls.borrow(), vec![Ok(())]);
    assert!(!immediate.is_pending());
}

#[test]
fn immediate_cancel_is_idempotent() {
    let reactor = Reactor::new().expect("reactor");
    let immediate = Immediate::new();
    let calls = Calls::default();

    immediate.cancel();
    immediate.complete(record, calls.clone());
    immediate.cancel();
    immediate.cancel();
    reactor.run().expect("run");

    assert_eq!(*calls.borrow(), vec![Err(Error::Cancelled)]);
    assert_eq!(reactor.outstanding(), 0);
}

#[test]
fn timer_fires_after_deadline() {
    let reactor = Reactor::new().expect("reactor");
    let timer = Timer::new();
    let calls = Calls::default();

    let started = Instant::now();
    timer.after(Duration::from_millis(20), record, calls.clone());
    reactor.run().expect("run");

    assert!(started.elapsed() >= Duration::from_millis(20));
    assert_eq!(*calls.borrow(), vec![Ok(())]);
}

#[test]
fn cancelled_timer_reports_cancelled() {
    let reactor = Reactor::new().expect("reactor");
    let timer = Timer::new();
    let calls = Calls::default();

    timer.after(Duration::from_secs(60), record, calls.clone());
    timer.cancel();
    reactor.run().expect("run");

    assert_eq!(*calls.borrow(), vec![Err(Error::Cancelled)]);
}

#[test]
fn cancelled_timers_release_their_deadlines() {
    let reactor = Reactor::new().expect("reactor");
    let timer = Timer::new();
    let calls = Calls::default();

    for _ in 0..100 {
        timer.after(Duration::from_secs(3600), record, calls.clone());
        reactor.try_turn().expect("turn");
        assert_eq!(reactor.pending_timers(), 1);

        timer.cancel();
        assert_eq!(reactor.pending_timers(), 0);
    }

    assert_eq!(calls.borrow().len(), 100);
    assert!(calls.borrow().iter().all(|status| *status == Err(Error::Cancelled)));

    let started = Instant::now();
    timer.after(Duration::from_millis(10), record, calls.clone());
    reactor.run().expect("run");
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(reactor.pending_timers(), 0);
}

#[test]
fn loop_stops_from_callback() {
    let _reactor = Reactor::new().expect("reactor");
    let wait = Loop::new();
    let timer = Timer::new();

    timer.after(
        Duration::from_millis(5),
        |status, wait: Loop| {
            assert_eq!(status, Ok(()));
            wait.stop();
        },
        wait.clone(),
    );

    wait.start().expect("loop");
    assert!(!wait.is_running());
}

#[test]
fn loops_nest() {
    let _reactor = Reactor::new().expect("reactor");
    let outer = Loop::new();
    let first = Immediate::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    let inner_order = order.clone();
    let stopper = outer.clone();
    first.complete(
        move |_, _| {
            let inner = Loop::new();
            let second = Immediate::new();
            second.complete(
                |_, (inner, order): (Loop, Rc<RefCell<Vec<&'static str>>>)| {
                    order.borrow_mut().push("inner");
                    inner.stop();
                },
                (inner.clone(), inner_order.clone()),
            );

            inner.start().expect("inner loop");
            inner_order.borrow_mut().push("outer");
            stopper.stop();
        },
        (),
    );

    outer.start().expect("outer loop");
    assert_eq!(*order.borrow(), vec!["inner", "outer"]);
}

#[test]
fn stop_before_start_returns_at_once() {
    let _reactor = Reactor::new().expect("reactor");
    let wait = Loop::new();

    wait.stop();
    wait.start().expect("loop");
}

struct Counting {
    entered: Rc<Cell<u32>>,
    left: Rc<Cell<u32>>,
}

impl ExecutionContext for Counting {
    fn enter(&self) {
        self.entered.set(self.entered.get() + 1);
    }

    fn leave(&self) {
        self.left.set(self.left.get() + 1);
    }
}

#[test]
fn callbacks_run_inside_captured_context() {
    let reactor = Reactor::new().expect("reactor");
    let entered = Rc::new(Cell::new(0));
    let left = Rc::new(Cell::new(0));
    let immediate = Immediate::new();
    let seen = Rc::new(Cell::new((0, 0)));

    let context = Counting {
        entered: entered.clone(),
        left: left.clone(),
    };
    let observed = (entered.clone(), left.clone(), seen.clone());
    with_context(context, || {
        immediate.complete(
            |_, (entered, left, seen): (Rc<Cell<u32>>, Rc<Cell<u32>>, Rc<Cell<(u32, u32)>>)| {
                seen.set((entered.get(), left.get()));
            },
            observed,
        );
    });
    assert_eq!((entered.get(), left.get()), (0, 0));

    reactor.turn().expect("turn");

    assert_eq!(seen.get(), (1, 0));
    assert_eq!((entered.get(), left.get()), (1, 1));
}

#[test]
fn task_handler_may_restart_task() {
    let reactor = Reactor::new().expect("reactor");
    let task = Rc::new(AsyncTask::new("restart"));
    let results = Rc::new(RefCell::new(Vec::new()));

    let again = task.clone();
    let seen = results.clone();
    task.start(async { Ok(1) }, move |result| {
        seen.borrow_mut().push(result);
        assert_eq!(again.state(), TaskState::Completed);

        let seen = seen.clone();
        again.start(async { Ok(2) }, move |result| seen.borrow_mut().push(result));
    });

    reactor.run().expect("run");

    assert_eq!(*results.borrow(), vec![Ok(1), Ok(2)]);
    assert_eq!(task.state(), TaskState::Idle);
}

#[test]
fn dropping_pending_task_cancels_it() {
    let reactor = Reactor::new().expect("reactor");
    let results = Rc::new(RefCell::new(Vec::new()));

    let task: AsyncTask<()> = AsyncTask::new("dropped");
    let seen = results.clone();
    task.start(futures::future::pending(), move |result| {
        seen.borrow_mut().push(result)
    });
    drop(task);

    assert_eq!(*results.borrow(), vec![Err(Error::Cancelled)]);
    assert_eq!(reactor.outstanding(), 0);
}

#[test]
#[should_panic(expected = "request already pending")]
fn starting_pending_task_is_fatal() {
    let _reactor = Reactor::new().expect("reactor");
    let immediate = Immediate::new();

    immediate.complete(|_, _| {}, ());
    immediate.complete(|_, _| {}, ());
}

#[test]
#[should_panic(expected = "no reactor on this thread")]
fn task_without_reactor_is_fatal() {
    let _ = Immediate::new();
}

#[test]
#[should_panic(expected = "reactor already installed on this thread")]
fn second_reactor_on_thread_is_fatal() {
    let _first = Reactor::new().expect("reactor");
    let _second = Reactor::new();
}
