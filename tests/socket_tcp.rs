use aosocket::{AccessPoint, Connection, Error, Mode, Reactor, Socket, SocketServ, Status};
use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpListener as StdTcpListener, TcpStream as StdTcpStream};
use std::rc::Rc;

type Slot<T> = Rc<RefCell<Option<T>>>;

fn slot<T>() -> Slot<T> {
    Rc::new(RefCell::new(None))
}

fn store<T>(result: T, slot: Slot<T>) {
    *slot.borrow_mut() = Some(result);
}

fn listening(serv: &SocketServ) -> (Socket, u16) {
    let listener = Socket::new();
    listener.set_socket_serv(serv);
    listener.open_tcp().expect("open listener");
    listener.listen_tcp("127.0.0.1", 0, 4).expect("listen");
    let port = listener.local_port().expect("local port");

    (listener, port)
}

fn tcp_socket(serv: &SocketServ) -> Socket {
    let socket = Socket::new();
    socket.set_socket_serv(serv);
    socket.open_tcp().expect("open");
    socket
}

/// Returns (listener, accepted server side, client).
fn connected_pair(reactor: &Reactor, serv: &SocketServ) -> (Socket, Socket, Socket) {
    let (listener, port) = listening(serv);

    let blank = Socket::new();
    blank.set_socket_serv(serv);
    blank.open_blank().expect("open blank");

    let accepted = slot();
    listener.accept(&blank, store, accepted.clone());

    let client = tcp_socket(serv);
    let connected = slot();
    client.connect_tcp("localhost", port, store, connected.clone());

    reactor
        .run_until(|| accepted.borrow().is_some() && connected.borrow().is_some())
        .expect("run");

    assert_eq!(connected.borrow_mut().take(), Some(Ok(())));
    let server = accepted
        .borrow_mut()
        .take()
        .expect("accept completed")
        .expect("accepted");

    (listener, server, client)
}

#[test]
fn accept_read_and_write_with_std_peer() {
    let reactor = Reactor::new().expect("reactor");
    let serv = SocketServ::connect();
    let (listener, port) = listening(&serv);

    let blank = Socket::new();
    blank.set_socket_serv(&serv);
    blank.open_blank().expect("open blank");

    let accepted = slot();
    listener.accept(&blank, store, accepted.clone());

    let peer = std::thread::spawn(move || {
        let mut stream = StdTcpStream::connect((Ipv4Addr::LOCALHOST, port)).expect("connect");
        stream.write_all(b"ping").expect("write");
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).expect("read_exact");
        buf.to_vec()
    });

    reactor
        .run_until(|| accepted.borrow().is_some())
        .expect("run");
    let server = accepted
        .borrow_mut()
        .take()
        .expect("accept completed")
        .expect("accepted");

    assert!(server.same_as(&blank));
    assert_eq!(server.mode(), Some(Mode::Blank));

    let received = slot();
    server.read_exact(4, store, received.clone());
    reactor
        .run_until(|| received.borrow().is_some())
        .expect("run");
    assert_eq!(received.borrow_mut().take(), Some(Ok(b"ping".to_vec())));

    let written = slot();
    server.write(b"pong", store, written.clone());
    reactor
        .run_until(|| written.borrow().is_some())
        .expect("run");
    assert_eq!(written.borrow_mut().take(), Some(Ok(())));

    assert_eq!(peer.join().expect("peer"), b"pong".to_vec());
}

#[test]
fn written_bytes_come_back_from_sync_read() {
    let reactor = Reactor::new().expect("reactor");
    let serv = SocketServ::connect();
    let (_listener, server, client) = connected_pair(&reactor, &serv);

    let written: Slot<Status> = slot();
    client.write(b"hello, world".to_vec(), store, written.clone());
    reactor
        .run_until(|| written.borrow().is_some())
        .expect("run");
    assert_eq!(written.borrow_mut().take(), Some(Ok(())));

    assert_eq!(server.sync_read(64).expect("sync_read"), b"hello, world".to_vec());

    client.write(Vec::new(), store, written.clone());
    reactor
        .run_until(|| written.borrow().is_some())
        .expect("run");
    assert_eq!(written.borrow_mut().take(), Some(Ok(())));
    assert_eq!(server.sync_read(0).expect("sync_read"), Vec::<u8>::new());
}

#[test]
fn sync_write_and_eof() {
    let reactor = Reactor::new().expect("reactor");
    let serv = SocketServ::connect();
    let (_listener, server, client) = connected_pair(&reactor, &serv);

    client.sync_write(b"abc").expect("sync_write");
    client.send_eof().expect("send_eof");

    let received = slot();
    server.read_exact(3, store, received.clone());
    reactor
        .run_until(|| received.borrow().is_some())
        .expect("run");
    assert_eq!(received.borrow_mut().take(), Some(Ok(b"abc".to_vec())));

    assert_eq!(server.sync_read(16).expect("sync_read at eof"), Vec::<u8>::new());

    server.read_some(16, store, received.clone());
    reactor
        .run_until(|| received.borrow().is_some())
        .expect("run");
    assert_eq!(received.borrow_mut().take(), Some(Err(Error::Eof)));
}

#[test]
fn read_exact_reports_early_eof() {
    let reactor = Reactor::new().expect("reactor");
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let serv = SocketServ::connect();
    let client = tcp_socket(&serv);
    let connected = slot();
    client.connect_tcp("localhost", port, store, connected.clone());

    reactor
        .run_until(|| connected.borrow().is_some())
        .expect("run");
    assert_eq!(connected.borrow_mut().take(), Some(Ok(())));

    let (mut peer, _) = listener.accept().expect("accept");
    peer.write_all(b"ab").expect("write");
    drop(peer);

    let received = slot();
    client.read_exact(4, store, received.clone());
    reactor
        .run_until(|| received.borrow().is_some())
        .expect("run");
    assert_eq!(received.borrow_mut().take(), Some(Err(Error::Eof)));
}

#[test]
fn refused_connect_keeps_socket_open() {
    let reactor = Reactor::new().expect("reactor");
    let port = {
        let unused = StdTcpListener::bind("127.0.0.1:0").expect("bind");
        unused.local_addr().expect("addr").port()
    };

    let serv = SocketServ::connect();
    let client = tcp_socket(&serv);
    let connected = slot();
    client.connect_tcp("localhost", port, store, connected.clone());

    reactor
        .run_until(|| connected.borrow().is_some())
        .expect("run");

    assert_eq!(
        connected.borrow_mut().take(),
        Some(Err(Error::Os(libc::ECONNREFUSED)))
    );
    assert!(client.is_open());
}

#[test]
fn oversized_read_fails_through_callback() {
    let reactor = Reactor::builder()
        .max_read_size(16)
        .build()
        .expect("reactor");
    let serv = SocketServ::connect();
    let (_listener, server, _client) = connected_pair(&reactor, &serv);

    let received = slot();
    server.read_some(17, store, received.clone());
    assert!(received.borrow().is_none());

    reactor
        .run_until(|| received.borrow().is_some())
        .expect("run");
    assert_eq!(received.borrow_mut().take(), Some(Err(Error::NoMemory)));
    assert_eq!(server.sync_read(17), Err(Error::NoMemory));
}

#[test]
fn cancel_read_reports_once() {
    let reactor = Reactor::new().expect("reactor");
    let serv = SocketServ::connect();
    let (_listener, server, _client) = connected_pair(&reactor, &serv);

    let calls = Rc::new(RefCell::new(Vec::new()));
    server.read_some(
        8,
        |result, calls: Rc<RefCell<Vec<Result<Vec<u8>, Error>>>>| calls.borrow_mut().push(result),
        calls.clone(),
    );

    server.cancel_read();
    server.cancel_read();
    reactor.try_turn().expect("turn");

    assert_eq!(*calls.borrow(), vec![Err(Error::Cancelled)]);

    server.read_some(
        8,
        |result, calls: Rc<RefCell<Vec<Result<Vec<u8>, Error>>>>| calls.borrow_mut().push(result),
        calls.clone(),
    );
    server.cancel_read();
    assert_eq!(calls.borrow().len(), 2);
}

#[test]
fn close_cancels_pending_requests_and_releases_sessions() {
    let reactor = Reactor::new().expect("reactor");
    let serv = SocketServ::connect();
    let (listener, server, client) = connected_pair(&reactor, &serv);

    let read = slot();
    client.read_some(8, store, read.clone());

    client.close();
    assert_eq!(read.borrow_mut().take(), Some(Err(Error::Cancelled)));
    assert!(!client.is_open());
    assert!(client.socket_serv().is_none());

    listener.close();
    server.close();
    assert_eq!(serv.subsessions(), 0);
    serv.close();
}

#[test]
fn dropping_socket_cancels_pending_requests_once() {
    let reactor = Reactor::new().expect("reactor");
    let serv = SocketServ::connect();
    let (listener, _server, client) = connected_pair(&reactor, &serv);

    let read = slot();
    client.read_some(8, store, read.clone());
    let written = slot();
    client.write(b"late", store, written.clone());

    let blank = Socket::new();
    blank.set_socket_serv(&serv);
    blank.open_blank().expect("open blank");
    let accepted = slot();
    listener.accept(&blank, store, accepted.clone());

    drop(client);
    drop(listener);

    assert_eq!(read.borrow_mut().take(), Some(Err(Error::Cancelled)));
    assert_eq!(written.borrow_mut().take(), Some(Err(Error::Cancelled)));
    assert!(matches!(
        accepted.borrow_mut().take(),
        Some(Err(Error::Cancelled))
    ));

    reactor.try_turn().expect("turn");
    assert!(read.borrow().is_none());
    assert!(written.borrow().is_none());
    assert!(accepted.borrow().is_none());
    assert_eq!(serv.subsessions(), 2);
}

#[test]
fn close_keep_session_allows_reopen() {
    let reactor = Reactor::new().expect("reactor");
    let serv = SocketServ::connect();
    let (_listener, server, _client) = connected_pair(&reactor, &serv);

    let read = slot();
    server.read_some(8, store, read.clone());
    server.close_keep_session();

    assert_eq!(read.borrow_mut().take(), Some(Err(Error::Cancelled)));
    assert!(!server.is_open());
    assert!(server.socket_serv().is_some());

    server.open_tcp().expect("reopen");
    assert_eq!(server.mode(), Some(Mode::Tcp));
}

#[test]
fn cancel_connect_during_lookup_reports_once() {
    let reactor = Reactor::new().expect("reactor");
    let serv = SocketServ::connect();
    let client = tcp_socket(&serv);

    let calls = Rc::new(RefCell::new(Vec::new()));
    client.connect_tcp(
        "peer.invalid",
        80,
        |status, calls: Rc<RefCell<Vec<Status>>>| calls.borrow_mut().push(status),
        calls.clone(),
    );

    client.cancel_connect();
    client.cancel_connect();
    reactor.try_turn().expect("turn");

    assert_eq!(*calls.borrow(), vec![Err(Error::Cancelled)]);
    assert!(client.is_open());
}

#[test]
fn write_without_transport_fails_unless_cancelled() {
    let reactor = Reactor::new().expect("reactor");
    let serv = SocketServ::connect();
    let blank = Socket::new();
    blank.set_socket_serv(&serv);
    blank.open_blank().expect("open blank");

    let calls = Rc::new(RefCell::new(Vec::new()));
    let record = |status, calls: Rc<RefCell<Vec<Status>>>| calls.borrow_mut().push(status);

    blank.write(b"nowhere", record, calls.clone());
    blank.cancel_write();
    blank.write(b"nowhere", record, calls.clone());
    reactor
        .run_until(|| calls.borrow().len() == 2)
        .expect("run");

    assert_eq!(
        *calls.borrow(),
        vec![Err(Error::Cancelled), Err(Error::NotConnected)]
    );
    assert_eq!(blank.sync_write(b"x"), Err(Error::NotConnected));
}

#[test]
fn failed_listen_closes_but_keeps_session() {
    let _reactor = Reactor::new().expect("reactor");
    let taken = StdTcpListener::bind("127.0.0.1:0").expect("bind");
    let port = taken.local_addr().expect("addr").port();

    let serv = SocketServ::connect();
    let socket = tcp_socket(&serv);

    assert_eq!(
        socket.listen_tcp("127.0.0.1", port, 1),
        Err(Error::Os(libc::EADDRINUSE))
    );
    assert!(!socket.is_open());
    assert!(socket.socket_serv().is_some());
    assert_eq!(serv.subsessions(), 0);

    socket.open_tcp().expect("reopen");
}

#[test]
fn reopen_switches_mode() {
    let _reactor = Reactor::new().expect("reactor");
    let serv = SocketServ::connect();
    let socket = tcp_socket(&serv);

    socket.open_blank().expect("reopen blank");

    assert_eq!(socket.mode(), Some(Mode::Blank));
    assert_eq!(socket.raw_fd(), None);
    assert_eq!(serv.subsessions(), 1);
}

#[test]
fn connection_binds_outbound_source() {
    let reactor = Reactor::new().expect("reactor");
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let serv = SocketServ::connect();
    let connection = Connection::new();
    connection
        .open(&serv, AccessPoint::new(Ipv4Addr::LOCALHOST.into()))
        .expect("open connection");

    let client = Socket::new();
    client.set_socket_serv(&serv);
    client.set_connection(&connection);
    client.open_tcp().expect("open");
    assert_eq!(connection.dependents(), 1);

    let connected = slot();
    client.connect_tcp("localhost", port, store, connected.clone());
    reactor
        .run_until(|| connected.borrow().is_some())
        .expect("run");
    assert_eq!(connected.borrow_mut().take(), Some(Ok(())));

    let (_, peer) = listener.accept().expect("accept");
    assert_eq!(peer.ip(), std::net::IpAddr::from(Ipv4Addr::LOCALHOST));

    client.close();
    assert_eq!(connection.dependents(), 0);
    assert!(client.connection().is_none());
}

#[test]
#[should_panic(expected = "request already pending")]
fn second_pending_read_is_fatal() {
    let _reactor = Reactor::new().expect("reactor");
    let serv = SocketServ::connect();
    let socket = Socket::new();
    socket.set_socket_serv(&serv);
    socket.open_blank().expect("open blank");

    socket.read_some(8, |_, _| {}, ());
    socket.read_some(8, |_, _| {}, ());
}

#[test]
#[should_panic(expected = "accept before listen")]
fn accept_before_listen_is_fatal() {
    let _reactor = Reactor::new().expect("reactor");
    let serv = SocketServ::connect();
    let socket = tcp_socket(&serv);

    let blank = Socket::new();
    blank.set_socket_serv(&serv);
    blank.open_blank().expect("open blank");

    socket.accept(&blank, |_, _| {}, ());
}

#[test]
#[should_panic(expected = "wrong transport mode")]
fn bluetooth_listen_on_tcp_socket_is_fatal() {
    let _reactor = Reactor::new().expect("reactor");
    let serv = SocketServ::connect();
    let socket = tcp_socket(&serv);

    let _ = socket.listen_bt(1, 1, 0x1234, "svc");
}

#[test]
#[should_panic(expected = "socket not open")]
fn read_on_closed_socket_is_fatal() {
    let _reactor = Reactor::new().expect("reactor");
    let socket = Socket::new();

    socket.read_some(8, |_, _| {}, ());
}

#[test]
#[should_panic(expected = "socket server session not set")]
fn open_without_session_is_fatal() {
    let _reactor = Reactor::new().expect("reactor");
    let socket = Socket::new();

    let _ = socket.open_tcp();
}

#[test]
#[should_panic(expected = "session in use")]
fn rebinding_session_while_open_is_fatal() {
    let _reactor = Reactor::new().expect("reactor");
    let serv = SocketServ::connect();
    let socket = tcp_socket(&serv);

    socket.set_socket_serv(&SocketServ::connect());
}

#[test]
#[should_panic(expected = "callback panicked: boom")]
fn panicking_callback_is_fatal() {
    let reactor = Reactor::new().expect("reactor");
    let serv = SocketServ::connect();
    let socket = Socket::new();
    socket.set_socket_serv(&serv);
    socket.open_blank().expect("open blank");

    socket.read_some(8, |_, _| panic!("boom"), ());
    reactor.run().expect("run");
}
