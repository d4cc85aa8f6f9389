//! Single-purpose socket tasks.
//!
//! Each task performs one kind of operation on one socket descriptor and
//! reports its completion to a [`SocketObserver`], the socket engine that owns
//! it. At most one request per task is pending at a time.

use crate::error::{Error, Status};
use crate::net::utils::SockAddr;
use crate::net::utils;
use crate::reactor::future::{AcceptFuture, ConnectFuture, ReadFuture, WriteFuture};
use crate::reactor::handle::ReactorHandle;
use crate::task::AsyncTask;

use std::os::fd::{OwnedFd, RawFd};
use std::rc::Weak;

/// Receives the completion of every task a socket owns.
pub(crate) trait SocketObserver {
    fn data_written(&self, status: Status);
    fn data_read(&self, result: Result<Vec<u8>, Error>);
    fn client_accepted(&self, result: Result<OwnedFd, Error>);
    fn client_connected(&self, status: Status);
    fn socket_configured(&self, status: Status);
}

pub(crate) type ObserverRef = Weak<dyn SocketObserver>;

/// Reads either exactly `n` bytes or whatever is available.
pub(crate) struct SocketReader {
    task: AsyncTask<Vec<u8>>,
    reactor: ReactorHandle,
    observer: ObserverRef,
}

impl SocketReader {
    pub(crate) fn new(observer: ObserverRef) -> Self {
        Self {
            task: AsyncTask::new("socket-reader"),
            reactor: ReactorHandle::current(),
            observer,
        }
    }

    /// Receives between one and `max_size` bytes.
    ///
    /// Completes with [`Error::Eof`] if the peer has shut down.
    pub(crate) fn read_some(&self, fd: RawFd, max_size: usize) {
        let reactor = self.reactor.clone();

        self.task.start(
            async move {
                let mut buffer = vec![0u8; max_size];
                if max_size == 0 {
                    return Ok(buffer);
                }

                let received = ReadFuture::new(fd, &mut buffer, reactor).await?;
                if received == 0 {
                    return Err(Error::Eof);
                }

                buffer.truncate(received);
                Ok(buffer)
            },
            self.handler(),
        );
    }

    /// Receives exactly `size` bytes, or [`Error::Eof`] if the stream ends first.
    pub(crate) fn read_exact(&self, fd: RawFd, size: usize) {
        let reactor = self.reactor.clone();

        self.task.start(
            async move {
                let mut buffer = vec![0u8; size];
                let mut filled = 0;

                while filled < size {
                    let received =
                        ReadFuture::new(fd, &mut buffer[filled..], reactor.clone()).await?;
                    if received == 0 {
                        return Err(Error::Eof);
                    }

                    filled += received;
                }

                Ok(buffer)
            },
            self.handler(),
        );
    }

    /// Reports `error` as this request's completion on the next turn.
    pub(crate) fn fail(&self, error: Error) {
        self.task.complete(Err(error), self.handler());
    }

    fn handler(&self) -> impl FnOnce(Result<Vec<u8>, Error>) + 'static {
        let observer = self.observer.clone();
        move |result| {
            if let Some(observer) = observer.upgrade() {
                observer.data_read(result);
            }
        }
    }

    pub(crate) fn cancel(&self) {
        self.task.cancel();
    }
}

/// Writes one whole buffer.
pub(crate) struct SocketWriter {
    task: AsyncTask<()>,
    reactor: ReactorHandle,
    observer: ObserverRef,
}

impl SocketWriter {
    pub(crate) fn new(observer: ObserverRef) -> Self {
        Self {
            task: AsyncTask::new("socket-writer"),
            reactor: ReactorHandle::current(),
            observer,
        }
    }

    /// Sends all of `data`, which the writer owns until completion.
    pub(crate) fn write(&self, fd: RawFd, data: Vec<u8>) {
        let reactor = self.reactor.clone();

        self.task.start(
            async move {
                let mut written = 0;
                while written < data.len() {
                    written += WriteFuture::new(fd, &data[written..], reactor.clone()).await?;
                }

                Ok(())
            },
            self.handler(),
        );
    }

    pub(crate) fn fail(&self, error: Error) {
        self.task.complete(Err(error), self.handler());
    }

    fn handler(&self) -> impl FnOnce(Status) + 'static {
        let observer = self.observer.clone();
        move |status| {
            if let Some(observer) = observer.upgrade() {
                observer.data_written(status);
            }
        }
    }

    pub(crate) fn cancel(&self) {
        self.task.cancel();
    }
}

/// Accepts one connection from a listening TCP socket.
pub(crate) struct SocketAccepter {
    task: AsyncTask<OwnedFd>,
    reactor: ReactorHandle,
    observer: ObserverRef,
}

impl SocketAccepter {
    pub(crate) fn new(observer: ObserverRef) -> Self {
        Self {
            task: AsyncTask::new("socket-accepter"),
            reactor: ReactorHandle::current(),
            observer,
        }
    }

    pub(crate) fn accept(&self, listen_fd: RawFd) {
        let accept = AcceptFuture::new(listen_fd, self.reactor.clone());

        self.task
            .start(async move { Ok(accept.await?) }, self.handler());
    }

    fn handler(&self) -> impl FnOnce(Result<OwnedFd, Error>) + 'static {
        let observer = self.observer.clone();
        move |result| {
            if let Some(observer) = observer.upgrade() {
                observer.client_accepted(result);
            }
        }
    }

    pub(crate) fn cancel(&self) {
        self.task.cancel();
    }
}

/// Connects an open socket to an already known address.
pub(crate) struct SocketConnecter {
    task: AsyncTask<()>,
    reactor: ReactorHandle,
}

impl SocketConnecter {
    pub(crate) fn new() -> Self {
        Self {
            task: AsyncTask::new("socket-connecter"),
            reactor: ReactorHandle::current(),
        }
    }

    /// Connects `fd` to `address`, first binding it to `source` if given.
    pub(crate) fn connect<H>(&self, fd: RawFd, address: SockAddr, source: Option<SockAddr>, handler: H)
    where
        H: FnOnce(Status) + 'static,
    {
        let connect = ConnectFuture::new(fd, address, self.reactor.clone());

        self.task.start(
            async move {
                if let Some(source) = source {
                    utils::bind(fd, &source)?;
                }

                connect.await?;
                Ok(())
            },
            handler,
        );
    }

    pub(crate) fn fail<H>(&self, error: Error, handler: H)
    where
        H: FnOnce(Status) + 'static,
    {
        self.task.complete(Err(error), handler);
    }

    pub(crate) fn cancel(&self) {
        self.task.cancel();
    }
}
