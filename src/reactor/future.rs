//! Readiness-driven futures over non-blocking socket descriptors.
//!
//! Each future attempts its syscall on every poll. On `EAGAIN` or
//! `EWOULDBLOCK` it registers the task's waker with the reactor for the
//! matching direction and returns `Poll::Pending`; the reactor wakes the task
//! once the descriptor is ready again.

use crate::net::utils::{self, SockAddr};
use crate::reactor::event::Interest;
use crate::reactor::handle::ReactorHandle;

use std::future::Future;
use std::io;
use std::os::fd::{OwnedFd, RawFd};
use std::pin::Pin;
use std::task::{Context, Poll};

fn pending_or<T>(
    result: io::Result<T>,
    reactor: &ReactorHandle,
    fd: RawFd,
    interest: Interest,
    cx: &mut Context<'_>,
) -> Poll<io::Result<T>> {
    match result {
        Ok(value) => Poll::Ready(Ok(value)),
        Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
            reactor.register(fd, interest, cx.waker().clone());
            Poll::Pending
        }
        Err(error) if error.kind() == io::ErrorKind::Interrupted => {
            cx.waker().wake_by_ref();
            Poll::Pending
        }
        Err(error) => Poll::Ready(Err(error)),
    }
}

/// Receives into a buffer. Resolves to the byte count, `0` at end of stream.
pub(crate) struct ReadFuture<'a> {
    fd: RawFd,
    buffer: &'a mut [u8],
    reactor: ReactorHandle,
}

impl<'a> ReadFuture<'a> {
    pub(crate) fn new(fd: RawFd, buffer: &'a mut [u8], reactor: ReactorHandle) -> Self {
        Self { fd, buffer, reactor }
    }
}

impl Future for ReadFuture<'_> {
    type Output = io::Result<usize>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.as_mut().get_mut();
        let result = utils::recv(this.fd, this.buffer);

        pending_or(result, &this.reactor, this.fd, Interest::Read, cx)
    }
}

/// Sends part of a buffer. Resolves to the byte count written.
pub(crate) struct WriteFuture<'a> {
    fd: RawFd,
    buffer: &'a [u8],
    reactor: ReactorHandle,
}

impl<'a> WriteFuture<'a> {
    pub(crate) fn new(fd: RawFd, buffer: &'a [u8], reactor: ReactorHandle) -> Self {
        Self { fd, buffer, reactor }
    }
}

impl Future for WriteFuture<'_> {
    type Output = io::Result<usize>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = utils::send(self.fd, self.buffer);

        pending_or(result, &self.reactor, self.fd, Interest::Write, cx)
    }
}

/// Accepts one connection from a listening descriptor.
pub(crate) struct AcceptFuture {
    listen_fd: RawFd,
    reactor: ReactorHandle,
}

impl AcceptFuture {
    pub(crate) fn new(listen_fd: RawFd, reactor: ReactorHandle) -> Self {
        Self { listen_fd, reactor }
    }
}

impl Future for AcceptFuture {
    type Output = io::Result<OwnedFd>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = utils::accept(self.listen_fd);

        pending_or(result, &self.reactor, self.listen_fd, Interest::Read, cx)
    }
}

/// Connects a non-blocking socket, waiting for writability while in progress.
pub(crate) struct ConnectFuture {
    fd: RawFd,
    address: SockAddr,
    reactor: ReactorHandle,
    started: bool,
}

impl ConnectFuture {
    pub(crate) fn new(fd: RawFd, address: SockAddr, reactor: ReactorHandle) -> Self {
        Self {
            fd,
            address,
            reactor,
            started: false,
        }
    }
}

impl Future for ConnectFuture {
    type Output = io::Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.started {
            match utils::take_error(self.fd) {
                Ok(Some(error)) | Err(error) => return Poll::Ready(Err(error)),
                Ok(None) => {}
            }
        }

        self.started = true;

        match utils::connect(self.fd, &self.address) {
            Ok(true) => Poll::Ready(Ok(())),
            Ok(false) => {
                self.reactor
                    .register(self.fd, Interest::Write, cx.waker().clone());
                Poll::Pending
            }
            Err(error) => Poll::Ready(Err(error)),
        }
    }
}
