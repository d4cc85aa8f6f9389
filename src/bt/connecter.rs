//! Outbound Bluetooth connect.

use crate::bt::{BtAddr, BtStack};
use crate::error::Status;
use crate::net::tasks::SocketConnecter;

use std::os::fd::RawFd;

/// Single-shot connect to an RFCOMM channel on a remote device.
pub(crate) struct BtConnecter {
    connecter: SocketConnecter,
}

impl BtConnecter {
    pub(crate) fn new() -> Self {
        Self {
            connecter: SocketConnecter::new(),
        }
    }

    /// Connects `fd` to `channel` on `device`.
    ///
    /// An address the stack rejects is reported through `handler` like any
    /// other connect failure.
    pub(crate) fn connect<H>(&self, fd: RawFd, stack: &dyn BtStack, device: BtAddr, channel: u8, handler: H)
    where
        H: FnOnce(Status) + 'static,
    {
        tracing::debug!(%device, channel, "bluetooth connect");

        match stack.peer_address(device, channel) {
            Ok(address) => self.connecter.connect(fd, address, None, handler),
            Err(error) => self.connecter.fail(error, handler),
        }
    }

    pub(crate) fn cancel(&self) {
        self.connecter.cancel();
    }
}
