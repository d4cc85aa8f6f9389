//! Bluetooth RFCOMM transport.
//!
//! The engine talks to a Bluetooth stack through the [`BtStack`] trait:
//! socket creation and addressing, free channel lookup, security
//! registration, and SDP (service discovery) databases and agents. Built on
//! it are:
//!
//! - [`advertiser`]: publishes one serial-port service record
//! - [`discoverer`]: finds the RFCOMM channel of a named service on a device
//! - `accepter` and `connecter`: the listen/configure/accept and connect
//!   state machines used by [`Socket`](crate::Socket) in Bluetooth mode
//! - [`loopback`]: an in-process stack over Unix-domain sockets

pub(crate) mod accepter;
pub mod advertiser;
pub(crate) mod connecter;
pub mod discoverer;
#[cfg(feature = "loopback")]
pub mod loopback;
pub mod sdp;

use crate::error::{Error, Status, Violation, fatal};
use crate::net::utils::SockAddr;
use crate::bt::sdp::{SdpAgent, SdpDatabase};

use std::fmt;
use std::io;
use std::os::fd::{OwnedFd, RawFd};

use futures::future::LocalBoxFuture;

/// Length of a textual device address, `"00:0a:3a:11:22:33"`.
pub const ADDRESS_TEXT_LEN: usize = 17;

/// A 48-bit Bluetooth device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BtAddr([u8; 6]);

impl BtAddr {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Parses six colon-separated two-digit hex octets.
    ///
    /// # Panics
    /// If `text` is not exactly 17 characters of that form.
    ///
    /// # Example
    /// ```ignore
    /// let device = BtAddr::parse("00:0a:3a:11:22:33");
    /// assert_eq!(device.octets(), [0x00, 0x0a, 0x3a, 0x11, 0x22, 0x33]);
    /// ```
    #[track_caller]
    pub fn parse(text: &str) -> Self {
        if text.len() != ADDRESS_TEXT_LEN || !text.is_ascii() {
            fatal(Violation::ArgumentError);
        }

        let bytes = text.as_bytes();
        let mut octets = [0u8; 6];

        for (index, octet) in octets.iter_mut().enumerate() {
            let offset = index * 3;
            if index > 0 && bytes[offset - 1] != b':' {
                fatal(Violation::ArgumentError);
            }

            let pair = &text[offset..offset + 2];
            *octet = match u8::from_str_radix(pair, 16) {
                Ok(value) if pair.bytes().all(|byte| byte.is_ascii_hexdigit()) => value,
                _ => fatal(Violation::ArgumentError),
            };
        }

        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for BtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Security requested for a listening RFCOMM service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityPolicy {
    pub service_id: u32,
    pub channel: u8,
    pub authentication: bool,
    pub authorisation: bool,
    pub encryption: bool,
}

impl SecurityPolicy {
    /// Authentication, authorisation and encryption all required.
    pub fn strict(service_id: u32, channel: u8) -> Self {
        Self {
            service_id,
            channel,
            authentication: true,
            authorisation: true,
            encryption: true,
        }
    }
}

/// A Bluetooth protocol stack.
pub trait BtStack {
    /// Creates a non-blocking RFCOMM stream socket.
    fn open_socket(&self) -> io::Result<OwnedFd>;

    /// Returns a channel no listener is bound to.
    fn available_channel(&self, socket: RawFd) -> Result<u8, Error>;

    /// Address a listener binds to for `channel` on this device.
    fn listen_address(&self, channel: u8) -> Result<SockAddr, Error>;

    /// Address of `channel` on a remote `device`.
    fn peer_address(&self, device: BtAddr, channel: u8) -> Result<SockAddr, Error>;

    /// Registers `policy` with the stack's security manager.
    fn register_security(&self, policy: SecurityPolicy) -> LocalBoxFuture<'static, Status>;

    /// Removes the policy registered for `service_id`.
    fn unregister_security(&self, service_id: u32);

    /// Opens this device's SDP database.
    fn sdp_database(&self) -> Result<Box<dyn SdpDatabase>, Error>;

    /// Opens an SDP query session towards `device`.
    fn sdp_agent(&self, device: BtAddr) -> Result<Box<dyn SdpAgent>, Error>;
}
