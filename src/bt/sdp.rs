//! Service Discovery Protocol data model.
//!
//! Attribute values form a tree: sequences (`List`) and alternatives nest
//! other values. Consumers walk a value with an [`AttrVisitor`]; every value is
//! visited, and nested sequences are bracketed by `start_list`/`end_list`.

use crate::error::{Error, Status};

use std::ops::RangeInclusive;

use futures::future::LocalBoxFuture;

/// Attribute identifier within a service record.
pub type AttrId = u16;

/// Universal attribute identifiers.
pub mod attr {
    use super::AttrId;

    pub const SERVICE_RECORD_HANDLE: AttrId = 0x0000;
    pub const SERVICE_CLASS_ID_LIST: AttrId = 0x0001;
    pub const SERVICE_RECORD_STATE: AttrId = 0x0002;
    pub const SERVICE_ID: AttrId = 0x0003;
    pub const PROTOCOL_DESCRIPTOR_LIST: AttrId = 0x0004;
    pub const SERVICE_AVAILABILITY: AttrId = 0x0008;
    /// Service name at the primary language base (0x0100) plus offset 0.
    pub const SERVICE_NAME: AttrId = 0x0100;
}

/// Every attribute identifier.
pub const ALL_ATTRIBUTES: RangeInclusive<AttrId> = 0x0000..=0xffff;

/// A 128-bit Bluetooth UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uuid(u128);

impl Uuid {
    const BASE: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

    pub const L2CAP: Uuid = Uuid::from_u32(0x0100);
    pub const RFCOMM: Uuid = Uuid::from_u32(0x0003);
    pub const SERIAL_PORT: Uuid = Uuid::from_u32(0x1101);

    /// Expands a 16- or 32-bit alias over the Bluetooth base UUID.
    pub const fn from_u32(alias: u32) -> Self {
        Self(((alias as u128) << 96) | Self::BASE)
    }

    pub const fn from_u128(value: u128) -> Self {
        Self(value)
    }

    pub const fn as_u128(&self) -> u128 {
        self.0
    }
}

/// Value of one SDP attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Nil,
    Uint(u64),
    Int(i64),
    Uuid(Uuid),
    Text(String),
    Bool(bool),
    /// Data element sequence.
    List(Vec<AttrValue>),
    /// Data element alternative.
    Alternative(Vec<AttrValue>),
    Url(String),
}

impl AttrValue {
    /// Walks this value depth-first.
    pub fn accept(&self, visitor: &mut dyn AttrVisitor) {
        visitor.visit(self);

        if let AttrValue::List(items) | AttrValue::Alternative(items) = self {
            visitor.start_list();
            for item in items {
                item.accept(visitor);
            }
            visitor.end_list();
        }
    }
}

pub trait AttrVisitor {
    fn visit(&mut self, value: &AttrValue);

    fn start_list(&mut self) {}

    fn end_list(&mut self) {}
}

/// Handle of a record in an SDP database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordHandle(pub u32);

/// The local device's service record database.
pub trait SdpDatabase {
    /// Creates a record listing `service_class` as its service class.
    fn create_record(&mut self, service_class: Uuid) -> Result<RecordHandle, Error>;

    fn update_attribute(&mut self, record: RecordHandle, id: AttrId, value: AttrValue) -> Status;

    fn delete_record(&mut self, record: RecordHandle) -> Status;
}

/// Query session towards a remote device's SDP server.
pub trait SdpAgent {
    /// Restricts [`next_record`](Self::next_record) to records of `service_class`.
    fn set_record_filter(&mut self, service_class: Uuid) -> Status;

    /// The next matching record, or `None` once all have been returned.
    fn next_record(&mut self) -> LocalBoxFuture<'static, Result<Option<RecordHandle>, Error>>;

    /// The attributes of `record` whose identifiers fall in `range`.
    fn attributes(
        &mut self,
        record: RecordHandle,
        range: RangeInclusive<AttrId>,
    ) -> LocalBoxFuture<'static, Result<Vec<(AttrId, AttrValue)>, Error>>;
}

/// RFCOMM protocol descriptor list: `((L2CAP), (RFCOMM, channel))`.
pub fn rfcomm_protocol_list(channel: u8) -> AttrValue {
    AttrValue::List(vec![
        AttrValue::List(vec![AttrValue::Uuid(Uuid::L2CAP)]),
        AttrValue::List(vec![
            AttrValue::Uuid(Uuid::RFCOMM),
            AttrValue::Uint(channel as u64),
        ]),
    ])
}
