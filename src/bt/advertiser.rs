//! Serial-port service advertisement.
//!
//! An [`Advertiser`] owns at most one record in the local SDP database.
//! Adding a record deletes the previous one first, and the record is deleted
//! when the advertiser is dropped.

use crate::bt::BtStack;
use crate::bt::sdp::{self, AttrValue, RecordHandle, SdpDatabase, Uuid, attr};
use crate::error::{Error, Status, Violation, fatal};

const AVAILABLE: u64 = 0xff;
const UNAVAILABLE: u64 = 0x00;

pub struct Advertiser {
    database: Box<dyn SdpDatabase>,
    record: Option<RecordHandle>,
    available: bool,
    record_state: u32,
}

impl Advertiser {
    pub fn new(database: Box<dyn SdpDatabase>) -> Self {
        Self {
            database,
            record: None,
            available: false,
            record_state: 0,
        }
    }

    /// Opens the SDP database of `stack`.
    pub fn open(stack: &dyn BtStack) -> Result<Self, Error> {
        Ok(Self::new(stack.sdp_database()?))
    }

    /// Publishes an available serial-port record for an RFCOMM `channel`.
    ///
    /// # Arguments
    /// * `channel` - RFCOMM channel the service listens on
    /// * `service_id` - Short alias of the service UUID
    /// * `name` - Human readable service name
    ///
    /// # Returns
    /// The first error met; the half-built record is deleted in that case.
    pub fn add_record(&mut self, channel: u8, service_id: u32, name: &str) -> Status {
        self.delete_record();

        let record = self.database.create_record(Uuid::SERIAL_PORT)?;
        self.record = Some(record);
        self.available = false;

        let result = self.fill_record(record, channel, service_id, name);
        match result {
            Ok(()) => {
                tracing::debug!(record = record.0, channel, service_id, "service record added");
                Ok(())
            }
            Err(error) => {
                tracing::debug!(%error, "service record rejected");
                self.delete_record();
                Err(error)
            }
        }
    }

    fn fill_record(&mut self, record: RecordHandle, channel: u8, service_id: u32, name: &str) -> Status {
        self.database.update_attribute(
            record,
            attr::PROTOCOL_DESCRIPTOR_LIST,
            sdp::rfcomm_protocol_list(channel),
        )?;
        self.database.update_attribute(
            record,
            attr::SERVICE_ID,
            AttrValue::Uuid(Uuid::from_u32(service_id)),
        )?;
        self.database
            .update_attribute(record, attr::SERVICE_NAME, AttrValue::Text(name.to_owned()))?;

        self.mark_available(true)
    }

    /// Deletes the record, if any.
    pub fn delete_record(&mut self) {
        let Some(record) = self.record.take() else {
            return;
        };

        self.available = false;
        if let Err(error) = self.database.delete_record(record) {
            tracing::warn!(record = record.0, %error, "service record delete failed");
        }
    }

    /// Sets the availability attribute and bumps the record state.
    ///
    /// # Panics
    /// If no record has been added.
    #[track_caller]
    pub fn mark_available(&mut self, available: bool) -> Status {
        let Some(record) = self.record else {
            fatal(Violation::NoServiceRecord);
        };

        let value = if available { AVAILABLE } else { UNAVAILABLE };
        self.database
            .update_attribute(record, attr::SERVICE_AVAILABILITY, AttrValue::Uint(value))?;

        let state = self.record_state.wrapping_add(1);
        self.database
            .update_attribute(record, attr::SERVICE_RECORD_STATE, AttrValue::Uint(state as u64))?;

        self.record_state = state;
        self.available = available;
        Ok(())
    }

    pub fn is_record_added(&self) -> bool {
        self.record.is_some()
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Change counter last written to the record.
    pub fn record_state(&self) -> u32 {
        self.record_state
    }
}

impl Drop for Advertiser {
    fn drop(&mut self) {
        self.delete_record();
    }
}
