//! Configuration options for a Keycard session

use bytes::Bytes;

use crate::{
    constants::{DEFAULT_PAIRING_SLOTS, KEYCARD_AID},
    events::DEFAULT_EVENT_CAPACITY,
};

/// Default number of retries for transient transport errors
pub const DEFAULT_MAX_TRANSPORT_RETRIES: u8 = 3;

/// Configuration options for a Keycard session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeycardConfig {
    /// Application identifier sent with SELECT
    pub aid: Bytes,

    /// Retries for transient transport errors, only while no secure channel is open
    pub max_transport_retries: u8,

    /// Pairing slots walked by `unpair_others`
    pub pairing_slots: u8,

    /// Queue length of each [`events`](crate::Keycard::events) subscriber
    pub event_capacity: usize,
}

impl Default for KeycardConfig {
    fn default() -> Self {
        Self {
            aid: Bytes::from_static(KEYCARD_AID),
            max_transport_retries: DEFAULT_MAX_TRANSPORT_RETRIES,
            pairing_slots: DEFAULT_PAIRING_SLOTS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl KeycardConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the AID, e.g. an instance AID
    pub fn with_aid(mut self, aid: impl Into<Bytes>) -> Self {
        self.aid = aid.into();
        self
    }

    /// Set the retry budget for transient transport errors
    pub const fn with_max_transport_retries(mut self, retries: u8) -> Self {
        self.max_transport_retries = retries;
        self
    }

    /// Set the number of pairing slots
    pub const fn with_pairing_slots(mut self, slots: u8) -> Self {
        self.pairing_slots = slots;
        self
    }

    /// Set the queue length of each event subscriber
    pub const fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}
