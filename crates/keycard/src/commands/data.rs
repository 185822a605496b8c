use bytes::Bytes;

use super::expect_empty;
use crate::constants::{CLA, ins, p1};

/// Public records readable without a secure channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PersistentRecord {
    /// General public data
    Public = 0x00,
    /// NDEF record
    Ndef = 0x01,
    /// Cash applet record
    Cash = 0x02,
}

impl PersistentRecord {
    /// Record selected by a P1 byte
    pub const fn from_p1(p1: u8) -> Option<Self> {
        match p1 {
            0x00 => Some(Self::Public),
            0x01 => Some(Self::Ndef),
            0x02 => Some(Self::Cash),
            _ => None,
        }
    }
}

keycard_command! {
    /// STORE DATA
    pub struct StoreDataCommand {
        cla: CLA,
        ins: ins::STORE_DATA,
        success: (),

        builders {
            /// Replace the content of a record
            pub fn put(record: PersistentRecord, data: &[u8]) -> Self {
                Self::new(record as u8, 0x00).with_data(Bytes::copy_from_slice(data))
            }
        }

        parse = |payload| {
            expect_empty(payload)
        }
    }
}

keycard_command! {
    /// GET DATA
    pub struct GetDataCommand {
        cla: CLA,
        ins: ins::GET_DATA,
        success: Bytes,

        builders {
            /// Read a record
            pub const fn get(record: PersistentRecord) -> Self {
                Self::new(record as u8, 0x00)
            }
        }

        parse = |payload| {
            Ok(Bytes::copy_from_slice(payload))
        }
    }
}

keycard_command! {
    /// FACTORY RESET, wipes keys, credentials and pairings
    pub struct FactoryResetCommand {
        cla: CLA,
        ins: ins::FACTORY_RESET,
        success: (),

        builders {
            /// Reset with the magic parameters
            pub const fn reset() -> Self {
                Self::new(p1::FACTORY_RESET, p1::FACTORY_RESET_P2)
            }
        }

        parse = |payload| {
            expect_empty(payload)
        }
    }
}
