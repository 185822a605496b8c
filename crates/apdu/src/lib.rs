//! APDU framing and card transports for the Keycard host engine
//!
//! [`Command`] and [`Response`] encode short ISO/IEC 7816-4 APDUs,
//! [`ApduCommand`] ties a typed command to the parser of its answer and
//! [`CardTransport`] moves the raw bytes. [`ReplayTransport`] plays back a
//! recorded session for tests.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod command;
pub mod response;
pub mod status;
pub mod transport;

mod error;

pub use bytes::Bytes;
pub use command::{ApduCommand, Command};
pub use error::Error;
pub use response::{Response, ResponseError};
pub use status::StatusWord;
pub use transport::{
    CardTransport, TransportError,
    replay::{Exchange, Expect, Reply, ReplayTransport},
};
