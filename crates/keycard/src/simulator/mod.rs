//! Software Keycard for tests and demos
//!
//! [`SimulatorHandle`] owns an in-memory applet; [`SimulatedTransport`]
//! reaches it through the same [`CardTransport`](keycard_apdu::CardTransport)
//! interface a reader would.

mod applet;
mod channel;
mod transport;

pub use channel::CardChannel;
pub use transport::{SimulatedTransport, SimulatorHandle};
