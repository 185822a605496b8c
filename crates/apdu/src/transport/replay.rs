//! Transport that plays back a recorded APDU session
//!
//! Each recorded [`Exchange`] pairs an expectation on the outgoing command
//! with the reply the card gave. Encrypted commands carry fresh randomness on
//! every run, so an expectation may pin the full command, only its header or
//! nothing at all.

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::warn;

use super::{CardTransport, TransportError};

/// What the next outgoing command must look like
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expect {
    /// Byte-for-byte match
    Exact(Bytes),
    /// Match on CLA, INS, P1 and P2 only
    Header([u8; 4]),
    /// Accept any command
    Any,
}

impl Expect {
    fn matches(&self, command: &[u8]) -> bool {
        match self {
            Self::Exact(expected) => expected.as_ref() == command,
            Self::Header(header) => command.len() >= 4 && &command[..4] == header,
            Self::Any => true,
        }
    }
}

/// What the card did in response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Raw response bytes, status word included
    Response(Bytes),
    /// The exchange failed with a transport error
    Fail(TransportError),
}

/// One recorded command/response pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// Expectation on the command sent by the host
    pub expect: Expect,
    /// Recorded reply
    pub reply: Reply,
}

impl Exchange {
    /// Exchange that requires an exact command
    pub fn exact(command: impl Into<Bytes>, response: impl Into<Bytes>) -> Self {
        Self {
            expect: Expect::Exact(command.into()),
            reply: Reply::Response(response.into()),
        }
    }

    /// Exchange that only checks the command header
    pub fn header(header: [u8; 4], response: impl Into<Bytes>) -> Self {
        Self {
            expect: Expect::Header(header),
            reply: Reply::Response(response.into()),
        }
    }

    /// Exchange where the transport fails
    pub const fn failure(expect: Expect, error: TransportError) -> Self {
        Self {
            expect,
            reply: Reply::Fail(error),
        }
    }
}

/// Replays recorded exchanges in order
#[derive(Debug, Clone, Default)]
pub struct ReplayTransport {
    exchanges: VecDeque<Exchange>,
    sent: Vec<Bytes>,
    connected: bool,
}

impl ReplayTransport {
    /// Create a transport that will replay the given exchanges
    pub fn new(exchanges: impl IntoIterator<Item = Exchange>) -> Self {
        Self {
            exchanges: exchanges.into_iter().collect(),
            sent: Vec::new(),
            connected: false,
        }
    }

    /// Append an exchange to the end of the script
    pub fn push(&mut self, exchange: Exchange) {
        self.exchanges.push_back(exchange);
    }

    /// Commands that were sent so far
    pub fn sent(&self) -> &[Bytes] {
        &self.sent
    }

    /// Number of exchanges not yet consumed
    pub fn remaining(&self) -> usize {
        self.exchanges.len()
    }

    /// Whether every recorded exchange has been played
    pub fn is_exhausted(&self) -> bool {
        self.exchanges.is_empty()
    }
}

impl CardTransport for ReplayTransport {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }

        self.sent.push(Bytes::copy_from_slice(command));

        let Some(exchange) = self.exchanges.pop_front() else {
            return Err(TransportError::other("replay script exhausted"));
        };

        if !exchange.expect.matches(command) {
            warn!(
                command = %hex::encode(command),
                expected = ?exchange.expect,
                "Command does not match recorded exchange"
            );
            return Err(TransportError::other("command does not match recording"));
        }

        match exchange.reply {
            Reply::Response(bytes) => Ok(bytes),
            Reply::Fail(error) => {
                if error.is_disconnect() {
                    self.connected = false;
                }
                Err(error)
            }
        }
    }

    fn connect(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replays_in_order() {
        let mut transport = ReplayTransport::new([
            Exchange::exact(vec![0x00, 0xA4, 0x04, 0x00], vec![0x90, 0x00]),
            Exchange::header([0x80, 0xF2, 0x00, 0x00], vec![0x01, 0x90, 0x00]),
        ]);
        transport.connect().unwrap();

        let resp = transport.transmit_raw(&[0x00, 0xA4, 0x04, 0x00]).unwrap();
        assert_eq!(resp.as_ref(), &[0x90, 0x00]);

        let resp = transport.transmit_raw(&[0x80, 0xF2, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(resp.as_ref(), &[0x01, 0x90, 0x00]);

        assert!(transport.is_exhausted());
        assert_eq!(transport.sent().len(), 2);
    }

    #[test]
    fn test_mismatch_is_an_error() {
        let mut transport = ReplayTransport::new([Exchange::exact(
            vec![0x80, 0x20, 0x00, 0x00],
            vec![0x90, 0x00],
        )]);
        transport.connect().unwrap();

        let err = transport.transmit_raw(&[0x80, 0x21, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, TransportError::Other(_)));
    }

    #[test]
    fn test_recorded_disconnect_drops_link() {
        let mut transport = ReplayTransport::new([Exchange::failure(
            Expect::Any,
            TransportError::Disconnected,
        )]);
        transport.connect().unwrap();

        assert_eq!(
            transport.transmit_raw(&[0x80, 0xF2, 0x00, 0x00]),
            Err(TransportError::Disconnected)
        );
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_requires_connection() {
        let mut transport = ReplayTransport::default();
        assert_eq!(
            transport.transmit_raw(&[0x00]),
            Err(TransportError::Disconnected)
        );
    }
}
