//! Short command APDUs
//!
//! The Keycard applet only speaks short APDUs: Lc and Le are single bytes and
//! the data field never exceeds 255 bytes.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, Response};

/// Largest data field of a short APDU
pub const MAX_DATA_LEN: usize = 255;

/// A command APDU as it travels on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// First parameter
    pub p1: u8,
    /// Second parameter
    pub p2: u8,
    /// Data field, sent with its Lc prefix
    pub data: Option<Bytes>,
    /// Expected response length
    pub le: Option<u8>,
}

impl Command {
    /// Header-only command
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
        }
    }

    /// Command carrying a data field
    pub fn new_with_data(cla: u8, ins: u8, p1: u8, p2: u8, data: impl Into<Bytes>) -> Self {
        Self::new(cla, ins, p1, p2).with_data(data)
    }

    /// Replace the data field
    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set Le
    pub const fn with_le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    /// CLA, INS, P1 and P2
    pub const fn header(&self) -> [u8; 4] {
        [self.cla, self.ins, self.p1, self.p2]
    }

    /// Size of the encoded command
    pub fn encoded_len(&self) -> usize {
        let body = self.data.as_ref().map_or(0, |data| 1 + data.len());
        4 + body + usize::from(self.le.is_some())
    }

    /// Encode as `CLA INS P1 P2 [Lc data] [Le]`, checking the data length
    pub fn encode(&self) -> Result<Bytes, Error> {
        match &self.data {
            Some(data) if data.len() > MAX_DATA_LEN => Err(Error::DataTooLong(data.len())),
            _ => Ok(self.to_bytes()),
        }
    }

    /// Encode as `CLA INS P1 P2 [Lc data] [Le]`
    ///
    /// The data field must fit a short APDU; see [`Command::encode`].
    pub fn to_bytes(&self) -> Bytes {
        debug_assert!(
            self.data.as_ref().is_none_or(|data| data.len() <= MAX_DATA_LEN),
            "data field exceeds a short APDU"
        );
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(&self.header());
        if let Some(data) = &self.data {
            buf.put_u8(data.len() as u8);
            buf.put_slice(data);
        }
        if let Some(le) = self.le {
            buf.put_u8(le);
        }
        buf.freeze()
    }

    /// Decode a short APDU
    ///
    /// A single byte after the header is read as Le. Otherwise the fifth byte
    /// is Lc and may be followed by exactly one Le byte.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, Error> {
        let malformed = || Error::MalformedCommand(raw.len());

        let [cla, ins, p1, p2, body @ ..] = raw else {
            return Err(malformed());
        };
        let mut command = Self::new(*cla, *ins, *p1, *p2);

        match body {
            [] => {}
            [le] => command.le = Some(*le),
            [lc, rest @ ..] => {
                let lc = usize::from(*lc);
                if rest.len() < lc {
                    return Err(malformed());
                }
                let (data, trailer) = rest.split_at(lc);
                if lc > 0 {
                    command.data = Some(Bytes::copy_from_slice(data));
                }
                match trailer {
                    [] => {}
                    [le] => command.le = Some(*le),
                    _ => return Err(malformed()),
                }
            }
        }

        Ok(command)
    }
}

impl fmt::Display for Command {
    /// Header and lengths only; the data field may hold secrets
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X} {:02X} {:02X} {:02X}",
            self.cla, self.ins, self.p1, self.p2
        )?;
        if let Some(data) = &self.data {
            write!(f, " Lc={}", data.len())?;
        }
        if let Some(le) = self.le {
            write!(f, " Le={le}")?;
        }
        Ok(())
    }
}

/// A typed command: how to build it and how to read the card's answer
pub trait ApduCommand {
    /// Value produced from a successful response
    type Success;

    /// Error produced for failed or malformed responses
    type Error: From<Error> + fmt::Debug;

    /// The wire form of this command
    fn to_command(&self) -> Command;

    /// Encoded command bytes
    fn to_bytes(&self) -> Bytes {
        self.to_command().to_bytes()
    }

    /// Interpret a response, status word included
    fn parse_response(response: Response) -> Result<Self::Success, Self::Error>;

    /// Interpret raw response bytes
    fn parse_response_raw(raw: Bytes) -> Result<Self::Success, Self::Error> {
        let response = Response::from_bytes(&raw).map_err(Error::from)?;
        Self::parse_response(response)
    }
}

impl ApduCommand for Command {
    type Success = Response;
    type Error = Error;

    fn to_command(&self) -> Command {
        self.clone()
    }

    fn parse_response(response: Response) -> Result<Response, Error> {
        Ok(response)
    }
}
