//! Response APDUs

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::StatusWord;

/// Response bytes could not be split into payload and status word
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResponseError {
    /// Fewer than the two status bytes arrived
    #[error("Response of {0} bytes has no status word")]
    MissingStatusWord(usize),
}

/// A response APDU: optional payload followed by SW1 SW2
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    payload: Option<Bytes>,
    status: StatusWord,
}

impl Response {
    /// Response with a payload and status word
    pub fn new(payload: Option<Bytes>, status: impl Into<StatusWord>) -> Self {
        Self {
            payload: payload.filter(|p| !p.is_empty()),
            status: status.into(),
        }
    }

    /// `9000`, optionally with a payload
    pub fn success(payload: Option<Bytes>) -> Self {
        Self::new(payload, StatusWord::SUCCESS)
    }

    /// Bare status word
    pub fn error(status: impl Into<StatusWord>) -> Self {
        Self::new(None, status)
    }

    /// Split raw bytes into payload and status word
    pub fn from_bytes(raw: &[u8]) -> Result<Self, ResponseError> {
        let [payload @ .., sw1, sw2] = raw else {
            return Err(ResponseError::MissingStatusWord(raw.len()));
        };
        let status = StatusWord::new(*sw1, *sw2);
        trace!(%status, payload_len = payload.len(), "Parsed response");

        Ok(Self::new(
            Some(Bytes::copy_from_slice(payload)),
            status,
        ))
    }

    /// Payload, `None` when the card sent only a status word
    pub const fn payload(&self) -> &Option<Bytes> {
        &self.payload
    }

    /// Status word
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// Whether the status word is `9000`
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Encode as payload followed by SW1 SW2
    pub fn to_bytes(&self) -> Bytes {
        let payload = self.payload.as_deref().unwrap_or_default();
        let mut buf = BytesMut::with_capacity(payload.len() + 2);
        buf.put_slice(payload);
        buf.put_slice(&self.status.to_bytes());
        buf.freeze()
    }
}

impl TryFrom<&[u8]> for Response {
    type Error = ResponseError;

    fn try_from(raw: &[u8]) -> Result<Self, Self::Error> {
        Self::from_bytes(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes() {
        let resp = Response::from_bytes(&[0x01, 0x02, 0x03, 0x90, 0x00]).unwrap();
        assert_eq!(resp.payload().as_deref(), Some(&[0x01, 0x02, 0x03][..]));
        assert!(resp.is_success());

        let resp = Response::from_bytes(&[0x63, 0xC2]).unwrap();
        assert!(resp.payload().is_none());
        assert_eq!(resp.status().retry_counter(), Some(2));

        assert_eq!(
            Response::from_bytes(&[0x90]),
            Err(ResponseError::MissingStatusWord(1))
        );
    }

    #[test]
    fn test_to_bytes() {
        let resp = Response::new(Some(Bytes::from_static(&[0xAB])), 0x6985u16);
        assert_eq!(resp.to_bytes().as_ref(), &[0xAB, 0x69, 0x85]);
        assert_eq!(Response::success(None).to_bytes().as_ref(), &[0x90, 0x00]);
    }
}
