use crate::{ResponseError, TransportError};

/// Failure below the applet protocol
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bytes that are not a short command APDU
    #[error("Malformed command APDU of {0} bytes")]
    MalformedCommand(usize),

    /// Data field longer than a short APDU allows
    #[error("Command data of {0} bytes does not fit a short APDU")]
    DataTooLong(usize),

    /// Bytes that are not a response APDU
    #[error(transparent)]
    Response(#[from] ResponseError),

    /// The link to the card failed
    #[error(transparent)]
    Transport(#[from] TransportError),
}
