//! Error types specific to card transport

/// Transport error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection could not be established
    #[error("Failed to connect to device")]
    Connection,

    /// The card left the field or the link dropped
    #[error("Card disconnected")]
    Disconnected,

    /// A single exchange failed but the link is still up
    #[error("Failed to transmit data")]
    Transmission,

    /// Device error
    #[error("Device error")]
    Device,

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Cancelled operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Other error with message
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Whether the same exchange may be attempted again
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transmission | Self::Timeout)
    }

    /// Whether the card is gone and any session state must be dropped
    pub const fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Connection)
    }

    /// Create a general other error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other(message.into())
    }
}
