use std::fmt;

use coins_bip39::{MnemonicError, WordlistError};
use derive_more::Display;
use iso7816_tlv::TlvError;
use keycard_apdu::{ResponseError, StatusWord, TransportError};

use crate::constants::ins;
use crate::path::KeyPathError;
use crate::state::{AppletState, Requirement};
use crate::types::Capability;
use crate::validation::ValidationError;

/// Result type for Keycard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for Keycard operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transport failed to move bytes to or from the card
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The card answered with a non-success status word
    #[error(transparent)]
    StatusWord(#[from] StatusWordError),

    /// Wrong PIN or PUK, with attempts left
    #[error(transparent)]
    Authentication(AuthenticationError),

    /// PIN or PUK has no attempts left
    #[error("{} is blocked", .0.credential)]
    CredentialBlocked(AuthenticationError),

    /// Handshake, MAC or counter failure
    #[error(transparent)]
    SecureChannel(#[from] SecureChannelError),

    /// Operation attempted outside of its legal session state
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    /// Malformed response
    #[error(transparent)]
    Decoding(#[from] DecodingError),

    /// Key agreement, cipher or signature math failure
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Invalid user input
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Invalid derivation path
    #[error(transparent)]
    KeyPath(#[from] KeyPathError),

    /// Wordlist lookup failure
    #[error(transparent)]
    Wordlist(#[from] WordlistError),

    /// Phrase with a bad checksum or length
    #[error(transparent)]
    Mnemonic(MnemonicError),
}

impl Error {
    /// Map a failing status word of the given instruction to an error
    ///
    /// `63Cx` on VERIFY PIN and UNBLOCK PIN carries the remaining attempts of
    /// the PIN and PUK respectively. Zero attempts is reported as
    /// [`Error::CredentialBlocked`].
    pub fn from_status(instruction: u8, status: StatusWord) -> Self {
        let credential = match instruction {
            ins::VERIFY_PIN => Some(Credential::Pin),
            ins::UNBLOCK_PIN => Some(Credential::Puk),
            _ => None,
        };

        match (credential, status.retry_counter()) {
            (Some(credential), Some(0)) => Self::CredentialBlocked(AuthenticationError {
                credential,
                remaining: 0,
            }),
            (Some(credential), Some(remaining)) => Self::Authentication(AuthenticationError {
                credential,
                remaining,
            }),
            _ => Self::StatusWord(StatusWordError {
                instruction,
                status,
            }),
        }
    }

    /// Remaining PIN/PUK attempts carried by an authentication failure
    pub const fn remaining_attempts(&self) -> Option<u8> {
        match self {
            Self::Authentication(e) | Self::CredentialBlocked(e) => Some(e.remaining),
            _ => None,
        }
    }

    /// Status word returned by the card, if this error carries one
    pub const fn status_word(&self) -> Option<StatusWord> {
        match self {
            Self::StatusWord(e) => Some(e.status),
            Self::SecureChannel(SecureChannelError::CardClosed(status)) => Some(*status),
            _ => None,
        }
    }

    /// Whether the card was lost during the operation
    pub const fn is_disconnect(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_disconnect())
    }
}

impl From<keycard_apdu::Error> for Error {
    fn from(error: keycard_apdu::Error) -> Self {
        match error {
            keycard_apdu::Error::Transport(e) => Self::Transport(e),
            keycard_apdu::Error::Response(e) => Self::Decoding(DecodingError::Response(e)),
            keycard_apdu::Error::MalformedCommand(len) => {
                Self::Decoding(DecodingError::InvalidLength {
                    field: "command",
                    expected: 4,
                    actual: len,
                })
            }
            keycard_apdu::Error::DataTooLong(len) => Self::Validation(ValidationError::OutOfRange {
                field: "command data",
                value: len,
                min: 0,
                max: keycard_apdu::command::MAX_DATA_LEN,
            }),
        }
    }
}

impl From<MnemonicError> for Error {
    fn from(error: MnemonicError) -> Self {
        match error {
            MnemonicError::WordlistError(e) => Self::Wordlist(e),
            other => Self::Mnemonic(other),
        }
    }
}

impl From<TlvError> for Error {
    fn from(error: TlvError) -> Self {
        Self::Decoding(DecodingError::Tlv(error))
    }
}

impl From<k256::elliptic_curve::Error> for Error {
    fn from(error: k256::elliptic_curve::Error) -> Self {
        Self::Decoding(DecodingError::InvalidKey(error))
    }
}

impl From<k256::ecdsa::Error> for Error {
    fn from(error: k256::ecdsa::Error) -> Self {
        Self::Crypto(CryptoError::Ecdsa(error))
    }
}

impl From<coins_bip32::Bip32Error> for Error {
    fn from(error: coins_bip32::Bip32Error) -> Self {
        Self::Crypto(CryptoError::Bip32(error))
    }
}

/// Credential guarded by a retry counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Credential {
    /// User PIN
    #[display("PIN")]
    Pin,
    /// PIN unblock key
    #[display("PUK")]
    Puk,
}

/// Wrong credential, with the attempts left on the card
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Wrong {credential}: {remaining} attempts remaining")]
pub struct AuthenticationError {
    /// Which credential was rejected
    pub credential: Credential,
    /// Attempts left before the credential is blocked
    pub remaining: u8,
}

/// A command failed with a status word
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub struct StatusWordError {
    /// Instruction byte of the failing command
    pub instruction: u8,
    /// Raw status word
    pub status: StatusWord,
}

impl StatusWordError {
    /// Named classification of the status word
    pub const fn kind(&self) -> StatusKind {
        StatusKind::from_status(self.status)
    }
}

impl fmt::Display for StatusWordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Command {:02X} failed with status {}: {}",
            self.instruction,
            self.status,
            self.kind()
        )
    }
}

/// Status words the Keycard applet is known to return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum StatusKind {
    /// 6700
    #[display("wrong length")]
    WrongLength,
    /// 6982
    #[display("security status not satisfied")]
    SecurityStatusNotSatisfied,
    /// 6985
    #[display("conditions of use not satisfied")]
    ConditionsNotSatisfied,
    /// 6A80
    #[display("wrong data")]
    WrongData,
    /// 6A82
    #[display("file not found")]
    FileNotFound,
    /// 6A84
    #[display("not enough memory (no free slot)")]
    FileFull,
    /// 6A86
    #[display("incorrect P1/P2")]
    IncorrectP1P2,
    /// 6A88
    #[display("referenced data not found")]
    ReferencedDataNotFound,
    /// 6D00
    #[display("instruction not supported")]
    InsNotSupported,
    /// 6E00
    #[display("class not supported")]
    ClaNotSupported,
    /// 63Cx outside of PIN/PUK verification
    #[display("verification failed, {_0} attempts remaining")]
    VerificationFailed(u8),
    /// Anything else
    #[display("unknown status")]
    Unknown,
}

impl StatusKind {
    /// Classify a status word
    pub const fn from_status(status: StatusWord) -> Self {
        if let Some(remaining) = status.retry_counter() {
            return Self::VerificationFailed(remaining);
        }

        match status.to_u16() {
            0x6700 => Self::WrongLength,
            0x6982 => Self::SecurityStatusNotSatisfied,
            0x6985 => Self::ConditionsNotSatisfied,
            0x6A80 => Self::WrongData,
            0x6A82 => Self::FileNotFound,
            0x6A84 => Self::FileFull,
            0x6A86 => Self::IncorrectP1P2,
            0x6A88 => Self::ReferencedDataNotFound,
            0x6D00 => Self::InsNotSupported,
            0x6E00 => Self::ClaNotSupported,
            _ => Self::Unknown,
        }
    }
}

/// Secure channel failures
///
/// Every variant except [`SecureChannelError::NotOpen`] leaves the channel
/// closed; a new handshake is needed to continue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecureChannelError {
    /// A wrapped command was requested without an open channel
    #[error("Secure channel is not open")]
    NotOpen,

    /// The handshake exchange was malformed
    #[error("Secure channel handshake failed: {0}")]
    Handshake(&'static str),

    /// The card did not prove knowledge of the pairing token
    #[error("Card cryptogram does not match the pairing password")]
    PairingCryptogram,

    /// MUTUALLY AUTHENTICATE was rejected or malformed
    #[error("Mutual authentication failed")]
    MutualAuthentication,

    /// Response MAC did not verify
    #[error("Response MAC mismatch: expected {}, received {}", hex(.expected), hex(.received))]
    MacMismatch {
        /// MAC computed by the host
        expected: [u8; 16],
        /// MAC sent by the card
        received: [u8; 16],
    },

    /// Response does not answer the outstanding command
    #[error("Secure channel counter mismatch: expected {expected}, received {received}")]
    CounterMismatch {
        /// Counter of the outstanding command
        expected: u64,
        /// Counter the response was matched against
        received: u64,
    },

    /// A new command was wrapped while a response is still outstanding
    #[error("Response to command {counter} is still outstanding")]
    ResponsePending {
        /// Counter of the outstanding command
        counter: u64,
    },

    /// The card answered a wrapped command in the clear, closing its side
    #[error("Card closed the secure channel with status {0}")]
    CardClosed(StatusWord),

    /// Wrapped response with an impossible layout
    #[error("Malformed secure channel response: {0}")]
    Malformed(&'static str),
}

fn hex(bytes: &[u8]) -> String {
    alloy_primitives::hex::encode(bytes)
}

/// Operation attempted at the wrong time
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreconditionError {
    /// The session is not in the state the operation needs
    #[error("{operation} requires {required}, session is {actual}")]
    State {
        /// Operation that was refused
        operation: &'static str,
        /// State the operation needs
        required: Requirement,
        /// State the session is in
        actual: AppletState,
    },

    /// The card is gone; wait for a new connection
    #[error("Card is disconnected")]
    Disconnected,

    /// The applet does not advertise a needed capability
    #[error("{operation} requires the {capability} capability")]
    MissingCapability {
        /// Operation that was refused
        operation: &'static str,
        /// Capability that is missing
        capability: Capability,
    },

    /// The card did not publish a secure channel public key
    #[error("Card has no secure channel public key")]
    NoCardKey,
}

/// Malformed card response
#[derive(Debug, thiserror::Error)]
pub enum DecodingError {
    /// TLV structure could not be parsed
    #[error("TlvError: {0}")]
    Tlv(TlvError),

    /// Response APDU could not be parsed
    #[error(transparent)]
    Response(ResponseError),

    /// A template had the wrong tag
    #[error("Unexpected TLV tag, expected {expected:02X}")]
    UnexpectedTag {
        /// Tag that was expected
        expected: u8,
    },

    /// A mandatory record is missing
    #[error("Missing TLV record {0:02X}")]
    MissingTag(u8),

    /// A field has the wrong size
    #[error("Invalid {field} length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Field being decoded
        field: &'static str,
        /// Expected byte count
        expected: usize,
        /// Actual byte count
        actual: usize,
    },

    /// Invalid EC point or scalar
    #[error(transparent)]
    InvalidKey(k256::elliptic_curve::Error),

    /// Any other malformed data
    #[error("Invalid data: {0}")]
    InvalidData(&'static str),
}

/// Cryptographic failure
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Padding could not be applied
    #[error("Pad error")]
    Pad(#[from] cipher::inout::PadError),

    /// Decrypted data is not ISO 7816-4 padded
    #[error("Unpad error")]
    Unpad(#[from] cipher::block_padding::UnpadError),

    /// ECDSA failure
    #[error(transparent)]
    Ecdsa(k256::ecdsa::Error),

    /// BIP32 derivation failure
    #[error(transparent)]
    Bip32(coins_bip32::Bip32Error),

    /// The signing key could not be recovered from a signature
    #[error("Signature does not recover to the signing key")]
    Recovery,

    /// The card did not sign the identification challenge
    #[error("Identity proof does not verify")]
    IdentityProof,
}
