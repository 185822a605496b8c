//! Keycard APDU commands
//!
//! Every command is a plain [`ApduCommand`](keycard_apdu::ApduCommand): a
//! header, optional data and a parser for the successful payload. Wrapping for
//! the secure channel happens later, on the generic
//! [`Command`](keycard_apdu::Command).

/// Define a Keycard command and its [`ApduCommand`](keycard_apdu::ApduCommand) impl
///
/// The generated struct carries P1, P2, data and Le. Builders listed in the
/// `builders` block are added to its inherent impl. `parse` receives the
/// payload of a `9000` response (empty when the card sent none); any other
/// status word becomes [`Error::from_status`](crate::Error::from_status).
macro_rules! keycard_command {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            cla: $cla:expr,
            ins: $ins:expr,
            success: $success:ty,

            builders {
                $($builders:item)*
            }

            parse = |$payload:ident| $parse:block
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            p1: u8,
            p2: u8,
            data: Option<bytes::Bytes>,
            le: Option<u8>,
        }

        #[allow(dead_code)]
        impl $name {
            /// Instruction byte
            pub const INS: u8 = $ins;

            const fn new(p1: u8, p2: u8) -> Self {
                Self {
                    p1,
                    p2,
                    data: None,
                    le: None,
                }
            }

            fn with_data(mut self, data: impl Into<bytes::Bytes>) -> Self {
                self.data = Some(data.into());
                self
            }

            const fn with_le(mut self, le: u8) -> Self {
                self.le = Some(le);
                self
            }

            fn parse_payload($payload: &[u8]) -> $crate::Result<$success> $parse

            $($builders)*
        }

        impl keycard_apdu::ApduCommand for $name {
            type Success = $success;
            type Error = $crate::Error;

            fn to_command(&self) -> keycard_apdu::Command {
                keycard_apdu::Command {
                    cla: $cla,
                    ins: Self::INS,
                    p1: self.p1,
                    p2: self.p2,
                    data: self.data.clone(),
                    le: self.le,
                }
            }

            fn parse_response(
                response: keycard_apdu::Response,
            ) -> ::core::result::Result<Self::Success, Self::Error> {
                if !response.is_success() {
                    return Err($crate::Error::from_status(Self::INS, response.status()));
                }
                Self::parse_payload(response.payload().as_deref().unwrap_or_default())
            }
        }
    };
}

mod data;
mod ident;
mod init;
mod keys;
mod pair;
mod pin;
mod secure_channel;
mod select;
mod status;

pub use data::{FactoryResetCommand, GetDataCommand, PersistentRecord, StoreDataCommand};
pub use ident::IdentCommand;
pub use init::InitCommand;
pub use keys::{
    DeriveKeyCommand, ExportKeyCommand, ExportOption, GenerateKeyCommand,
    GenerateMnemonicCommand, LoadKeyCommand, RemoveKeyCommand, SetPinlessPathCommand,
    SignCommand,
};
pub use pair::{PairCommand, PairResponse, UnpairCommand};
pub use pin::{ChangePinCommand, CredentialKind, UnblockPinCommand, VerifyPinCommand};
pub use secure_channel::{MutuallyAuthenticateCommand, OpenSecureChannelCommand, SessionParameters};
pub use select::SelectCommand;
pub use status::{GetKeyPathCommand, GetStatusCommand};

use crate::{Result, error::DecodingError};

/// Fail unless a payload is empty
pub(crate) fn expect_empty(payload: &[u8]) -> Result<()> {
    if payload.is_empty() {
        Ok(())
    } else {
        Err(DecodingError::InvalidLength {
            field: "payload",
            expected: 0,
            actual: payload.len(),
        }
        .into())
    }
}

/// Fail unless a payload has exactly `N` bytes
pub(crate) fn expect_len<const N: usize>(field: &'static str, payload: &[u8]) -> Result<[u8; N]> {
    crate::types::to_array(field, payload)
}
