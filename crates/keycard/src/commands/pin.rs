use bytes::{BufMut, Bytes, BytesMut};

use super::expect_empty;
use crate::{
    constants::{CLA, ins, p1},
    crypto::PairingToken,
};

/// Credential replaced by CHANGE PIN
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// User PIN
    Pin,
    /// PUK
    Puk,
    /// Pairing token
    PairingSecret,
}

impl CredentialKind {
    /// CHANGE PIN P1
    pub const fn p1(self) -> u8 {
        match self {
            Self::Pin => p1::CHANGE_PIN,
            Self::Puk => p1::CHANGE_PUK,
            Self::PairingSecret => p1::CHANGE_PAIRING_SECRET,
        }
    }
}

keycard_command! {
    /// VERIFY PIN
    pub struct VerifyPinCommand {
        cla: CLA,
        ins: ins::VERIFY_PIN,
        success: (),

        builders {
            /// Verify the given PIN
            pub fn with_pin(pin: &str) -> Self {
                Self::new(0x00, 0x00).with_data(Bytes::copy_from_slice(pin.as_bytes()))
            }
        }

        parse = |payload| {
            expect_empty(payload)
        }
    }
}

keycard_command! {
    /// CHANGE PIN, also used for the PUK and the pairing secret
    pub struct ChangePinCommand {
        cla: CLA,
        ins: ins::CHANGE_PIN,
        success: (),

        builders {
            /// Replace the user PIN
            pub fn with_pin(pin: &str) -> Self {
                Self::with_credential(CredentialKind::Pin, pin.as_bytes())
            }

            /// Replace the PUK
            pub fn with_puk(puk: &str) -> Self {
                Self::with_credential(CredentialKind::Puk, puk.as_bytes())
            }

            /// Replace the pairing token
            pub fn with_pairing_secret(token: &PairingToken) -> Self {
                Self::with_credential(CredentialKind::PairingSecret, token)
            }

            /// Replace any credential with raw data
            pub fn with_credential(kind: CredentialKind, data: &[u8]) -> Self {
                Self::new(kind.p1(), 0x00).with_data(Bytes::copy_from_slice(data))
            }
        }

        parse = |payload| {
            expect_empty(payload)
        }
    }
}

keycard_command! {
    /// UNBLOCK PIN with the PUK
    pub struct UnblockPinCommand {
        cla: CLA,
        ins: ins::UNBLOCK_PIN,
        success: (),

        builders {
            /// Unblock with the PUK and set a new PIN
            pub fn with_puk_and_new_pin(puk: &str, new_pin: &str) -> Self {
                let mut data = BytesMut::with_capacity(puk.len() + new_pin.len());
                data.put_slice(puk.as_bytes());
                data.put_slice(new_pin.as_bytes());
                Self::new(0x00, 0x00).with_data(data.freeze())
            }
        }

        parse = |payload| {
            expect_empty(payload)
        }
    }
}
