use bytes::Bytes;
use k256::{PublicKey, elliptic_curve::sec1::ToEncodedPoint};

use super::expect_len;
use crate::constants::{CLA, ins};
use crate::crypto::{Challenge, Iv};

/// Salt and initial IV returned by OPEN SECURE CHANNEL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParameters {
    /// Salt mixed into the session key derivation
    pub salt: Challenge,
    /// IV of the first wrapped command
    pub iv: Iv,
}

keycard_command! {
    /// OPEN SECURE CHANNEL
    pub struct OpenSecureChannelCommand {
        cla: CLA,
        ins: ins::OPEN_SECURE_CHANNEL,
        success: SessionParameters,

        builders {
            /// Open a channel for the given pairing slot with an ephemeral host key
            pub fn with_pairing_index_and_pubkey(index: u8, public_key: &PublicKey) -> Self {
                let point = public_key.to_encoded_point(false);
                Self::new(index, 0x00).with_data(Bytes::copy_from_slice(point.as_bytes()))
            }
        }

        parse = |payload| {
            let bytes = expect_len::<48>("secure channel parameters", payload)?;
            let mut salt = Challenge::default();
            let mut iv = Iv::default();
            salt.copy_from_slice(&bytes[..32]);
            iv.copy_from_slice(&bytes[32..]);
            Ok(SessionParameters { salt, iv })
        }
    }
}

keycard_command! {
    /// MUTUALLY AUTHENTICATE, always sent wrapped
    pub struct MutuallyAuthenticateCommand {
        cla: CLA,
        ins: ins::MUTUALLY_AUTHENTICATE,
        success: Challenge,

        builders {
            /// Authenticate with a random host challenge
            pub fn with_challenge(challenge: &Challenge) -> Self {
                Self::new(0x00, 0x00).with_data(Bytes::copy_from_slice(challenge))
            }
        }

        parse = |payload| {
            expect_len::<32>("mutual authentication", payload)
        }
    }
}
