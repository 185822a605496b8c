use bytes::Bytes;

use super::expect_empty;
use crate::{
    constants::{CLA, ins, p1},
    crypto::{Challenge, Cryptogram},
    error::DecodingError,
};

/// Response to either step of PAIR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairResponse {
    /// Step one: the card proves knowledge of the pairing token
    FirstStep {
        /// `SHA-256(token || host challenge)`
        card_cryptogram: Cryptogram,
        /// Challenge the host has to answer
        card_challenge: Challenge,
    },
    /// Step two: the slot and the salt of the pairing key
    FinalStep {
        /// Pairing slot assigned by the card
        index: u8,
        /// Salt hashed with the token into the pairing key
        salt: Challenge,
    },
}

keycard_command! {
    /// PAIR, two steps
    pub struct PairCommand {
        cla: CLA,
        ins: ins::PAIR,
        success: PairResponse,

        builders {
            /// First step with the host challenge
            pub fn with_first_stage(challenge: &Challenge) -> Self {
                Self::new(p1::PAIR_FIRST_STEP, 0x00).with_data(Bytes::copy_from_slice(challenge))
            }

            /// Final step with the host cryptogram over the card challenge
            pub fn with_final_stage(cryptogram: &Cryptogram) -> Self {
                Self::new(p1::PAIR_FINAL_STEP, 0x00).with_data(Bytes::copy_from_slice(cryptogram))
            }
        }

        parse = |payload| {
            match payload.len() {
                64 => {
                    let mut card_cryptogram = Cryptogram::default();
                    let mut card_challenge = Challenge::default();
                    card_cryptogram.copy_from_slice(&payload[..32]);
                    card_challenge.copy_from_slice(&payload[32..]);
                    Ok(PairResponse::FirstStep {
                        card_cryptogram,
                        card_challenge,
                    })
                }
                33 => {
                    let mut salt = Challenge::default();
                    salt.copy_from_slice(&payload[1..]);
                    Ok(PairResponse::FinalStep {
                        index: payload[0],
                        salt,
                    })
                }
                _ => Err(DecodingError::InvalidData("unexpected PAIR response length").into()),
            }
        }
    }
}

keycard_command! {
    /// UNPAIR, frees a pairing slot
    pub struct UnpairCommand {
        cla: CLA,
        ins: ins::UNPAIR,
        success: (),

        builders {
            /// Free the slot with the given index
            pub const fn with_index(index: u8) -> Self {
                Self::new(index, 0x00)
            }
        }

        parse = |payload| {
            expect_empty(payload)
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::hex;
    use keycard_apdu::ApduCommand;

    use super::*;

    #[test]
    fn test_pair_first_stage() {
        let challenge = [0x42; 32];
        let bytes = PairCommand::with_first_stage(&challenge).to_bytes();
        assert_eq!(&bytes[..5], &hex!("8012000020"));
        assert_eq!(&bytes[5..], &challenge);

        let mut response = vec![0x01; 32];
        response.extend_from_slice(&[0x02; 32]);
        response.extend_from_slice(&hex!("9000"));
        assert_eq!(
            PairCommand::parse_response_raw(Bytes::from(response)).unwrap(),
            PairResponse::FirstStep {
                card_cryptogram: [0x01; 32],
                card_challenge: [0x02; 32],
            }
        );
    }

    #[test]
    fn test_pair_final_stage() {
        let bytes = PairCommand::with_final_stage(&[0x07; 32]).to_bytes();
        assert_eq!(&bytes[..4], &hex!("80120100"));

        let mut response = vec![0x03];
        response.extend_from_slice(&[0x09; 32]);
        response.extend_from_slice(&hex!("9000"));
        assert_eq!(
            PairCommand::parse_response_raw(Bytes::from(response)).unwrap(),
            PairResponse::FinalStep {
                index: 3,
                salt: [0x09; 32],
            }
        );
    }

    #[test]
    fn test_pair_slots_full() {
        let err = PairCommand::parse_response_raw(Bytes::copy_from_slice(&hex!("6A84"))).unwrap_err();
        assert!(matches!(err, crate::Error::StatusWord(_)));
    }

    #[test]
    fn test_unpair() {
        assert_eq!(UnpairCommand::with_index(4).to_bytes().as_ref(), &hex!("80130400"));
    }
}
