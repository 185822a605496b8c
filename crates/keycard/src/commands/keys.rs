use bytes::{BufMut, Bytes, BytesMut};

use super::{expect_empty, expect_len};
use crate::{
    Result,
    constants::{CLA, ins, p1},
    error::DecodingError,
    path::{KeyPath, KeyPathError},
    types::{Keypair, Signature},
    validation::{ValidationError, validate_word_count},
};

// P1 of EXPORT KEY / SIGN for a derived key
const fn derive_p1(path: &KeyPath, make_current: bool) -> u8 {
    let mode = if make_current {
        p1::KEY_DERIVE_AND_MAKE_CURRENT
    } else {
        p1::KEY_DERIVE
    };
    mode | path.source().p1_bits()
}

keycard_command! {
    /// GENERATE KEY, creates a new master key on the card
    pub struct GenerateKeyCommand {
        cla: CLA,
        ins: ins::GENERATE_KEY,
        success: [u8; 32],

        builders {
            /// Generate a random master key and chain code
            pub const fn create() -> Self {
                Self::new(0x00, 0x00)
            }
        }

        parse = |payload| {
            expect_len::<32>("key UID", payload)
        }
    }
}

keycard_command! {
    /// LOAD KEY, replaces the master key
    pub struct LoadKeyCommand {
        cla: CLA,
        ins: ins::LOAD_KEY,
        success: [u8; 32],

        builders {
            /// Load a key pair; an extended key pair when it has a chain code
            pub fn with_keypair(keypair: &Keypair) -> Result<Self> {
                if keypair.private_key.is_none() {
                    return Err(ValidationError::IncorrectLength {
                        field: "private key",
                        expected: 32,
                        actual: 0,
                    }
                    .into());
                }
                let p1 = if keypair.is_extended() {
                    p1::LOAD_KEY_EXTENDED_ECC
                } else {
                    p1::LOAD_KEY_ECC
                };
                Ok(Self::new(p1, 0x00).with_data(keypair.to_bytes()?).with_le(0))
            }

            /// Load a 64-byte BIP39 seed
            pub fn with_seed(seed: &[u8; 64]) -> Self {
                Self::new(p1::LOAD_KEY_SEED, 0x00)
                    .with_data(Bytes::copy_from_slice(seed))
                    .with_le(0)
            }
        }

        parse = |payload| {
            expect_len::<32>("key UID", payload)
        }
    }
}

keycard_command! {
    /// REMOVE KEY, deletes the master key
    pub struct RemoveKeyCommand {
        cla: CLA,
        ins: ins::REMOVE_KEY,
        success: (),

        builders {
            /// Remove the loaded key
            pub const fn remove() -> Self {
                Self::new(0x00, 0x00)
            }
        }

        parse = |payload| {
            expect_empty(payload)
        }
    }
}

keycard_command! {
    /// DERIVE KEY, moves the card's current key
    pub struct DeriveKeyCommand {
        cla: CLA,
        ins: ins::DERIVE_KEY,
        success: (),

        builders {
            /// Derive along `path` from its source
            pub fn with_path(path: &KeyPath) -> Self {
                let command = Self::new(path.source().p1_bits(), 0x00);
                if path.components().is_empty() {
                    command
                } else {
                    command.with_data(path.to_bytes())
                }
            }
        }

        parse = |payload| {
            expect_empty(payload)
        }
    }
}

/// What EXPORT KEY returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ExportOption {
    /// Private and public key
    PrivateAndPublic = 0x00,
    /// Public key only
    #[default]
    PublicKeyOnly = 0x01,
    /// Public key and chain code
    ExtendedPublicKey = 0x02,
}

keycard_command! {
    /// EXPORT KEY
    pub struct ExportKeyCommand {
        cla: CLA,
        ins: ins::EXPORT_KEY,
        success: Keypair,

        builders {
            /// Export the current key
            pub const fn current(option: ExportOption) -> Self {
                Self::new(p1::KEY_CURRENT, option as u8).with_le(0)
            }

            /// Export the key at `path`, optionally making it current
            pub fn with_path(option: ExportOption, path: &KeyPath, make_current: bool) -> Self {
                Self::new(derive_p1(path, make_current), option as u8)
                    .with_data(path.to_bytes())
                    .with_le(0)
            }
        }

        parse = |payload| {
            Keypair::try_from(payload)
        }
    }
}

keycard_command! {
    /// SIGN a 32-byte hash
    pub struct SignCommand {
        cla: CLA,
        ins: ins::SIGN,
        success: Signature,

        builders {
            /// Sign with the current key
            pub fn with_hash(hash: &[u8; 32]) -> Self {
                Self::new(p1::KEY_CURRENT, 0x00)
                    .with_data(Bytes::copy_from_slice(hash))
                    .with_le(0)
            }

            /// Sign with the key at `path`, optionally making it current
            pub fn with_path(hash: &[u8; 32], path: &KeyPath, make_current: bool) -> Self {
                let components = path.to_bytes();
                let mut data = BytesMut::with_capacity(hash.len() + components.len());
                data.put_slice(hash);
                data.put_slice(&components);
                Self::new(derive_p1(path, make_current), 0x00)
                    .with_data(data.freeze())
                    .with_le(0)
            }

            /// Sign with the PIN-less path, no PIN or secure channel needed
            pub fn pinless(hash: &[u8; 32]) -> Self {
                Self::new(p1::SIGN_PINLESS, 0x00)
                    .with_data(Bytes::copy_from_slice(hash))
                    .with_le(0)
            }
        }

        parse = |payload| {
            Signature::try_from(payload)
        }
    }
}

keycard_command! {
    /// SET PINLESS PATH
    pub struct SetPinlessPathCommand {
        cla: CLA,
        ins: ins::SET_PINLESS_PATH,
        success: (),

        builders {
            /// Set an absolute path; the master path disables PIN-less signing
            pub fn with_path(path: &KeyPath) -> Result<Self> {
                if !path.is_absolute() {
                    return Err(KeyPathError::NotAbsolute.into());
                }
                Ok(Self::new(0x00, 0x00).with_data(path.to_bytes()))
            }
        }

        parse = |payload| {
            expect_empty(payload)
        }
    }
}

keycard_command! {
    /// GENERATE MNEMONIC, returns word indices only
    pub struct GenerateMnemonicCommand {
        cla: CLA,
        ins: ins::GENERATE_MNEMONIC,
        success: Vec<u16>,

        builders {
            /// Request a mnemonic of 12, 15, 18, 21 or 24 words
            pub fn with_words(words: usize) -> Result<Self> {
                let checksum_size = validate_word_count(words)?;
                Ok(Self::new(checksum_size, 0x00).with_le(0))
            }
        }

        parse = |payload| {
            if payload.len() % 2 != 0 {
                return Err(DecodingError::InvalidData("odd mnemonic index data").into());
            }
            Ok(payload
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::hex;
    use keycard_apdu::ApduCommand;
    use rand_v8::thread_rng;

    use super::*;
    use crate::Error;

    #[test]
    fn test_derive_key() {
        let path: KeyPath = "m/44'/0'/0'/0/0".parse().unwrap();
        let bytes = DeriveKeyCommand::with_path(&path).to_bytes();
        assert_eq!(&bytes[..5], &hex!("80D1000014"));
        assert_eq!(&bytes[5..9], &hex!("8000002C"));

        let sibling: KeyPath = "../1".parse().unwrap();
        assert_eq!(DeriveKeyCommand::with_path(&sibling).p1, 0x40);

        let current: KeyPath = "./1".parse().unwrap();
        assert_eq!(DeriveKeyCommand::with_path(&current).p1, 0x80);

        assert_eq!(
            DeriveKeyCommand::with_path(&KeyPath::master()).to_bytes().as_ref(),
            &hex!("80D10000")
        );
    }

    #[test]
    fn test_export_key() {
        assert_eq!(
            ExportKeyCommand::current(ExportOption::PublicKeyOnly).to_bytes().as_ref(),
            &hex!("80C2000100")
        );

        let path: KeyPath = "m/43'/60'/1581'/0'/0".parse().unwrap();
        let cmd = ExportKeyCommand::with_path(ExportOption::PrivateAndPublic, &path, true);
        assert_eq!(cmd.p1, 0x02);
        assert_eq!(cmd.p2, 0x00);
    }

    #[test]
    fn test_sign() {
        let hash = *b"thiscouldbeahashintheorysoitisok";
        let bytes = SignCommand::with_hash(&hash).to_bytes();
        assert_eq!(&bytes[..5], &hex!("80C0000020"));
        assert_eq!(&bytes[5..37], &hash);
        assert_eq!(bytes[37], 0x00);

        let path: KeyPath = "../3".parse().unwrap();
        let cmd = SignCommand::with_path(&hash, &path, false);
        assert_eq!(cmd.p1, 0x41);
        assert_eq!(cmd.data.as_ref().map(|d| d.len()), Some(36));

        assert_eq!(SignCommand::pinless(&hash).p1, 0x03);
    }

    #[test]
    fn test_load_key() {
        let secret = k256::SecretKey::random(&mut thread_rng());
        let cmd = LoadKeyCommand::with_keypair(&Keypair::with_extended_keypair(secret.clone(), [1; 32]))
            .unwrap();
        assert_eq!(cmd.p1, 0x02);
        assert_eq!(LoadKeyCommand::with_keypair(&Keypair::with_keypair(secret)).unwrap().p1, 0x01);

        let cmd = LoadKeyCommand::with_seed(&[0x5A; 64]);
        assert_eq!(&cmd.to_bytes()[..5], &hex!("80D0030040"));
    }

    #[test]
    fn test_set_pinless_path_requires_absolute() {
        let relative: KeyPath = "./0".parse().unwrap();
        assert!(matches!(
            SetPinlessPathCommand::with_path(&relative),
            Err(Error::KeyPath(KeyPathError::NotAbsolute))
        ));
    }

    #[test]
    fn test_generate_mnemonic() {
        assert_eq!(
            GenerateMnemonicCommand::with_words(12).unwrap().to_bytes().as_ref(),
            &hex!("80D2040000")
        );
        assert!(GenerateMnemonicCommand::with_words(13).is_err());

        let indices = GenerateMnemonicCommand::parse_response_raw(Bytes::copy_from_slice(&hex!(
            "000007FF00039000"
        )))
        .unwrap();
        assert_eq!(indices, vec![0, 2047, 3]);
    }

    #[test]
    fn test_generate_key() {
        assert_eq!(GenerateKeyCommand::create().to_bytes().as_ref(), &hex!("80D40000"));
        let mut response = vec![0xAB; 32];
        response.extend_from_slice(&hex!("9000"));
        assert_eq!(
            GenerateKeyCommand::parse_response_raw(Bytes::from(response)).unwrap(),
            [0xAB; 32]
        );
    }
}
