use k256::{PublicKey, SecretKey};

use super::expect_empty;
use crate::{
    Result,
    constants::{CLA, ins},
    crypto::{generate_ecdh_shared_secret, one_shot_encrypt},
    secrets::Secrets,
};

keycard_command! {
    /// INIT, installs PIN, PUK and pairing token on a pre-initialized applet
    pub struct InitCommand {
        cla: CLA,
        ins: ins::INIT,
        success: (),

        builders {
            /// Encrypt the secrets to the card's secure channel key
            ///
            /// A fresh host key is generated for the one-shot encryption.
            pub fn with_card_pubkey_and_secrets(
                card_pubkey: &PublicKey,
                secrets: &Secrets,
            ) -> Result<Self> {
                let host_key = SecretKey::random(&mut rand_v8::thread_rng());
                let shared_secret = generate_ecdh_shared_secret(&host_key, card_pubkey);
                let data = one_shot_encrypt(&host_key.public_key(), &shared_secret, &secrets.to_bytes())?;
                Ok(Self::new(0x00, 0x00).with_data(data))
            }
        }

        parse = |payload| {
            expect_empty(payload)
        }
    }
}

#[cfg(test)]
mod tests {
    use keycard_apdu::ApduCommand;
    use rand_v8::thread_rng;

    use super::*;
    use crate::crypto::{SessionKey, decrypt_data};

    #[test]
    fn test_init_payload_decrypts_on_card() {
        let card_key = SecretKey::random(&mut thread_rng());
        let secrets = Secrets::new("000000", "123456789012", "KeycardTest").unwrap();

        let cmd = InitCommand::with_card_pubkey_and_secrets(&card_key.public_key(), &secrets).unwrap();
        let data = cmd.to_command().data.unwrap();

        assert_eq!(data[0], 65);
        let host_key = PublicKey::from_sec1_bytes(&data[1..66]).unwrap();
        let shared = generate_ecdh_shared_secret(&card_key, &host_key);
        let mut key = SessionKey::default();
        key.copy_from_slice(shared.raw_secret_bytes());
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&data[66..82]);

        let plain = decrypt_data(&data[82..], &key, &iv).unwrap();
        assert_eq!(plain, secrets.to_bytes());
    }
}
