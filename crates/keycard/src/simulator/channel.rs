//! Card side of the secure channel

use bytes::{BufMut, Bytes, BytesMut};
use k256::{PublicKey, SecretKey};
use keycard_apdu::{Command, Response, StatusWord};

use crate::{
    Result,
    crypto::{
        ApduMeta, BLOCK_SIZE, Challenge, Iv, SessionKey, calculate_mac, decrypt_data,
        derive_session_keys, encrypt_data, generate_ecdh_shared_secret, random_challenge,
    },
    session::Keys,
};

const SW_SECURITY_STATUS_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x82);

/// Card view of a secure channel session
///
/// Mirrors [`Session`](crate::session::Session): commands are verified
/// against the MAC key before decryption, and each MAC becomes the next IV.
#[derive(Debug)]
pub struct CardChannel {
    keys: Keys,
    iv: Iv,
}

impl CardChannel {
    /// Channel from known keys and IV
    pub const fn from_raw(enc_key: &SessionKey, mac_key: &SessionKey, iv: &Iv) -> Self {
        Self {
            keys: Keys::new(*enc_key, *mac_key),
            iv: *iv,
        }
    }

    /// Answer OPEN SECURE CHANNEL: a fresh salt and IV, returned as `salt || iv`
    pub fn open(
        card_key: &SecretKey,
        host_key: &PublicKey,
        pairing_key: &[u8; 32],
    ) -> (Self, Bytes) {
        let salt: Challenge = random_challenge();
        let mut iv = Iv::default();
        iv.copy_from_slice(&random_challenge()[..BLOCK_SIZE]);

        let shared_secret = generate_ecdh_shared_secret(card_key, host_key);
        let (enc, mac) =
            derive_session_keys(shared_secret.raw_secret_bytes().as_slice(), pairing_key, &salt);

        let mut response = BytesMut::with_capacity(salt.len() + iv.len());
        response.put_slice(&salt);
        response.put_slice(&iv);
        (Self::from_raw(&enc, &mac, &iv), response.freeze())
    }

    /// Verify and decrypt a wrapped command
    ///
    /// Fails with `6982` when the MAC does not verify or the data cannot be
    /// decrypted; the applet then drops the channel.
    pub fn unwrap_command(&mut self, command: &Command) -> std::result::Result<Command, StatusWord> {
        let data = command.data.as_deref().unwrap_or_default();
        if data.len() < 2 * BLOCK_SIZE || data.len() % BLOCK_SIZE != 0 {
            return Err(SW_SECURITY_STATUS_NOT_SATISFIED);
        }

        let (mac, ciphertext) = data.split_at(BLOCK_SIZE);
        let mut meta = ApduMeta::default();
        meta[0] = command.cla;
        meta[1] = command.ins;
        meta[2] = command.p1;
        meta[3] = command.p2;
        meta[4] = data.len() as u8;

        let expected = calculate_mac(&meta, ciphertext, self.keys.mac())
            .map_err(|_| SW_SECURITY_STATUS_NOT_SATISFIED)?;
        if expected.as_slice() != mac {
            return Err(SW_SECURITY_STATUS_NOT_SATISFIED);
        }

        let plain = decrypt_data(ciphertext, self.keys.enc(), &self.iv)
            .map_err(|_| SW_SECURITY_STATUS_NOT_SATISFIED)?;
        self.iv = expected;

        let unwrapped = Command::new(command.cla, command.ins, command.p1, command.p2);
        Ok(if plain.is_empty() {
            unwrapped
        } else {
            unwrapped.with_data(plain)
        })
    }

    /// Encrypt and MAC a response, status word `9000` outside
    pub fn wrap_response(&mut self, response: &Response) -> Result<Bytes> {
        let ciphertext = encrypt_data(&response.to_bytes(), self.keys.enc(), &self.iv)?;

        let mut meta = ApduMeta::default();
        meta[0] = (ciphertext.len() + BLOCK_SIZE) as u8;
        let mac = calculate_mac(&meta, &ciphertext, self.keys.mac())?;
        self.iv = mac;

        let mut out = BytesMut::with_capacity(BLOCK_SIZE + ciphertext.len() + 2);
        out.put_slice(&mac);
        out.put_slice(&ciphertext);
        out.put_slice(&[0x90, 0x00]);
        Ok(out.freeze())
    }
}
