//! Session state of the Keycard secure channel
//!
//! A [`Session`] holds the keys derived during OPEN SECURE CHANNEL, the MAC
//! chaining IV and a host side command counter. [`Session::wrap`] and
//! [`Session::unwrap`] are pure with respect to the transport; sequencing
//! exchanges is the caller's job.

use std::fmt;

use bytes::{BufMut, BytesMut};
use k256::{PublicKey, SecretKey};
use keycard_apdu::{ApduCommand, CardTransport, Command, Response};
use rand_v8::thread_rng;
use tracing::{debug, trace};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    Error, Result,
    commands::OpenSecureChannelCommand,
    crypto::{
        ApduMeta, BLOCK_SIZE, Iv, SessionKey, calculate_mac, decrypt_data, derive_session_keys,
        encrypt_data, generate_ecdh_shared_secret,
    },
    error::{DecodingError, SecureChannelError},
    types::PairingInfo,
    validation::{MAX_DATA_LENGTH, ValidationError},
};

/// Session encryption and MAC keys
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Keys {
    enc: SessionKey,
    mac: SessionKey,
}

impl Keys {
    /// Key set from raw keys
    pub const fn new(enc: SessionKey, mac: SessionKey) -> Self {
        Self { enc, mac }
    }

    /// Encryption key
    pub const fn enc(&self) -> &SessionKey {
        &self.enc
    }

    /// MAC key
    pub const fn mac(&self) -> &SessionKey {
        &self.mac
    }
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Keys([REDACTED])")
    }
}

/// Secure channel session
pub struct Session {
    keys: Keys,
    iv: Iv,
    counter: u64,
    awaiting: Option<u64>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("counter", &self.counter)
            .field("awaiting", &self.awaiting)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Run OPEN SECURE CHANNEL and derive the session keys
    ///
    /// The exchange is sent once; a transport failure here is not retried.
    pub fn open<T: CardTransport + ?Sized>(
        card_public_key: &PublicKey,
        pairing_info: &PairingInfo,
        transport: &mut T,
    ) -> Result<Self> {
        // Ephemeral host key, one per session
        let host_private_key = SecretKey::random(&mut thread_rng());

        let cmd = OpenSecureChannelCommand::with_pairing_index_and_pubkey(
            pairing_info.index(),
            &host_private_key.public_key(),
        );
        let response = transport.transmit_raw(&cmd.to_command().encode()?)?;
        let params = OpenSecureChannelCommand::parse_response_raw(response)?;

        let shared_secret = generate_ecdh_shared_secret(&host_private_key, card_public_key);
        let (enc, mac) = derive_session_keys(
            shared_secret.raw_secret_bytes().as_slice(),
            pairing_info.key(),
            &params.salt,
        );

        debug!(index = pairing_info.index(), "Secure channel session keys derived");

        Ok(Self::from_raw(&enc, &mac, &params.iv))
    }

    /// Session from known keys and IV
    pub const fn from_raw(enc_key: &SessionKey, mac_key: &SessionKey, iv: &Iv) -> Self {
        Self {
            keys: Keys::new(*enc_key, *mac_key),
            iv: *iv,
            counter: 0,
            awaiting: None,
        }
    }

    /// Session keys
    pub const fn keys(&self) -> &Keys {
        &self.keys
    }

    /// Current chaining IV
    pub const fn iv(&self) -> &Iv {
        &self.iv
    }

    /// Counter of the last wrapped command
    pub const fn counter(&self) -> u64 {
        self.counter
    }

    /// Counter of the command whose response is outstanding
    pub const fn awaiting(&self) -> Option<u64> {
        self.awaiting
    }

    /// Encrypt and MAC a command
    ///
    /// Returns the counter assigned to the command together with the wrapped
    /// command; the counter must be handed back to [`Session::unwrap`] with
    /// the card's answer. Le is dropped, the wrapped exchange always returns
    /// data.
    pub fn wrap(&mut self, command: &Command) -> Result<(u64, Command)> {
        if let Some(counter) = self.awaiting {
            return Err(SecureChannelError::ResponsePending { counter }.into());
        }

        let payload = command.data.as_deref().unwrap_or_default();
        let ciphertext = encrypt_data(payload, &self.keys.enc, &self.iv)?;

        let lc = ciphertext.len() + BLOCK_SIZE;
        if lc > MAX_DATA_LENGTH {
            return Err(ValidationError::OutOfRange {
                field: "wrapped command data",
                value: lc,
                min: 0,
                max: MAX_DATA_LENGTH,
            }
            .into());
        }

        let mut meta = ApduMeta::default();
        meta[0] = command.cla;
        meta[1] = command.ins;
        meta[2] = command.p1;
        meta[3] = command.p2;
        meta[4] = lc as u8;

        let mac = calculate_mac(&meta, &ciphertext, &self.keys.mac)?;

        let mut data = BytesMut::with_capacity(lc);
        data.put_slice(&mac);
        data.put_slice(&ciphertext);

        self.iv = mac;
        self.counter += 1;
        self.awaiting = Some(self.counter);

        debug!(
            ins = format_args!("{:#04x}", command.ins),
            counter = self.counter,
            plain_len = payload.len(),
            wrapped_len = data.len(),
            "Wrapped secure command"
        );

        let wrapped = Command::new_with_data(command.cla, command.ins, command.p1, command.p2, data.freeze());
        Ok((self.counter, wrapped))
    }

    /// Verify and decrypt the answer to the command wrapped with `counter`
    ///
    /// No state changes unless every check passes.
    pub fn unwrap(&mut self, counter: u64, response: &[u8]) -> Result<Response> {
        if self.awaiting != Some(counter) {
            return Err(SecureChannelError::CounterMismatch {
                expected: self.awaiting.unwrap_or(self.counter + 1),
                received: counter,
            }
            .into());
        }

        let outer = Response::from_bytes(response)
            .map_err(|e| Error::Decoding(DecodingError::Response(e)))?;
        if !outer.is_success() {
            return Err(SecureChannelError::CardClosed(outer.status()).into());
        }

        let data = outer.payload().as_deref().unwrap_or_default();
        if data.len() < 2 * BLOCK_SIZE || data.len() % BLOCK_SIZE != 0 {
            return Err(SecureChannelError::Malformed("bad wrapped response length").into());
        }
        if data.len() > MAX_DATA_LENGTH {
            return Err(SecureChannelError::Malformed("wrapped response too long").into());
        }

        let (mac, ciphertext) = data.split_at(BLOCK_SIZE);
        let mut received = Iv::default();
        received.copy_from_slice(mac);

        let mut meta = ApduMeta::default();
        meta[0] = data.len() as u8;
        let expected = calculate_mac(&meta, ciphertext, &self.keys.mac)?;
        if expected != received {
            return Err(SecureChannelError::MacMismatch { expected, received }.into());
        }

        let plain = decrypt_data(ciphertext, &self.keys.enc, &self.iv)?;
        let inner = Response::from_bytes(&plain)
            .map_err(|_| SecureChannelError::Malformed("decrypted response has no status word"))?;

        self.iv = received;
        self.awaiting = None;

        trace!(
            counter,
            status = %inner.status(),
            len = inner.payload().as_ref().map_or(0, |p| p.len()),
            "Unwrapped secure response"
        );

        Ok(inner)
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::hex;
    use keycard_apdu::{Bytes, StatusWord};

    use super::*;

    const ENC_KEY: [u8; 32] =
        hex!("FDBCB1637597CF3F8F5E8263007D4E45F64C12D44066D4576EB1443D60AEF441");
    const MAC_KEY: [u8; 32] =
        hex!("2FB70219E6635EE0958AB3F7A428BA87E8CD6E6F873A5725A55F25B102D0F1F7");
    const IV: [u8; 16] = hex!("627E64358FA9BDCDAD4442BD8006E0A5");

    fn session() -> Session {
        Session::from_raw(&ENC_KEY, &MAC_KEY, &IV)
    }

    // What the card sends back for `inner`, chained on the session's IV
    fn card_response(session: &Session, inner: &Response) -> Bytes {
        let ciphertext = encrypt_data(&inner.to_bytes(), &ENC_KEY, session.iv()).unwrap();
        let mut meta = ApduMeta::default();
        meta[0] = (ciphertext.len() + BLOCK_SIZE) as u8;
        let mac = calculate_mac(&meta, &ciphertext, &MAC_KEY).unwrap();

        let mut out = BytesMut::new();
        out.put_slice(&mac);
        out.put_slice(&ciphertext);
        out.put_slice(&[0x90, 0x00]);
        out.freeze()
    }

    #[test]
    fn test_wrap_vector() {
        let mut session = session();
        let command = Command::new_with_data(
            0x80,
            0x11,
            0x00,
            0x00,
            hex!("D545A5E95963B6BCED86A6AE826D34C5E06AC64A1217EFFA1415A96674A82500").to_vec(),
        );

        let (counter, wrapped) = session.wrap(&command).unwrap();
        assert_eq!(counter, 1);
        assert_eq!(
            wrapped.data.as_deref(),
            Some(
                &hex!(
                    "BA796BF8FAD1FD50407B87127B94F5023EF8903AE926EAD8A204F961B8A0EDAEE7CCCFE7F7F6380CE2C6F188E598E4468B7DEDD0E807C18CCBDA71A55F3E1F9A"
                )[..]
            )
        );
        assert_eq!(session.iv(), &hex!("BA796BF8FAD1FD50407B87127B94F502"));
        assert_eq!(wrapped.le, None);
    }

    #[test]
    fn test_wrap_unwrap() {
        let mut session = session();
        let (counter, _) = session
            .wrap(&Command::new(0x80, 0xF2, 0x00, 0x00))
            .unwrap();

        let inner = Response::success(Some(Bytes::from_static(b"status")));
        let raw = card_response(&session, &inner);
        let unwrapped = session.unwrap(counter, &raw).unwrap();
        assert_eq!(unwrapped, inner);
        assert_eq!(session.awaiting(), None);
        assert_eq!(session.iv(), &raw[..16]);

        // The next command chains on the response MAC
        let (next, _) = session
            .wrap(&Command::new(0x80, 0xF2, 0x01, 0x00))
            .unwrap();
        assert_eq!(next, 2);
    }

    #[test]
    fn test_inner_status_is_returned() {
        let mut session = session();
        let (counter, _) = session
            .wrap(&Command::new_with_data(0x80, 0x20, 0x00, 0x00, b"000000".to_vec()))
            .unwrap();

        let raw = card_response(&session, &Response::error(StatusWord::new(0x63, 0xC2)));
        let inner = session.unwrap(counter, &raw).unwrap();
        assert_eq!(inner.status(), StatusWord::new(0x63, 0xC2));
    }

    #[test]
    fn test_mac_mismatch() {
        let mut session = session();
        let (counter, _) = session
            .wrap(&Command::new(0x80, 0xF2, 0x00, 0x00))
            .unwrap();

        let mut raw = card_response(&session, &Response::success(None)).to_vec();
        raw[0] ^= 0x01;
        let iv = *session.iv();

        assert!(matches!(
            session.unwrap(counter, &raw),
            Err(Error::SecureChannel(SecureChannelError::MacMismatch { .. }))
        ));
        assert_eq!(session.iv(), &iv);
        assert_eq!(session.awaiting(), Some(counter));
    }

    #[test]
    fn test_counter_mismatch() {
        let mut session = session();
        let (counter, _) = session
            .wrap(&Command::new(0x80, 0xF2, 0x00, 0x00))
            .unwrap();
        let raw = card_response(&session, &Response::success(None));
        let iv = *session.iv();

        let err = session.unwrap(counter + 1, &raw).unwrap_err();
        assert!(matches!(
            err,
            Error::SecureChannel(SecureChannelError::CounterMismatch {
                expected: 1,
                received: 2
            })
        ));
        assert_eq!(session.iv(), &iv);
        assert_eq!(session.counter(), 1);

        // The right counter still works
        assert!(session.unwrap(counter, &raw).is_ok());
    }

    #[test]
    fn test_response_pending() {
        let mut session = session();
        session.wrap(&Command::new(0x80, 0xF2, 0x00, 0x00)).unwrap();
        assert!(matches!(
            session.wrap(&Command::new(0x80, 0xF2, 0x00, 0x00)),
            Err(Error::SecureChannel(SecureChannelError::ResponsePending { counter: 1 }))
        ));
    }

    #[test]
    fn test_card_closed() {
        let mut session = session();
        let (counter, _) = session
            .wrap(&Command::new(0x80, 0xF2, 0x00, 0x00))
            .unwrap();
        let err = session.unwrap(counter, &[0x69, 0x82]).unwrap_err();
        assert_eq!(err.status_word(), Some(StatusWord::new(0x69, 0x82)));
    }

    #[test]
    fn test_oversized_command() {
        let mut session = session();
        let command = Command::new_with_data(0x80, 0xE2, 0x00, 0x00, vec![0u8; 240]);
        assert!(matches!(session.wrap(&command), Err(Error::Validation(_))));
        assert_eq!(session.counter(), 0);
    }
}
