//! Cryptographic building blocks of the Keycard secure channel
//!
//! Secure channel keys are derived with ECDH over secp256k1 and SHA-512.
//! Payloads are encrypted with AES-256-CBC using ISO 7816-4 padding and
//! authenticated with an AES-CBC-MAC over a 16 byte metadata block.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Iso7816};
use bytes::{Bytes, BytesMut};
use generic_array::GenericArray;
use k256::{PublicKey, SecretKey, ecdh::SharedSecret, elliptic_curve::sec1::ToEncodedPoint};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};
use unicode_normalization::UnicodeNormalization;

use crate::error::CryptoError;

/// Salt used to stretch the pairing password
pub const PAIRING_TOKEN_SALT: &str = "Keycard Pairing Password Salt";

/// PBKDF2 iterations for the pairing token
pub const PAIRING_TOKEN_ITERATIONS: u32 = 50_000;

/// AES block size
pub const BLOCK_SIZE: usize = 16;

/// 32 byte value stretched from the pairing password
pub type PairingToken = [u8; 32];
/// Proof of knowledge of the pairing token
pub type Cryptogram = [u8; 32];
/// Random challenge or salt
pub type Challenge = [u8; 32];
/// AES-256 key
pub type SessionKey = [u8; 32];
/// CBC IV, also the width of a MAC
pub type Iv = [u8; BLOCK_SIZE];
/// Metadata block authenticated together with the ciphertext
pub type ApduMeta = [u8; BLOCK_SIZE];

type Encryptor = cbc::Encryptor<aes::Aes256>;
type Decryptor = cbc::Decryptor<aes::Aes256>;

/// Compute the ECDH shared secret between a private and a public key
pub fn generate_ecdh_shared_secret(private: &SecretKey, public: &PublicKey) -> SharedSecret {
    k256::elliptic_curve::ecdh::diffie_hellman(private.to_nonzero_scalar(), public.as_affine())
}

/// SHA-256 over the pairing token followed by a challenge
///
/// Used both for the cryptograms exchanged during PAIR and for deriving the
/// pairing key from the card's salt.
pub fn calculate_cryptogram(token: &PairingToken, challenge: &Challenge) -> Cryptogram {
    let mut hasher = Sha256::new();
    hasher.update(token);
    hasher.update(challenge);
    hasher.finalize().into()
}

/// 32 random bytes from the thread RNG
pub fn random_challenge() -> Challenge {
    let mut challenge = Challenge::default();
    rand::rng().fill_bytes(&mut challenge);
    challenge
}

/// Encrypt INIT data for a card that has no pairing yet.
///
/// The layout is `len(host_key) || host_key || iv || ciphertext`, keyed with
/// the raw ECDH secret.
pub fn one_shot_encrypt(
    public_key: &PublicKey,
    ecdh_shared_secret: &SharedSecret,
    data: &[u8],
) -> Result<Bytes, CryptoError> {
    let mut iv = Iv::default();
    rand::rng().fill_bytes(&mut iv);

    let mut key = SessionKey::default();
    key.copy_from_slice(ecdh_shared_secret.raw_secret_bytes());
    let ciphertext = encrypt_data(data, &key, &iv)?;

    let pub_key_data = public_key.to_encoded_point(false);
    let mut buf = BytesMut::with_capacity(1 + pub_key_data.len() + iv.len() + ciphertext.len());
    buf.extend_from_slice(&[pub_key_data.len() as u8]);
    buf.extend_from_slice(pub_key_data.as_bytes());
    buf.extend_from_slice(&iv);
    buf.extend_from_slice(&ciphertext);

    Ok(buf.freeze())
}

/// Derive session keys from the shared secret, pairing key and card salt.
///
/// `(K(E) | K(M)) = SHA-512(shared_secret | pairing_key | salt)`
pub fn derive_session_keys(
    secret: &[u8],
    pairing_key: &[u8; 32],
    salt: &Challenge,
) -> (SessionKey, SessionKey) {
    let mut hasher = Sha512::new();
    hasher.update(secret);
    hasher.update(pairing_key);
    hasher.update(salt);
    let data = hasher.finalize();

    let mut enc_key = SessionKey::default();
    let mut mac_key = SessionKey::default();
    enc_key.copy_from_slice(&data[0..32]);
    mac_key.copy_from_slice(&data[32..64]);

    (enc_key, mac_key)
}

/// Encrypt data with AES-256-CBC after ISO 7816-4 padding.
pub fn encrypt_data(data: &[u8], enc_key: &SessionKey, iv: &Iv) -> Result<Bytes, CryptoError> {
    let mut buf = BytesMut::from(data);
    let msg_len = prepare_padding(&mut buf);
    let encrypted = Encryptor::new(GenericArray::from_slice(enc_key), GenericArray::from_slice(iv))
        .encrypt_padded_mut::<Iso7816>(&mut buf, msg_len)?;
    Ok(Bytes::copy_from_slice(encrypted))
}

/// Decrypt AES-256-CBC data and strip the ISO 7816-4 padding.
pub fn decrypt_data(data: &[u8], enc_key: &SessionKey, iv: &Iv) -> Result<Bytes, CryptoError> {
    let mut buf = BytesMut::from(data);
    let decrypted = Decryptor::new(GenericArray::from_slice(enc_key), GenericArray::from_slice(iv))
        .decrypt_padded_mut::<Iso7816>(&mut buf)?;
    Ok(Bytes::copy_from_slice(decrypted))
}

/// CBC-MAC over `meta || data` with a zero IV.
///
/// The MAC is the last ciphertext block before the padding block.
pub fn calculate_mac(meta: &ApduMeta, data: &[u8], mac_key: &SessionKey) -> Result<Iv, CryptoError> {
    let iv = Iv::default();

    let mut buf = BytesMut::with_capacity(meta.len() + data.len() + BLOCK_SIZE);
    buf.extend_from_slice(meta);
    buf.extend_from_slice(data);

    let msg_len = prepare_padding(&mut buf);
    let ciphertext = Encryptor::new(GenericArray::from_slice(mac_key), GenericArray::from_slice(&iv))
        .encrypt_padded_mut::<Iso7816>(&mut buf, msg_len)?;

    let mut mac = Iv::default();
    mac.copy_from_slice(&ciphertext[ciphertext.len() - 32..ciphertext.len() - 16]);
    Ok(mac)
}

/// Generate a pairing token with PBKDF2-HMAC-SHA256 over the NFKD password.
pub fn generate_pairing_token(password: &str) -> PairingToken {
    let password = password.nfkd().collect::<String>();
    let salt = PAIRING_TOKEN_SALT.nfkd().collect::<String>();

    let mut token = PairingToken::default();
    pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        salt.as_bytes(),
        PAIRING_TOKEN_ITERATIONS,
        &mut token,
    );

    token
}

/// SHA-256 of the uncompressed public key, as reported in the key UID
pub fn key_uid(public_key: &PublicKey) -> [u8; 32] {
    Sha256::digest(public_key.to_encoded_point(false).as_bytes()).into()
}

// Make room for a full padding block; ISO 7816-4 always pads.
fn prepare_padding(data: &mut BytesMut) -> usize {
    let len = data.len();
    data.resize(len + BLOCK_SIZE - len % BLOCK_SIZE, 0);

    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::bytes;

    fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
        bytes.try_into().unwrap()
    }

    #[test]
    fn test_ecdh() {
        let pk1 = SecretKey::random(&mut rand_v8::thread_rng());
        let pk2 = SecretKey::random(&mut rand_v8::thread_rng());

        let pub1 = pk1.public_key();
        let pub2 = pk2.public_key();

        let shared_secret1 = generate_ecdh_shared_secret(&pk1, &pub2);
        let shared_secret2 = generate_ecdh_shared_secret(&pk2, &pub1);

        assert_eq!(
            shared_secret1.raw_secret_bytes(),
            shared_secret2.raw_secret_bytes()
        );
    }

    #[test]
    fn test_derive_session_keys() {
        let secret = bytes!("B410E816DA313545151807E25A830201FA389913A977066AB0C6DE0E8631E400");
        let pairing_key =
            bytes!("544FF0B9B0737E4BFC4ECDFCE09F522B837051BBE4FFCEC494FA420D8525670E");
        let card_data = bytes!(
            "1D7C033E75E10EC578AB538F69F1B02538571BA3831441F1649E3F24B5B3E3E71D7BC2D6A3D02FC8CB2FBB3FD8711BB5"
        );

        let salt: Challenge = array(&card_data[..32]);
        let iv: Iv = array(&card_data[32..48]);

        let (enc_key, mac_key) = derive_session_keys(&secret, &array(&pairing_key), &salt);

        let expected_iv = bytes!("1D7BC2D6A3D02FC8CB2FBB3FD8711BB5");
        let expected_enc_key =
            bytes!("4FF496554C01BAE0A52323E3481B448C99D43982118D95C6918FE0354D224B90");
        let expected_mac_key =
            bytes!("185811013138EA1B4FFDBBFA7343EF2DBE3E54C2C231885E867F792448AC2FE5");

        assert_eq!(expected_iv.as_ref(), iv.as_slice());
        assert_eq!(expected_enc_key.as_ref(), enc_key.as_slice());
        assert_eq!(expected_mac_key.as_ref(), mac_key.as_slice());
    }

    #[test]
    fn test_encrypt_data() {
        let data = bytes!("A8A686D0E3290459BCB36088A8FD04A76BF13283BE4B1EAE2E1248EF609F94DC");
        let enc_key = bytes!("44D689AB4B18206F7EEE5439FB9A71A8A617406BA5259728D1EBC2786D24896C");
        let iv = bytes!("9D3EF41EF1D221DD98A54AD5470F58F2");

        let encrypted_data = encrypt_data(&data, &array(&enc_key), &array(&iv)).unwrap();

        let expected = bytes!(
            "FFB41FED5F71A2B57A6AE62D5D5ECD1C12616F6464637DD0A7A930920ACBA55867A7E12CC4F06B089AF34FF4ED4BAB08"
        );
        assert_eq!(expected.as_ref(), encrypted_data.as_ref());
    }

    #[test]
    fn test_decrypt_data() {
        let enc_data = bytes!(
            "73B58B66372E3446E14A9F54BA59666DB432E9DD87D24F9B0525180EE52DA2106E0C70EED7CD42B5B313E4443D6AC90D"
        );
        let enc_key = bytes!("D93D8E6164196D5C5B5F84F10E4B90D98F8D282ED145513ED666AA55C9871E79");
        let iv = bytes!("F959B1220333046D3C47D61B1E1B891B");

        let data = decrypt_data(&enc_data, &array(&enc_key), &array(&iv)).unwrap();

        let expected =
            bytes!("2E21F9F2B2C2CC9038D518A5C6B490613E7955BD19D19108B77786986B7ABFE69000");
        assert_eq!(expected.as_ref(), data.as_ref());
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key = [0x11; 32];
        let iv = [0x22; 16];
        let encrypted = encrypt_data(b"keycard", &key, &iv).unwrap();
        assert_eq!(encrypted.len(), 16);
        let decrypted = decrypt_data(&encrypted, &key, &iv).unwrap();
        assert_eq!(decrypted.as_ref(), b"keycard");
    }

    #[test]
    fn test_mac_depends_on_meta() {
        let key = [0x42; 32];
        let data = [0x01; 32];
        let mut meta = ApduMeta::default();
        let mac1 = calculate_mac(&meta, &data, &key).unwrap();
        meta[0] = 0x20;
        let mac2 = calculate_mac(&meta, &data, &key).unwrap();
        assert_ne!(mac1, mac2);
    }

    #[test]
    fn test_generate_pairing_token() {
        let token = generate_pairing_token("KeycardTest");
        assert_eq!(token, generate_pairing_token("KeycardTest"));
        assert_ne!(token, generate_pairing_token("KeycardTest2"));
    }

    #[test]
    fn test_cryptogram_is_sha256_of_concatenation() {
        let token = [0xAA; 32];
        let challenge = [0x55; 32];
        let mut joined = token.to_vec();
        joined.extend_from_slice(&challenge);
        let expected: [u8; 32] = Sha256::digest(&joined).into();
        assert_eq!(calculate_cryptogram(&token, &challenge), expected);
    }
}
