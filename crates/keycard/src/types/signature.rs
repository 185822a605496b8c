use derive_more::{AsRef, Deref};
use iso7816_tlv::ber::{Tlv, Value};
use k256::ecdsa::{self, RecoveryId, VerifyingKey};

use crate::{
    Error,
    constants::tags,
    error::{CryptoError, DecodingError},
};

use super::{get_template, parse_public_key, require_primitive};

/// Signature template (tag 0xA0) returned by SIGN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Public key of the signing key
    pub public_key: k256::PublicKey,
    /// ECDSA signature, as sent by the card
    pub signature: EcdsaSignature,
}

impl Signature {
    /// Normalize to low-S and find the recovery id against `hash`
    pub fn into_recoverable(self, hash: [u8; 32]) -> Result<RecoverableSignature, Error> {
        RecoverableSignature::new(hash, self.public_key, self.signature.0)
    }
}

impl TryFrom<&Tlv> for Signature {
    type Error = Error;

    fn try_from(tlv: &Tlv) -> Result<Self, Self::Error> {
        let tlvs = get_template(tags::TEMPLATE_SIGNATURE, tlv)?;
        let public_key = parse_public_key(require_primitive(tags::ECC_PUBLIC_KEY, tlvs)?)?
            .ok_or(DecodingError::InvalidData("signature without public key"))?;

        let der = tlvs
            .iter()
            .find(|tlv| get_template(tags::ECDSA_SIGNATURE, tlv).is_ok())
            .ok_or(DecodingError::MissingTag(tags::ECDSA_SIGNATURE))?;

        Ok(Self {
            public_key,
            signature: EcdsaSignature::try_from(der)?,
        })
    }
}

impl TryFrom<&[u8]> for Signature {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Self::try_from(&super::parse_tlv(value)?)
    }
}

/// DER encoded ECDSA signature (tag 0x30)
#[derive(Debug, Clone, PartialEq, Eq, AsRef, Deref)]
pub struct EcdsaSignature(ecdsa::Signature);

impl TryFrom<&Tlv> for EcdsaSignature {
    type Error = Error;

    fn try_from(tlv: &Tlv) -> Result<Self, Self::Error> {
        let integers = get_template(tags::ECDSA_SIGNATURE, tlv)?;
        let [r, s] = integers else {
            return Err(DecodingError::InvalidData("signature must hold r and s").into());
        };

        Ok(Self(ecdsa::Signature::from_scalars(
            scalar_bytes("r", r)?,
            scalar_bytes("s", s)?,
        )?))
    }
}

/// DER integers carry a sign byte and drop leading zeros
fn scalar_bytes(field: &'static str, tlv: &Tlv) -> Result<[u8; 32], Error> {
    let Value::Primitive(raw) = tlv.value() else {
        return Err(DecodingError::InvalidData("signature integer is constructed").into());
    };

    let first = raw.iter().position(|&b| b != 0).unwrap_or(raw.len());
    let digits = &raw[first..];
    if digits.len() > 32 {
        return Err(DecodingError::InvalidLength {
            field,
            expected: 32,
            actual: digits.len(),
        }
        .into());
    }

    let mut out = [0u8; 32];
    out[32 - digits.len()..].copy_from_slice(digits);
    Ok(out)
}

/// Low-S signature with recovery id, ready for Ethereum use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverableSignature {
    /// Hash that was signed
    pub hash: [u8; 32],
    /// Signature with S in the lower half of the order
    pub signature: ecdsa::Signature,
    /// Recovery id (0 or 1)
    pub recovery_id: RecoveryId,
    /// Public key the signature recovers to
    pub public_key: k256::PublicKey,
}

impl RecoverableSignature {
    /// Normalize `signature` and recover its id against `public_key`
    pub fn new(
        hash: [u8; 32],
        public_key: k256::PublicKey,
        signature: ecdsa::Signature,
    ) -> Result<Self, Error> {
        let signature = signature.normalize_s().unwrap_or(signature);
        let recovery_id = RecoveryId::trial_recovery_from_prehash(
            &VerifyingKey::from(&public_key),
            &hash,
            &signature,
        )
        .map_err(|_| CryptoError::Recovery)?;

        Ok(Self {
            hash,
            signature,
            recovery_id,
            public_key,
        })
    }

    /// `r` component
    pub fn r(&self) -> [u8; 32] {
        self.signature.r().to_bytes().into()
    }

    /// `s` component
    pub fn s(&self) -> [u8; 32] {
        self.signature.s().to_bytes().into()
    }

    /// Recover the signing key from the signature alone
    pub fn recover_public_key(&self) -> Result<k256::PublicKey, Error> {
        let key =
            VerifyingKey::recover_from_prehash(&self.hash, &self.signature, self.recovery_id)?;
        Ok(key.into())
    }

    /// Ethereum signature with parity
    pub fn to_alloy(&self) -> alloy_primitives::Signature {
        (self.signature.clone(), self.recovery_id).into()
    }

    /// Ethereum address of the signer
    pub fn address(&self) -> alloy_primitives::Address {
        alloy_primitives::Address::from_public_key(&VerifyingKey::from(&self.public_key))
    }
}

#[cfg(test)]
mod tests {
    use iso7816_tlv::ber::Tag;
    use k256::{
        SecretKey,
        ecdsa::{SigningKey, signature::hazmat::PrehashSigner},
        elliptic_curve::sec1::ToEncodedPoint,
    };

    use super::*;

    fn integer(bytes: &[u8]) -> Tlv {
        Tlv::new(Tag::try_from(tags::OTHER).unwrap(), Value::Primitive(bytes.to_vec())).unwrap()
    }

    fn template(public_key: &k256::PublicKey, r: &[u8], s: &[u8]) -> Vec<u8> {
        let der = Tlv::new(
            Tag::try_from(tags::ECDSA_SIGNATURE).unwrap(),
            Value::Constructed(vec![integer(r), integer(s)]),
        )
        .unwrap();
        let key = Tlv::new(
            Tag::try_from(tags::ECC_PUBLIC_KEY).unwrap(),
            Value::Primitive(public_key.to_encoded_point(false).as_bytes().to_vec()),
        )
        .unwrap();
        Tlv::new(
            Tag::try_from(tags::TEMPLATE_SIGNATURE).unwrap(),
            Value::Constructed(vec![key, der]),
        )
        .unwrap()
        .to_vec()
    }

    #[test]
    fn test_parse_and_recover() {
        let secret = SecretKey::random(&mut rand_v8::thread_rng());
        let signing_key = SigningKey::from(&secret);
        let hash = [0x17u8; 32];
        let sig: ecdsa::Signature = signing_key.sign_prehash(&hash).unwrap();

        // DER integers with a sign byte
        let mut r = vec![0x00];
        r.extend_from_slice(&sig.r().to_bytes());
        let bytes = template(&secret.public_key(), &r, &sig.s().to_bytes());

        let parsed = Signature::try_from(bytes.as_slice()).unwrap();
        assert_eq!(*parsed.signature, sig);

        let recoverable = parsed.into_recoverable(hash).unwrap();
        assert_eq!(recoverable.recover_public_key().unwrap(), secret.public_key());
        assert_eq!(
            recoverable
                .to_alloy()
                .recover_address_from_prehash(&hash.into())
                .unwrap(),
            recoverable.address()
        );
    }

    #[test]
    fn test_high_s_is_normalized() {
        let secret = SecretKey::random(&mut rand_v8::thread_rng());
        let signing_key = SigningKey::from(&secret);
        let hash = [0x99u8; 32];
        let sig: ecdsa::Signature = signing_key.sign_prehash(&hash).unwrap();

        // n - s flips S into the upper half
        let high_s = ecdsa::Signature::from_scalars(sig.r().to_bytes(), (-sig.s()).to_bytes())
            .unwrap();
        assert!(high_s.normalize_s().is_some());

        let recoverable =
            RecoverableSignature::new(hash, secret.public_key(), high_s).unwrap();
        assert_eq!(recoverable.signature, sig);
        assert_eq!(recoverable.recover_public_key().unwrap(), secret.public_key());
    }

    #[test]
    fn test_wrong_key_fails_recovery() {
        let secret = SecretKey::random(&mut rand_v8::thread_rng());
        let other = SecretKey::random(&mut rand_v8::thread_rng());
        let hash = [0x01u8; 32];
        let sig: ecdsa::Signature = SigningKey::from(&secret).sign_prehash(&hash).unwrap();

        assert!(matches!(
            RecoverableSignature::new(hash, other.public_key(), sig),
            Err(Error::Crypto(CryptoError::Recovery))
        ));
    }

    #[test]
    fn test_short_integer_is_padded() {
        let tlv = integer(&[0x01, 0x02]);
        let bytes = scalar_bytes("r", &tlv).unwrap();
        assert_eq!(&bytes[30..], &[0x01, 0x02]);
        assert!(bytes[..30].iter().all(|&b| b == 0));
    }
}
