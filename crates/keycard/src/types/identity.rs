use iso7816_tlv::ber::Tlv;
use k256::{
    PublicKey,
    ecdsa::{self, RecoveryId, VerifyingKey, signature::hazmat::PrehashVerifier},
    elliptic_curve::sec1::ToEncodedPoint,
};
use sha2::{Digest, Sha256};

use crate::{
    Error,
    constants::tags,
    error::{CryptoError, DecodingError},
};

use super::{EcdsaSignature, get_template, require_primitive, to_array};

/// Length of the IDENTIFY CARD certificate: compressed key, r, s, recovery id
pub const CERTIFICATE_LENGTH: usize = 33 + 64 + 1;

/// Identity certificate issued to a card
///
/// The issuer signed SHA-256 of the compressed identity key; its key is
/// recovered from that signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// Key the card proves possession of
    pub identity_key: PublicKey,
    /// Issuer signature over the identity key
    pub signature: ecdsa::Signature,
    /// Recovery id of the issuer signature
    pub recovery_id: RecoveryId,
}

impl Certificate {
    /// Key of the issuer that signed this certificate
    pub fn issuer_key(&self) -> Result<PublicKey, Error> {
        let digest = Sha256::digest(self.identity_key.to_encoded_point(true).as_bytes());
        let key = VerifyingKey::recover_from_prehash(&digest, &self.signature, self.recovery_id)
            .map_err(|_| CryptoError::Recovery)?;
        Ok(key.into())
    }
}

impl TryFrom<&[u8]> for Certificate {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let raw = to_array::<CERTIFICATE_LENGTH>("certificate", bytes)?;
        let (key, rest) = raw.split_at(33);
        let (signature, recovery) = rest.split_at(64);

        // Some issuers use the Ethereum 27/28 convention
        let recovery = match recovery[0] {
            v @ 27..=30 => v - 27,
            v => v,
        };

        Ok(Self {
            identity_key: PublicKey::from_sec1_bytes(key)?,
            signature: ecdsa::Signature::from_slice(signature).map_err(CryptoError::Ecdsa)?,
            recovery_id: RecoveryId::from_byte(recovery)
                .ok_or(DecodingError::InvalidData("certificate recovery id"))?,
        })
    }
}

/// Response to IDENTIFY CARD: certificate and a signature over the challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityProof {
    /// Card certificate
    pub certificate: Certificate,
    /// Signature of the challenge by the identity key
    pub signature: EcdsaSignature,
}

impl IdentityProof {
    /// Check the challenge signature and return the verified identity
    pub fn verify(&self, challenge: &[u8; 32]) -> Result<CardIdentity, Error> {
        let signature = self.signature.normalize_s().unwrap_or(*self.signature);
        VerifyingKey::from(&self.certificate.identity_key)
            .verify_prehash(challenge, &signature)
            .map_err(|_| CryptoError::IdentityProof)?;

        Ok(CardIdentity {
            identity_key: self.certificate.identity_key,
            issuer_key: self.certificate.issuer_key()?,
        })
    }
}

impl TryFrom<&Tlv> for IdentityProof {
    type Error = Error;

    fn try_from(tlv: &Tlv) -> Result<Self, Self::Error> {
        let tlvs = get_template(tags::TEMPLATE_SIGNATURE, tlv)?;
        let certificate = Certificate::try_from(require_primitive(tags::CERTIFICATE, tlvs)?)?;

        let der = tlvs
            .iter()
            .find(|tlv| get_template(tags::ECDSA_SIGNATURE, tlv).is_ok())
            .ok_or(DecodingError::MissingTag(tags::ECDSA_SIGNATURE))?;

        Ok(Self {
            certificate,
            signature: EcdsaSignature::try_from(der)?,
        })
    }
}

impl TryFrom<&[u8]> for IdentityProof {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Self::try_from(&super::parse_tlv(value)?)
    }
}

/// Verified card identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardIdentity {
    /// Key held by the card
    pub identity_key: PublicKey,
    /// Key of the certificate issuer, compare against a trusted list
    pub issuer_key: PublicKey,
}

#[cfg(test)]
mod tests {
    use iso7816_tlv::ber::{Tag, Value};
    use k256::{SecretKey, ecdsa::SigningKey};

    use super::*;

    fn tlv(tag: u8, value: Value) -> Tlv {
        Tlv::new(Tag::try_from(tag).unwrap(), value).unwrap()
    }

    fn proof(issuer: &SigningKey, card: &SigningKey, challenge: &[u8; 32]) -> Vec<u8> {
        let identity = card.verifying_key().to_encoded_point(true);
        let (cert_sig, recovery_id) = issuer
            .sign_prehash_recoverable(&Sha256::digest(identity.as_bytes()))
            .unwrap();
        let mut certificate = identity.as_bytes().to_vec();
        certificate.extend_from_slice(&cert_sig.to_bytes());
        certificate.push(recovery_id.to_byte());

        let (signature, _) = card.sign_prehash_recoverable(challenge).unwrap();
        let (r, s) = signature.split_bytes();
        let integer = |bytes: &[u8]| {
            let mut value = vec![0x00];
            value.extend_from_slice(bytes);
            tlv(0x02, Value::Primitive(value))
        };

        tlv(
            0xA0,
            Value::Constructed(vec![
                tlv(0x8A, Value::Primitive(certificate)),
                tlv(0x30, Value::Constructed(vec![integer(&r[..]), integer(&s[..])])),
            ]),
        )
        .to_vec()
    }

    #[test]
    fn test_verify_identity() {
        let issuer = SigningKey::from(SecretKey::random(&mut rand_v8::thread_rng()));
        let card = SigningKey::from(SecretKey::random(&mut rand_v8::thread_rng()));
        let challenge = [0x42; 32];

        let proof = IdentityProof::try_from(proof(&issuer, &card, &challenge).as_slice()).unwrap();
        let identity = proof.verify(&challenge).unwrap();
        assert_eq!(identity.identity_key, PublicKey::from(card.verifying_key()));
        assert_eq!(identity.issuer_key, PublicKey::from(issuer.verifying_key()));

        assert!(matches!(
            proof.verify(&[0x43; 32]),
            Err(Error::Crypto(CryptoError::IdentityProof))
        ));
    }

    #[test]
    fn test_certificate_length() {
        assert!(matches!(
            Certificate::try_from(&[0u8; 97][..]),
            Err(Error::Decoding(DecodingError::InvalidLength {
                field: "certificate",
                expected: 98,
                actual: 97
            }))
        ));
    }
}
