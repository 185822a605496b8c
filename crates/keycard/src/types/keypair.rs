use std::fmt;

use alloy_primitives::Address;
use iso7816_tlv::ber::{Tag, Tlv, Value};
use k256::{
    PublicKey, SecretKey, ecdsa::VerifyingKey, elliptic_curve::sec1::ToEncodedPoint,
};

use crate::{Error, constants::tags, crypto, error::DecodingError};

use super::{get_template, to_array};

/// Keypair template (tag 0xA1), exported by EXPORT KEY and sent by LOAD KEY
///
/// Exports carry the public key and, when permitted, the private key.
/// Extended public exports add the chain code.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Keypair {
    /// ECC public key component (tag 0x80)
    pub public_key: Option<PublicKey>,
    /// ECC private key component (tag 0x81)
    pub private_key: Option<SecretKey>,
    /// Chain code for extended keys (tag 0x82)
    pub chain_code: Option<[u8; 32]>,
}

impl Keypair {
    /// Keypair with only a private key, the card derives the public key
    pub fn with_private_key(private_key: SecretKey) -> Self {
        Self {
            private_key: Some(private_key),
            ..Default::default()
        }
    }

    /// Keypair with both halves
    pub fn with_keypair(private_key: SecretKey) -> Self {
        Self {
            public_key: Some(private_key.public_key()),
            private_key: Some(private_key),
            chain_code: None,
        }
    }

    /// Extended keypair usable as a BIP32 root
    pub fn with_extended_keypair(private_key: SecretKey, chain_code: [u8; 32]) -> Self {
        Self {
            public_key: Some(private_key.public_key()),
            private_key: Some(private_key),
            chain_code: Some(chain_code),
        }
    }

    /// Whether a chain code is present
    pub const fn is_extended(&self) -> bool {
        self.chain_code.is_some()
    }

    /// Public key, derived from the private key when not sent
    pub fn public_key(&self) -> Option<PublicKey> {
        self.public_key
            .or_else(|| self.private_key.as_ref().map(SecretKey::public_key))
    }

    /// Ethereum address of the public key
    pub fn ethereum_address(&self) -> Option<Address> {
        self.public_key()
            .map(|pk| Address::from_public_key(&VerifyingKey::from(&pk)))
    }

    /// Key UID the card would report for this key as master
    pub fn key_uid(&self) -> Option<[u8; 32]> {
        self.public_key().map(|pk| crypto::key_uid(&pk))
    }

    /// Serialize as a keypair template
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(Tlv::try_from(self)?.to_vec())
    }
}

impl TryFrom<&Tlv> for Keypair {
    type Error = Error;

    fn try_from(tlv: &Tlv) -> Result<Self, Self::Error> {
        let mut keypair = Self::default();
        for tlv in get_template(tags::TEMPLATE_KEYPAIR, tlv)? {
            let Value::Primitive(value) = tlv.value() else {
                return Err(DecodingError::InvalidData("nested keypair record").into());
            };

            if tlv.tag() == &Tag::try_from(tags::ECC_PUBLIC_KEY)? {
                keypair.public_key = Some(PublicKey::from_sec1_bytes(value)?);
            } else if tlv.tag() == &Tag::try_from(tags::ECC_PRIVATE_KEY)? {
                keypair.private_key = Some(SecretKey::from_slice(value)?);
            } else if tlv.tag() == &Tag::try_from(tags::CHAIN_CODE)? {
                keypair.chain_code = Some(to_array("chain code", value)?);
            }
        }

        if keypair.public_key.is_none() && keypair.private_key.is_none() {
            return Err(DecodingError::MissingTag(tags::ECC_PUBLIC_KEY).into());
        }
        Ok(keypair)
    }
}

impl TryFrom<&[u8]> for Keypair {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Self::try_from(&super::parse_tlv(value)?)
    }
}

impl TryFrom<&Keypair> for Tlv {
    type Error = Error;

    fn try_from(keypair: &Keypair) -> Result<Self, Self::Error> {
        let mut records = Vec::new();
        let mut push = |tag: u8, data: Vec<u8>| -> Result<(), Error> {
            records.push(Tlv::new(Tag::try_from(tag)?, Value::Primitive(data))?);
            Ok(())
        };

        if let Some(public_key) = keypair.public_key {
            push(
                tags::ECC_PUBLIC_KEY,
                public_key.to_encoded_point(false).as_bytes().to_vec(),
            )?;
        }
        if let Some(private_key) = &keypair.private_key {
            push(tags::ECC_PRIVATE_KEY, private_key.to_bytes().to_vec())?;
        }
        if let Some(chain_code) = keypair.chain_code {
            push(tags::CHAIN_CODE, chain_code.to_vec())?;
        }

        Ok(Tlv::new(
            Tag::try_from(tags::TEMPLATE_KEYPAIR)?,
            Value::Constructed(records),
        )?)
    }
}

// Never print key material
impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key.is_some())
            .field(
                "private_key",
                &self.private_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("chain_code", &self.chain_code.is_some())
            .finish()
    }
}

impl fmt::Display for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Keypair:")?;

        match self.ethereum_address() {
            Some(address) => writeln!(f, "  Address: {address}")?,
            None => writeln!(f, "  Address: Not available")?,
        }

        match &self.private_key {
            Some(_) => writeln!(f, "  Private Key: Present")?,
            None => writeln!(f, "  Private Key: Not present")?,
        }

        match &self.chain_code {
            Some(_) => write!(f, "  Chain Code: Present (Extended keypair)"),
            None => write!(f, "  Chain Code: Not present"),
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, hex};

    use super::*;

    #[test]
    fn test_keypair_template_roundtrip() {
        let secret = SecretKey::random(&mut rand_v8::thread_rng());
        let keypair = Keypair::with_extended_keypair(secret, [0x42; 32]);

        let bytes = keypair.to_bytes().unwrap();
        assert_eq!(bytes[0], tags::TEMPLATE_KEYPAIR);

        let parsed = Keypair::try_from(bytes.as_slice()).unwrap();
        assert_eq!(parsed, keypair);
        assert!(parsed.is_extended());
    }

    #[test]
    fn test_public_only_export() {
        // Private key 1 is the generator point
        let secret = SecretKey::from_slice(&hex!(
            "0000000000000000000000000000000000000000000000000000000000000001"
        ))
        .unwrap();
        let public = Keypair {
            public_key: Some(secret.public_key()),
            ..Default::default()
        };
        let parsed = Keypair::try_from(public.to_bytes().unwrap().as_slice()).unwrap();

        assert!(parsed.private_key.is_none());
        assert_eq!(
            parsed.ethereum_address(),
            Some(address!("7E5F4552091A69125d5DfCb7b8C2659029395Bdf"))
        );
    }

    #[test]
    fn test_empty_template_rejected() {
        assert!(Keypair::try_from(&hex!("A100")[..]).is_err());
    }

    #[test]
    fn test_debug_hides_private_key() {
        let secret = SecretKey::random(&mut rand_v8::thread_rng());
        let debug = format!("{:?}", Keypair::with_private_key(secret));
        assert!(debug.contains("[REDACTED]"));
    }
}
