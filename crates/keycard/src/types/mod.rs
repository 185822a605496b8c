mod application_info;
mod application_status;
mod capabilities;
mod identity;
mod keypair;
mod pairing_info;
mod signature;
mod version;

pub use application_info::ApplicationInfo;
pub use application_status::ApplicationStatus;
pub use capabilities::{Capabilities, Capability};
pub use identity::{CERTIFICATE_LENGTH, CardIdentity, Certificate, IdentityProof};
use iso7816_tlv::ber::{Tag, Tlv, Value};
pub use keypair::Keypair;
pub use pairing_info::PairingInfo;
pub use signature::{EcdsaSignature, RecoverableSignature, Signature};
pub use version::Version;

use crate::{Error, error::DecodingError};

/// Value of a primitive TLV, checking its tag
pub(crate) fn get_primitive_value(tag: u8, tlv: &Tlv) -> Result<&[u8], Error> {
    if tlv.tag() != &Tag::try_from(tag)? {
        return Err(DecodingError::UnexpectedTag { expected: tag }.into());
    }
    match tlv.value() {
        Value::Primitive(bytes) => Ok(bytes),
        Value::Constructed(_) => Err(DecodingError::InvalidData("expected primitive TLV").into()),
    }
}

/// Children of a constructed TLV, checking its tag
pub(crate) fn get_template(tag: u8, tlv: &Tlv) -> Result<&[Tlv], Error> {
    if tlv.tag() != &Tag::try_from(tag)? {
        return Err(DecodingError::UnexpectedTag { expected: tag }.into());
    }
    match tlv.value() {
        Value::Constructed(tlvs) => Ok(tlvs),
        Value::Primitive(_) => Err(DecodingError::InvalidData("expected constructed TLV").into()),
    }
}

/// Values of every primitive child carrying `tag`, in order
pub(crate) fn find_primitives<'a>(tag: u8, tlvs: &'a [Tlv]) -> Result<Vec<&'a [u8]>, Error> {
    let tag = Tag::try_from(tag)?;
    tlvs.iter()
        .filter(|tlv| tlv.tag() == &tag)
        .map(|tlv| match tlv.value() {
            Value::Primitive(bytes) => Ok(bytes.as_slice()),
            Value::Constructed(_) => {
                Err(DecodingError::InvalidData("expected primitive TLV").into())
            }
        })
        .collect()
}

/// First primitive child carrying `tag`, which must be present
pub(crate) fn require_primitive<'a>(tag: u8, tlvs: &'a [Tlv]) -> Result<&'a [u8], Error> {
    find_primitives(tag, tlvs)?
        .into_iter()
        .next()
        .ok_or_else(|| DecodingError::MissingTag(tag).into())
}

/// Copy a slice into a fixed size array, reporting the field on mismatch
pub(crate) fn to_array<const N: usize>(field: &'static str, bytes: &[u8]) -> Result<[u8; N], Error> {
    bytes.try_into().map_err(|_| {
        DecodingError::InvalidLength {
            field,
            expected: N,
            actual: bytes.len(),
        }
        .into()
    })
}

/// Parse an optional uncompressed public key record (65 bytes or empty)
pub(crate) fn parse_public_key(bytes: &[u8]) -> Result<Option<k256::PublicKey>, Error> {
    match bytes.len() {
        0 => Ok(None),
        65 => Ok(Some(k256::PublicKey::from_sec1_bytes(bytes)?)),
        actual => Err(DecodingError::InvalidLength {
            field: "public key",
            expected: 65,
            actual,
        }
        .into()),
    }
}

/// Parse a complete TLV from a response payload; trailing bytes are an error
pub(crate) fn parse_tlv(payload: &[u8]) -> Result<Tlv, Error> {
    Ok(Tlv::from_bytes(payload)?)
}
