use std::fmt;

use alloy_primitives::hex::{self, ToHexExt};
use iso7816_tlv::ber::Tlv;

use crate::{
    Error,
    constants::tags,
    error::DecodingError,
};

use super::{
    Capabilities, Version, find_primitives, get_template, parse_public_key, require_primitive,
    to_array,
};

/// Application info returned by SELECT
///
/// A pre-initialized card only reports its secure channel public key; every
/// other field then holds its empty value and `initialized` is false.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationInfo {
    /// Instance UID (16 bytes)
    pub instance_uid: [u8; 16],
    /// Secure channel public key (absent on cards without secure channel)
    pub public_key: Option<k256::PublicKey>,
    /// Application version
    pub version: Version,
    /// Number of remaining pairing slots
    pub remaining_slots: u8,
    /// Key UID (SHA-256 of the master public key), absent without a master key
    pub key_uid: Option<[u8; 32]>,
    /// Supported capabilities
    pub capabilities: Capabilities,
    /// Whether INIT has been performed
    pub initialized: bool,
}

impl ApplicationInfo {
    /// Info of a card still waiting for INIT
    pub fn pre_initialized(public_key: Option<k256::PublicKey>) -> Self {
        Self {
            instance_uid: [0; 16],
            public_key,
            version: Version::new(0, 0),
            remaining_slots: 0,
            key_uid: None,
            capabilities: Capabilities::all(),
            initialized: false,
        }
    }

    /// Whether INIT has been performed
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Whether a master key is loaded
    pub const fn has_master_key(&self) -> bool {
        self.key_uid.is_some()
    }
}

impl TryFrom<&Tlv> for ApplicationInfo {
    type Error = Error;

    fn try_from(tlv: &Tlv) -> Result<Self, Self::Error> {
        let tlvs = get_template(tags::TEMPLATE_APPLICATION_INFO, tlv)?;

        let instance_uid = to_array("instance UID", require_primitive(tags::INSTANCE_UID, tlvs)?)?;
        let public_key = parse_public_key(require_primitive(tags::ECC_PUBLIC_KEY, tlvs)?)?;

        // Version then remaining slots, both under the generic integer tag
        let others = find_primitives(tags::OTHER, tlvs)?;
        let [version, slots, ..] = others.as_slice() else {
            return Err(DecodingError::MissingTag(tags::OTHER).into());
        };
        let version = Version::try_from(*version)?;
        let [remaining_slots] = to_array::<1>("remaining slots", slots)?;

        let key_uid = match require_primitive(tags::KEY_UID, tlvs)? {
            [] => None,
            raw => Some(to_array("key UID", raw)?),
        };

        // Applets before 2.x do not publish capabilities
        let capabilities = match find_primitives(tags::CAPABILITIES, tlvs)?.first() {
            Some(&[flags]) => Capabilities::from(*flags),
            Some(raw) => {
                return Err(DecodingError::InvalidLength {
                    field: "capabilities",
                    expected: 1,
                    actual: raw.len(),
                }
                .into());
            }
            None => Capabilities::all(),
        };

        Ok(Self {
            instance_uid,
            public_key,
            version,
            remaining_slots,
            key_uid,
            capabilities,
            initialized: true,
        })
    }
}

impl fmt::Display for ApplicationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Application Info:")?;
        if !self.initialized {
            writeln!(f, "  State: pre-initialized (use INIT)")?;
        } else {
            writeln!(f, "  Instance UID: {}", hex::encode(self.instance_uid))?;
            writeln!(f, "  Version: {}", self.version)?;
            writeln!(f, "  Remaining pairing slots: {}", self.remaining_slots)?;

            if let Some(ref key_uid) = self.key_uid {
                writeln!(f, "  Key UID: {}", key_uid.encode_hex_with_prefix())?;
            } else {
                writeln!(f, "  Key UID: None (Use GENERATE KEY)")?;
            }

            writeln!(f, "  Capabilities: {}", self.capabilities)?;
        }

        write!(f, "  Secure channel public key: ")?;
        if let Some(ref public_key) = self.public_key {
            write!(
                f,
                "{}",
                public_key.to_sec1_bytes().encode_hex_with_prefix()
            )
        } else {
            write!(f, "None")
        }
    }
}

#[cfg(test)]
mod tests {
    use k256::elliptic_curve::sec1::ToEncodedPoint;

    use super::*;
    use crate::types::{Capability, parse_tlv};

    fn info_bytes(key_uid: &[u8], capabilities: Option<u8>) -> Vec<u8> {
        let mut inner = Vec::new();
        inner.extend_from_slice(&[0x8F, 0x10]);
        inner.extend_from_slice(&[0xAB; 16]);
        inner.extend_from_slice(&[0x80, 0x00]);
        inner.extend_from_slice(&[0x02, 0x02, 0x03, 0x01]);
        inner.extend_from_slice(&[0x02, 0x01, 0x04]);
        inner.push(0x8E);
        inner.push(key_uid.len() as u8);
        inner.extend_from_slice(key_uid);
        if let Some(flags) = capabilities {
            inner.extend_from_slice(&[0x8D, 0x01, flags]);
        }

        let mut bytes = vec![0xA4, inner.len() as u8];
        bytes.extend(inner);
        bytes
    }

    #[test]
    fn test_parse_application_info() {
        let bytes = info_bytes(&[0x11; 32], Some(0x07));
        let info = ApplicationInfo::try_from(&parse_tlv(&bytes).unwrap()).unwrap();

        assert_eq!(info.instance_uid, [0xAB; 16]);
        assert_eq!(info.public_key, None);
        assert_eq!(info.version, Version::V3_1);
        assert_eq!(info.remaining_slots, 4);
        assert_eq!(info.key_uid, Some([0x11; 32]));
        assert!(info.is_initialized());
        assert!(info.has_master_key());
        assert!(info.capabilities.has_capability(Capability::CredentialsManagement));
        assert!(!info.capabilities.has_capability(Capability::Ndef));
    }

    #[test]
    fn test_missing_capabilities_defaults_to_all() {
        let bytes = info_bytes(&[], None);
        let info = ApplicationInfo::try_from(&parse_tlv(&bytes).unwrap()).unwrap();

        assert_eq!(info.key_uid, None);
        assert_eq!(info.capabilities, Capabilities::all());
    }

    #[test]
    fn test_bad_key_uid_length() {
        let bytes = info_bytes(&[0x11; 31], Some(0x0F));
        let err = ApplicationInfo::try_from(&parse_tlv(&bytes).unwrap()).unwrap_err();
        assert!(matches!(
            err,
            Error::Decoding(DecodingError::InvalidLength {
                field: "key UID",
                expected: 32,
                actual: 31
            })
        ));
    }

    #[test]
    fn test_invalid_public_key_is_rejected() {
        let secret = k256::SecretKey::random(&mut rand_v8::thread_rng());
        let mut key = secret.public_key().to_encoded_point(false).as_bytes().to_vec();
        assert!(parse_public_key(&key).unwrap().is_some());

        // Off the curve
        key[64] ^= 0x01;
        assert!(parse_public_key(&key).is_err());
        assert!(parse_public_key(&key[..33]).is_err());
    }

    #[test]
    fn test_pre_initialized_display() {
        let info = ApplicationInfo::pre_initialized(None);
        assert!(!info.is_initialized());
        assert!(info.to_string().contains("pre-initialized"));
    }
}
