use std::fmt;

use iso7816_tlv::ber::Tlv;

use crate::{Error, constants::tags, error::DecodingError};

use super::{find_primitives, get_template, require_primitive, to_array};

/// Application status returned by GET STATUS P1=0x00 command
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApplicationStatus {
    /// PIN retry count
    pub pin_retry_count: u8,
    /// PUK retry count
    pub puk_retry_count: u8,
    /// Key initialized flag
    pub key_initialized: bool,
}

impl ApplicationStatus {
    /// PIN can no longer be verified
    pub const fn pin_blocked(&self) -> bool {
        self.pin_retry_count == 0
    }

    /// PUK can no longer be used, the card needs a factory reset
    pub const fn puk_blocked(&self) -> bool {
        self.puk_retry_count == 0
    }
}

impl TryFrom<&Tlv> for ApplicationStatus {
    type Error = Error;

    fn try_from(tlv: &Tlv) -> Result<Self, Self::Error> {
        let tlvs = get_template(tags::TEMPLATE_APPLICATION_STATUS, tlv)?;

        let counters = find_primitives(tags::OTHER, tlvs)?;
        let [pin, puk, ..] = counters.as_slice() else {
            return Err(DecodingError::MissingTag(tags::OTHER).into());
        };
        let [pin_retry_count] = to_array::<1>("PIN retry count", pin)?;
        let [puk_retry_count] = to_array::<1>("PUK retry count", puk)?;
        let [key_initialized] =
            to_array::<1>("key initialized", require_primitive(tags::KEY_INITIALIZED, tlvs)?)?;

        Ok(Self {
            pin_retry_count,
            puk_retry_count,
            key_initialized: key_initialized == 0xFF,
        })
    }
}

impl TryFrom<&[u8]> for ApplicationStatus {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Self::try_from(&super::parse_tlv(bytes)?)
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Application Status:")?;
        writeln!(f, "  PIN retries remaining: {}", self.pin_retry_count)?;
        writeln!(f, "  PUK retries remaining: {}", self.puk_retry_count)?;
        write!(f, "  Key initialized: {}", self.key_initialized)
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::hex;

    use super::*;

    #[test]
    fn test_parse_status() {
        let bytes = hex!("A30902010302010A0101FF");
        let status = ApplicationStatus::try_from(&bytes[..]).unwrap();
        assert_eq!(
            status,
            ApplicationStatus {
                pin_retry_count: 3,
                puk_retry_count: 10,
                key_initialized: true,
            }
        );
        assert!(!status.pin_blocked());
    }

    #[test]
    fn test_blocked_pin() {
        let bytes = hex!("A309020100020105010100");
        let status = ApplicationStatus::try_from(&bytes[..]).unwrap();
        assert!(status.pin_blocked());
        assert!(!status.puk_blocked());
        assert!(!status.key_initialized);
    }

    #[test]
    fn test_missing_counter() {
        let bytes = hex!("A3060201030101FF");
        assert!(matches!(
            ApplicationStatus::try_from(&bytes[..]),
            Err(Error::Decoding(DecodingError::MissingTag(0x02)))
        ));
    }
}
