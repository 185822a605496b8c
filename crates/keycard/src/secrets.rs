//! Credentials installed by INIT
//!
//! Applets before 3.1 take `PIN || PUK || pairing token`. Later applets
//! append the PIN and PUK retry limits and a duress PIN.

use std::fmt;

use base64::prelude::*;
use bytes::{BufMut, Bytes, BytesMut};
use rand::{Rng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    crypto::{PairingToken, generate_pairing_token},
    types::Version,
    validation::{
        PIN_LENGTH, PUK_LENGTH, ValidationError, ValidationResult, validate_pin, validate_puk,
    },
};

const PIN_RETRIES: u8 = 3;
const PUK_RETRIES: u8 = 5;

/// INIT payload layout understood by the applet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppletVersion {
    /// PIN, PUK and pairing token
    Legacy,
    /// Adds retry limits and a duress PIN
    V3_1,
}

impl From<Version> for AppletVersion {
    fn from(version: Version) -> Self {
        if version >= Version::V3_1 {
            Self::V3_1
        } else {
            Self::Legacy
        }
    }
}

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct RetryLimits {
    pin: u8,
    puk: u8,
    duress_pin: Option<String>,
}

/// PIN, PUK and pairing password for a new card
///
/// The pairing password is kept so it can be shown to the user once; the
/// card only stores the token derived from it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secrets {
    pin: String,
    puk: String,
    pairing_pass: String,
    pairing_token: PairingToken,
    limits: Option<RetryLimits>,
}

impl Secrets {
    /// Secrets in the legacy layout
    pub fn new(pin: &str, puk: &str, pairing_pass: &str) -> ValidationResult<Self> {
        validate_pin(pin)?;
        validate_puk(puk)?;

        Ok(Self {
            pin: pin.to_owned(),
            puk: puk.to_owned(),
            pairing_pass: pairing_pass.to_owned(),
            pairing_token: generate_pairing_token(pairing_pass),
            limits: None,
        })
    }

    /// Switch to the 3.1 layout with the given retry limits
    pub fn with_retry_limits(mut self, pin: u8, puk: u8) -> ValidationResult<Self> {
        for (field, value) in [("PIN retry limit", pin), ("PUK retry limit", puk)] {
            if !(1..=15).contains(&value) {
                return Err(ValidationError::OutOfRange {
                    field,
                    value: value.into(),
                    min: 1,
                    max: 15,
                });
            }
        }

        let duress_pin = self.limits.take().and_then(|mut l| l.duress_pin.take());
        self.limits = Some(RetryLimits { pin, puk, duress_pin });
        Ok(self)
    }

    /// Set a duress PIN; implies the 3.1 layout
    pub fn with_duress_pin(mut self, duress_pin: &str) -> ValidationResult<Self> {
        validate_pin(duress_pin)?;
        let limits = self.limits.get_or_insert_with(|| RetryLimits {
            pin: PIN_RETRIES,
            puk: PUK_RETRIES,
            duress_pin: None,
        });
        limits.duress_pin = Some(duress_pin.to_owned());
        Ok(self)
    }

    /// Random PIN, PUK and base64url pairing password
    pub fn generate(version: AppletVersion) -> Self {
        let mut rng = rand::rng();
        let pin = format!("{:06}", rng.random_range(0..1_000_000u32));
        let puk = format!("{:012}", rng.random_range(0..1_000_000_000_000u64));

        let mut raw = [0u8; 12];
        rng.fill_bytes(&mut raw);
        let pairing_pass = BASE64_URL_SAFE_NO_PAD.encode(raw);

        Self {
            pairing_token: generate_pairing_token(&pairing_pass),
            pin,
            puk,
            pairing_pass,
            limits: (version == AppletVersion::V3_1).then_some(RetryLimits {
                pin: PIN_RETRIES,
                puk: PUK_RETRIES,
                duress_pin: None,
            }),
        }
    }

    /// PIN
    pub fn pin(&self) -> &str {
        &self.pin
    }

    /// PUK
    pub fn puk(&self) -> &str {
        &self.puk
    }

    /// Pairing password
    pub fn pairing_pass(&self) -> &str {
        &self.pairing_pass
    }

    /// Token derived from the pairing password
    pub const fn pairing_token(&self) -> &PairingToken {
        &self.pairing_token
    }

    /// Layout produced by [`Secrets::to_bytes`]
    pub const fn version(&self) -> AppletVersion {
        if self.limits.is_some() {
            AppletVersion::V3_1
        } else {
            AppletVersion::Legacy
        }
    }

    /// PIN and PUK retry limits the card starts with
    pub fn retry_limits(&self) -> (u8, u8) {
        self.limits
            .as_ref()
            .map_or((PIN_RETRIES, PUK_RETRIES), |l| (l.pin, l.puk))
    }

    /// Plain INIT payload, encrypted by the caller
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 * PIN_LENGTH + PUK_LENGTH + 34);
        buf.put_slice(self.pin.as_bytes());
        buf.put_slice(self.puk.as_bytes());
        buf.put_slice(&self.pairing_token);

        if let Some(limits) = &self.limits {
            buf.put_u8(limits.pin);
            buf.put_u8(limits.puk);
            // No duress PIN: the applet takes the first six PUK digits
            let duress = limits
                .duress_pin
                .as_deref()
                .unwrap_or(&self.puk[..PIN_LENGTH]);
            buf.put_slice(duress.as_bytes());
        }

        buf.freeze()
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets")
            .field("version", &self.version())
            .field("retry_limits", &self.retry_limits())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIN: &str = "123456";
    const PUK: &str = "123456789012";

    #[test]
    fn test_legacy_layout() {
        let secrets = Secrets::new(PIN, PUK, "test-pairing-pass").unwrap();
        assert_eq!(secrets.version(), AppletVersion::Legacy);
        assert_eq!(secrets.retry_limits(), (3, 5));

        let bytes = secrets.to_bytes();
        assert_eq!(bytes.len(), 6 + 12 + 32);
        assert_eq!(&bytes[..6], PIN.as_bytes());
        assert_eq!(&bytes[6..18], PUK.as_bytes());
        assert_eq!(&bytes[18..], &generate_pairing_token("test-pairing-pass"));
    }

    #[test]
    fn test_extended_layout() {
        let secrets = Secrets::new(PIN, PUK, "test-pairing-pass")
            .and_then(|s| s.with_duress_pin("654321"))
            .and_then(|s| s.with_retry_limits(5, 7))
            .unwrap();
        assert_eq!(secrets.version(), AppletVersion::V3_1);

        let bytes = secrets.to_bytes();
        assert_eq!(bytes.len(), 6 + 12 + 32 + 2 + 6);
        assert_eq!(&bytes[50..52], &[5, 7]);
        assert_eq!(&bytes[52..], b"654321");

        let secrets = Secrets::new(PIN, "987654321098", "pass")
            .and_then(|s| s.with_retry_limits(3, 5))
            .unwrap();
        assert_eq!(&secrets.to_bytes()[52..], b"987654");
    }

    #[test]
    fn test_invalid_input() {
        assert!(matches!(
            Secrets::new("12345", PUK, "pass"),
            Err(ValidationError::IncorrectLength { field: "PIN", .. })
        ));
        assert!(matches!(
            Secrets::new(PIN, "12345678901", "pass"),
            Err(ValidationError::IncorrectLength { field: "PUK", .. })
        ));

        let secrets = Secrets::new(PIN, PUK, "pass").unwrap();
        assert!(secrets.clone().with_duress_pin("1234").is_err());
        assert!(matches!(
            secrets.with_retry_limits(0, 5),
            Err(ValidationError::OutOfRange { field: "PIN retry limit", .. })
        ));
    }

    #[test]
    fn test_generate() {
        let secrets = Secrets::generate(AppletVersion::V3_1);
        assert!(validate_pin(secrets.pin()).is_ok());
        assert!(validate_puk(secrets.puk()).is_ok());
        assert!(BASE64_URL_SAFE_NO_PAD.decode(secrets.pairing_pass()).is_ok());
        assert_eq!(secrets.to_bytes().len(), 58);

        assert_eq!(
            Secrets::generate(AppletVersion::Legacy).to_bytes().len(),
            50
        );
    }

    #[test]
    fn test_debug_hides_credentials() {
        let debug = format!("{:?}", Secrets::new(PIN, PUK, "hunter2").unwrap());
        assert!(!debug.contains(PIN));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_layout_for_version() {
        assert_eq!(AppletVersion::from(Version::new(3, 0)), AppletVersion::Legacy);
        assert_eq!(AppletVersion::from(Version::new(3, 2)), AppletVersion::V3_1);
    }
}
