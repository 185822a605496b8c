use std::fmt;

use derive_more::Display;

use crate::error::PreconditionError;

/// Capability flags for the keycard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Capability {
    /// Secure channel and pairing
    #[display("Secure Channel")]
    SecureChannel = 0x01,
    /// Key generation, loading, derivation and signing
    #[display("Key Management")]
    KeyManagement = 0x02,
    /// PIN, PUK and pairing secret management
    #[display("Credentials Management")]
    CredentialsManagement = 0x04,
    /// NDEF record storage
    #[display("NDEF")]
    Ndef = 0x08,
}

impl Capability {
    /// Every known capability
    pub const ALL: [Self; 4] = [
        Self::SecureChannel,
        Self::KeyManagement,
        Self::CredentialsManagement,
        Self::Ndef,
    ];
}

/// Capabilities flags container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities(u8);

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", names.join(", "))
    }
}

impl Capabilities {
    /// Build a set from individual flags
    pub fn new(capabilities: &[Capability]) -> Self {
        Self(capabilities.iter().fold(0, |flags, &cap| flags | cap as u8))
    }

    /// Everything; assumed for applets that predate the capabilities record
    pub const fn all() -> Self {
        Self(0x0F)
    }

    /// Whether the flag is set
    pub const fn has_capability(&self, capability: Capability) -> bool {
        self.0 & capability as u8 != 0
    }

    /// Fail with a precondition error when the flag is missing
    pub const fn require(
        &self,
        operation: &'static str,
        capability: Capability,
    ) -> Result<(), PreconditionError> {
        if self.has_capability(capability) {
            Ok(())
        } else {
            Err(PreconditionError::MissingCapability {
                operation,
                capability,
            })
        }
    }

    /// Iterate over the flags that are set
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL
            .into_iter()
            .filter(|c| self.has_capability(*c))
    }

    /// Raw bitmask
    pub const fn bits(&self) -> u8 {
        self.0
    }
}

impl From<u8> for Capabilities {
    fn from(value: u8) -> Self {
        Self(value)
    }
}
