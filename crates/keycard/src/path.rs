//! BIP32 key paths as DERIVE KEY understands them
//!
//! A path is relative to the master key (`m/...`), the parent of the current
//! key (`../...`) or the current key (`./...` or no prefix). Components are
//! sent big endian, 4 bytes each, hardened ones with the top bit set.

use std::{fmt, str::FromStr};

use bytes::{BufMut, Bytes, BytesMut};
use coins_bip32::path::DerivationPath;

use crate::constants::{MAX_PATH_DEPTH, p1};

/// Bit marking a hardened component
pub const HARDENED: u32 = 0x8000_0000;

/// Errors while parsing or decoding a key path
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyPathError {
    /// A component is not a number below 2^31
    #[error("Invalid path component: {0:?}")]
    InvalidComponent(String),

    /// Too many components
    #[error("Path has {0} components, at most 10 are supported")]
    TooDeep(usize),

    /// Binary path length is not a multiple of 4
    #[error("Binary path length {0} is not a multiple of 4")]
    InvalidLength(usize),

    /// Operation needs a path from the master key
    #[error("Path must start at the master key")]
    NotAbsolute,
}

/// Starting point of a derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeriveSource {
    /// The master key
    Master,
    /// The parent of the current key
    Parent,
    /// The current key
    #[default]
    Current,
}

impl DeriveSource {
    /// Source bits of DERIVE KEY / EXPORT KEY / SIGN P1
    pub const fn p1_bits(self) -> u8 {
        match self {
            Self::Master => p1::DERIVE_FROM_MASTER,
            Self::Parent => p1::DERIVE_FROM_PARENT,
            Self::Current => p1::DERIVE_FROM_CURRENT,
        }
    }

    /// Source encoded in a P1 byte
    pub const fn from_p1(p1: u8) -> Option<Self> {
        match p1 & p1::DERIVE_SOURCE_MASK {
            p1::DERIVE_FROM_MASTER => Some(Self::Master),
            p1::DERIVE_FROM_PARENT => Some(Self::Parent),
            p1::DERIVE_FROM_CURRENT => Some(Self::Current),
            _ => None,
        }
    }
}

/// Key path with its derivation source
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct KeyPath {
    source: DeriveSource,
    components: Vec<u32>,
}

impl KeyPath {
    /// The master key itself
    pub const fn master() -> Self {
        Self {
            source: DeriveSource::Master,
            components: Vec::new(),
        }
    }

    /// Build a path, checking its depth
    pub fn new(source: DeriveSource, components: Vec<u32>) -> Result<Self, KeyPathError> {
        if components.len() > MAX_PATH_DEPTH {
            return Err(KeyPathError::TooDeep(components.len()));
        }
        Ok(Self { source, components })
    }

    /// Decode the binary form sent by DERIVE KEY or returned by GET STATUS
    pub fn from_bytes(source: DeriveSource, bytes: &[u8]) -> Result<Self, KeyPathError> {
        if bytes.len() % 4 != 0 {
            return Err(KeyPathError::InvalidLength(bytes.len()));
        }
        let components = bytes
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self::new(source, components)
    }

    /// Binary form, components only
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.components.len() * 4);
        for component in &self.components {
            buf.put_u32(*component);
        }
        buf.freeze()
    }

    /// Derivation source
    pub const fn source(&self) -> DeriveSource {
        self.source
    }

    /// Path components
    pub fn components(&self) -> &[u32] {
        &self.components
    }

    /// Whether the path starts at the master key
    pub const fn is_absolute(&self) -> bool {
        matches!(self.source, DeriveSource::Master)
    }

    /// Resolve against the absolute path of the current key
    ///
    /// Fails for a parent path when the current key is the master.
    pub fn resolve(&self, current: &KeyPath) -> Result<KeyPath, KeyPathError> {
        let mut components = match self.source {
            DeriveSource::Master => Vec::new(),
            DeriveSource::Current => current.components.clone(),
            DeriveSource::Parent => {
                let Some((_, parent)) = current.components.split_last() else {
                    return Err(KeyPathError::InvalidComponent("..".to_string()));
                };
                parent.to_vec()
            }
        };
        components.extend_from_slice(&self.components);
        Self::new(DeriveSource::Master, components)
    }

    /// Whether `prefix` is a leading part of this path
    pub fn starts_with(&self, prefix: &[u32]) -> bool {
        self.components.starts_with(prefix)
    }
}

impl FromStr for KeyPath {
    type Err = KeyPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('/').peekable();

        let source = match parts.peek().copied() {
            Some("m") | Some("M") => DeriveSource::Master,
            Some("..") => DeriveSource::Parent,
            Some(".") => DeriveSource::Current,
            _ => DeriveSource::Current,
        };
        if matches!(parts.peek().copied(), Some("m" | "M" | ".." | ".")) {
            parts.next();
        }

        let components = parts
            .map(parse_component)
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(source, components)
    }
}

fn parse_component(part: &str) -> Result<u32, KeyPathError> {
    let (digits, hardened) = match part.strip_suffix(['\'', 'h', 'H']) {
        Some(digits) => (digits, true),
        None => (part, false),
    };

    match digits.parse::<u32>() {
        Ok(index) if index < HARDENED => Ok(if hardened { index | HARDENED } else { index }),
        _ => Err(KeyPathError::InvalidComponent(part.to_string())),
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.source {
            DeriveSource::Master => "m",
            DeriveSource::Parent => "..",
            DeriveSource::Current => ".",
        };
        write!(f, "{prefix}")?;
        for component in &self.components {
            if component & HARDENED != 0 {
                write!(f, "/{}'", component & !HARDENED)?;
            } else {
                write!(f, "/{component}")?;
            }
        }
        Ok(())
    }
}

impl From<&DerivationPath> for KeyPath {
    fn from(path: &DerivationPath) -> Self {
        Self {
            source: DeriveSource::Master,
            components: path.iter().copied().collect(),
        }
    }
}

impl TryFrom<&KeyPath> for DerivationPath {
    type Error = KeyPathError;

    fn try_from(path: &KeyPath) -> Result<Self, Self::Error> {
        if !path.is_absolute() {
            return Err(KeyPathError::NotAbsolute);
        }
        Ok(path.components.iter().copied().collect())
    }
}
