use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Pairing slot and key agreed with a card
///
/// The key is wiped on drop. Persisting it is up to the caller; a pairing
/// survives sessions until the slot is unpaired or the card is reset.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PairingInfo {
    key: [u8; 32],
    index: u8,
}

impl PairingInfo {
    /// Pairing from a slot index and its 32-byte key
    pub const fn new(index: u8, key: [u8; 32]) -> Self {
        Self { key, index }
    }

    /// Pairing slot on the card
    pub const fn index(&self) -> u8 {
        self.index
    }

    /// Pairing key
    pub const fn key(&self) -> &[u8; 32] {
        &self.key
    }
}

impl fmt::Debug for PairingInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingInfo")
            .field("index", &self.index)
            .field("key", &"[REDACTED]")
            .finish()
    }
}
