//! BIP39 mnemonics as word indices
//!
//! GENERATE MNEMONIC returns indices only; words come from any
//! [`Wordlist`], English by default. Checksums and seeds are those of
//! [`coins_bip39::Mnemonic`].

use std::fmt;

use coins_bip39::{English, Entropy, Wordlist, WordlistError};
use unicode_normalization::UnicodeNormalization;
use zeroize::Zeroizing;

use crate::validation::{ValidationError, validate_word_count};

/// Size of the word lists, each index takes 11 bits
pub const WORDLIST_SIZE: u16 = 2048;

/// Mnemonic phrase held as indices into a wordlist
#[derive(Clone, PartialEq, Eq)]
pub struct Mnemonic<W: Wordlist = English> {
    inner: coins_bip39::Mnemonic<W>,
    indices: Vec<u16>,
}

impl<W: Wordlist> Mnemonic<W> {
    /// Mnemonic from indices as returned by GENERATE MNEMONIC
    ///
    /// The last word has to carry the checksum of the others.
    pub fn from_indices(indices: Vec<u16>) -> crate::Result<Self> {
        validate_word_count(indices.len())?;
        if let Some(&bad) = indices.iter().find(|&&i| i >= WORDLIST_SIZE) {
            return Err(WordlistError::InvalidIndex(bad as usize).into());
        }

        let words = indices
            .iter()
            .map(|&i| W::get(i as usize))
            .collect::<Result<Vec<_>, _>>()?;
        let inner = coins_bip39::Mnemonic::new_from_phrase(&words.join(" "))?;
        Ok(Self { inner, indices })
    }

    /// Mnemonic for 16 to 32 bytes of entropy, checksum appended
    pub fn from_entropy(entropy: &[u8]) -> crate::Result<Self> {
        if entropy.len() % 4 != 0 {
            return Err(ValidationError::NotAllowed {
                field: "entropy length",
                value: entropy.len(),
                allowed: &[16, 20, 24, 28, 32],
            }
            .into());
        }
        let entropy = Entropy::from_slice(entropy)?;
        Self::from_bip39(coins_bip39::Mnemonic::new_from_entropy(entropy))
    }

    /// Parse a phrase and check its checksum
    ///
    /// Words may be separated by any whitespace.
    pub fn parse_phrase(phrase: &str) -> crate::Result<Self> {
        let words = phrase.split_whitespace().collect::<Vec<_>>();
        validate_word_count(words.len())?;
        Self::from_bip39(coins_bip39::Mnemonic::new_from_phrase(&words.join(" "))?)
    }

    fn from_bip39(inner: coins_bip39::Mnemonic<W>) -> crate::Result<Self> {
        let indices = inner
            .to_phrase()
            .split(' ')
            .map(|word| W::get_index(word).map(|i| i as u16))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { inner, indices })
    }

    /// Word indices
    pub fn indices(&self) -> &[u16] {
        &self.indices
    }

    /// Number of words
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Always false, a mnemonic has at least 12 words
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Words of the phrase
    pub fn words(&self) -> crate::Result<Vec<&'static str>> {
        Ok(self
            .indices
            .iter()
            .map(|&i| W::get(i as usize))
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// Space separated phrase
    pub fn to_phrase(&self) -> crate::Result<Zeroizing<String>> {
        Ok(Zeroizing::new(self.inner.to_phrase()))
    }

    /// BIP39 seed for LOAD KEY
    pub fn to_binary_seed(&self, passphrase: &str) -> crate::Result<Zeroizing<[u8; 64]>> {
        let passphrase = Zeroizing::new(passphrase.nfkd().collect::<String>());
        Ok(Zeroizing::new(self.inner.to_seed(Some(passphrase.as_str()))?))
    }
}

// Phrases are secrets
impl<W: Wordlist> fmt::Debug for Mnemonic<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mnemonic")
            .field("words", &self.indices.len())
            .finish_non_exhaustive()
    }
}
