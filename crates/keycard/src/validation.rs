//! Input validation for credentials and card data
//!
//! Everything here runs before a command is built, so malformed input never
//! reaches the card or consumes a retry.

use alloy_primitives::hex;

/// Error type for input validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The input was not the expected length
    #[error("{field} has incorrect length: expected {expected}, got {actual}")]
    IncorrectLength {
        /// Field being validated
        field: &'static str,
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// The input contained invalid characters
    #[error("{0} contains invalid characters")]
    InvalidCharacters(&'static str),

    /// The input was out of the allowed range
    #[error("{field} is out of allowed range: value {value}, min {min}, max {max}")]
    OutOfRange {
        /// Field being validated
        field: &'static str,
        /// The value that was out of range
        value: usize,
        /// Minimum allowed value
        min: usize,
        /// Maximum allowed value
        max: usize,
    },

    /// Value not in an allowed set
    #[error("{field} must be one of {allowed:?}, got {value}")]
    NotAllowed {
        /// Field being validated
        field: &'static str,
        /// The rejected value
        value: usize,
        /// Accepted values
        allowed: &'static [usize],
    },
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// PIN length in digits
pub const PIN_LENGTH: usize = 6;
/// PUK length in digits
pub const PUK_LENGTH: usize = 12;
/// Word counts GENERATE MNEMONIC accepts
pub const MNEMONIC_WORD_COUNTS: &[usize] = &[12, 15, 18, 21, 24];
/// Largest record STORE DATA accepts
pub const MAX_DATA_LENGTH: usize = 255;

fn validate_digits(field: &'static str, value: &str, length: usize) -> ValidationResult<()> {
    if value.len() != length {
        return Err(ValidationError::IncorrectLength {
            field,
            expected: length,
            actual: value.len(),
        });
    }
    if !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidCharacters(field));
    }
    Ok(())
}

/// A valid PIN is exactly 6 digits
pub fn validate_pin(pin: &str) -> ValidationResult<()> {
    validate_digits("PIN", pin, PIN_LENGTH)
}

/// A valid PUK is exactly 12 digits
pub fn validate_puk(puk: &str) -> ValidationResult<()> {
    validate_digits("PUK", puk, PUK_LENGTH)
}

/// Pairing index must address one of the card's slots
pub fn validate_pairing_index(index: u8, slots: u8) -> ValidationResult<u8> {
    if index >= slots {
        return Err(ValidationError::OutOfRange {
            field: "pairing index",
            value: index as usize,
            min: 0,
            max: slots.saturating_sub(1) as usize,
        });
    }
    Ok(index)
}

/// Hashes handed to SIGN are exactly 32 bytes
pub fn validate_hash(hash: &[u8]) -> ValidationResult<[u8; 32]> {
    hash.try_into()
        .map_err(|_| ValidationError::IncorrectLength {
            field: "hash",
            expected: 32,
            actual: hash.len(),
        })
}

/// Mnemonic length must be a multiple of 3 words between 12 and 24
pub fn validate_word_count(words: usize) -> ValidationResult<u8> {
    if !MNEMONIC_WORD_COUNTS.contains(&words) {
        return Err(ValidationError::NotAllowed {
            field: "word count",
            value: words,
            allowed: MNEMONIC_WORD_COUNTS,
        });
    }
    Ok((words / 3) as u8)
}

/// Stored records are limited to a short APDU
pub fn validate_data_length(data: &[u8]) -> ValidationResult<()> {
    if data.len() > MAX_DATA_LENGTH {
        return Err(ValidationError::OutOfRange {
            field: "data",
            value: data.len(),
            min: 0,
            max: MAX_DATA_LENGTH,
        });
    }
    Ok(())
}

/// Decode a 32-byte hex value such as a stored pairing key
pub fn validate_and_decode_hex(hex_str: &str) -> ValidationResult<[u8; 32]> {
    let hex_str = hex_str.trim().replace(' ', "");
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(&hex_str);

    if !hex_str.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::InvalidCharacters("hex value"));
    }
    if hex_str.len() != 64 {
        return Err(ValidationError::IncorrectLength {
            field: "hex value",
            expected: 64,
            actual: hex_str.len(),
        });
    }

    let mut array = [0u8; 32];
    hex::decode_to_slice(hex_str, &mut array)
        .map_err(|_| ValidationError::InvalidCharacters("hex value"))?;
    Ok(array)
}
