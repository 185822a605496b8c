//! Status words

use std::fmt;

/// SW1 SW2 closing every response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    /// First status byte
    pub sw1: u8,
    /// Second status byte
    pub sw2: u8,
}

impl StatusWord {
    /// `9000`
    pub const SUCCESS: Self = Self::new(0x90, 0x00);

    /// Status word from its two bytes
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Both bytes as a big-endian integer
    pub const fn to_u16(self) -> u16 {
        u16::from_be_bytes([self.sw1, self.sw2])
    }

    /// Both bytes in wire order
    pub const fn to_bytes(self) -> [u8; 2] {
        [self.sw1, self.sw2]
    }

    /// Whether this is `9000`
    pub const fn is_success(self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Attempts left when this is a verification failure `63Cx`
    pub const fn retry_counter(self) -> Option<u8> {
        if self.sw1 == 0x63 && self.sw2 & 0xF0 == 0xC0 {
            Some(self.sw2 & 0x0F)
        } else {
            None
        }
    }
}

impl From<(u8, u8)> for StatusWord {
    fn from((sw1, sw2): (u8, u8)) -> Self {
        Self::new(sw1, sw2)
    }
}

impl From<u16> for StatusWord {
    fn from(value: u16) -> Self {
        let [sw1, sw2] = value.to_be_bytes();
        Self::new(sw1, sw2)
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}", self.sw1, self.sw2)
    }
}

/// Status words the Keycard applet answers with
pub mod common {
    use super::StatusWord;

    /// `9000`
    pub const SUCCESS: StatusWord = StatusWord::SUCCESS;
    /// `63C0`, verification failed and no attempt is left
    pub const VERIFICATION_BLOCKED: StatusWord = StatusWord::new(0x63, 0xC0);
    /// `6700`
    pub const WRONG_LENGTH: StatusWord = StatusWord::new(0x67, 0x00);
    /// `6982`, e.g. a failed secure channel check or a missing PIN
    pub const SECURITY_CONDITION_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x82);
    /// `6985`
    pub const CONDITIONS_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x85);
    /// `6A80`
    pub const INCORRECT_DATA: StatusWord = StatusWord::new(0x6A, 0x80);
    /// `6A82`, applet not found on SELECT
    pub const FILE_NOT_FOUND: StatusWord = StatusWord::new(0x6A, 0x82);
    /// `6A84`, every pairing slot taken
    pub const FILE_FULL: StatusWord = StatusWord::new(0x6A, 0x84);
    /// `6A86`
    pub const INCORRECT_P1P2: StatusWord = StatusWord::new(0x6A, 0x86);
    /// `6A88`
    pub const REFERENCED_DATA_NOT_FOUND: StatusWord = StatusWord::new(0x6A, 0x88);
    /// `6D00`
    pub const INVALID_INSTRUCTION: StatusWord = StatusWord::new(0x6D, 0x00);
    /// `6E00`
    pub const CLASS_NOT_SUPPORTED: StatusWord = StatusWord::new(0x6E, 0x00);
}
