//! Applet identifiers, instruction bytes, parameters and TLV tags

/// Keycard applet AID without the instance suffix
pub const KEYCARD_AID: &[u8] = b"\xA0\x00\x00\x08\x04\x00\x01";

/// AID of the default Keycard instance (index 1)
pub const KEYCARD_INSTANCE_AID: &[u8] = b"\xA0\x00\x00\x08\x04\x00\x01\x01";

/// Class byte used by every proprietary Keycard command
pub const CLA: u8 = 0x80;

/// Class byte of interindustry commands (SELECT)
pub const CLA_ISO7816: u8 = 0x00;

/// Number of pairing slots of a stock applet
pub const DEFAULT_PAIRING_SLOTS: u8 = 5;

/// Maximum number of components in a derivation path
pub const MAX_PATH_DEPTH: usize = 10;

/// Instruction bytes
pub mod ins {
    /// SELECT (ISO 7816-4)
    pub const SELECT: u8 = 0xA4;
    /// INIT
    pub const INIT: u8 = 0xFE;
    /// OPEN SECURE CHANNEL
    pub const OPEN_SECURE_CHANNEL: u8 = 0x10;
    /// MUTUALLY AUTHENTICATE
    pub const MUTUALLY_AUTHENTICATE: u8 = 0x11;
    /// PAIR
    pub const PAIR: u8 = 0x12;
    /// UNPAIR
    pub const UNPAIR: u8 = 0x13;
    /// IDENTIFY CARD
    pub const IDENTIFY_CARD: u8 = 0x14;
    /// VERIFY PIN
    pub const VERIFY_PIN: u8 = 0x20;
    /// CHANGE PIN (also PUK and pairing secret)
    pub const CHANGE_PIN: u8 = 0x21;
    /// UNBLOCK PIN
    pub const UNBLOCK_PIN: u8 = 0x22;
    /// SIGN
    pub const SIGN: u8 = 0xC0;
    /// SET PINLESS PATH
    pub const SET_PINLESS_PATH: u8 = 0xC1;
    /// EXPORT KEY
    pub const EXPORT_KEY: u8 = 0xC2;
    /// GET DATA
    pub const GET_DATA: u8 = 0xCA;
    /// LOAD KEY
    pub const LOAD_KEY: u8 = 0xD0;
    /// DERIVE KEY
    pub const DERIVE_KEY: u8 = 0xD1;
    /// GENERATE MNEMONIC
    pub const GENERATE_MNEMONIC: u8 = 0xD2;
    /// REMOVE KEY
    pub const REMOVE_KEY: u8 = 0xD3;
    /// GENERATE KEY
    pub const GENERATE_KEY: u8 = 0xD4;
    /// STORE DATA
    pub const STORE_DATA: u8 = 0xE2;
    /// GET STATUS
    pub const GET_STATUS: u8 = 0xF2;
    /// FACTORY RESET
    pub const FACTORY_RESET: u8 = 0xFD;
}

/// Parameter values
pub mod p1 {
    /// SELECT by name
    pub const SELECT_BY_NAME: u8 = 0x04;

    /// PAIR first step
    pub const PAIR_FIRST_STEP: u8 = 0x00;
    /// PAIR final step
    pub const PAIR_FINAL_STEP: u8 = 0x01;

    /// CHANGE PIN: user PIN
    pub const CHANGE_PIN: u8 = 0x00;
    /// CHANGE PIN: PUK
    pub const CHANGE_PUK: u8 = 0x01;
    /// CHANGE PIN: pairing secret
    pub const CHANGE_PAIRING_SECRET: u8 = 0x02;

    /// GET STATUS: application status
    pub const GET_STATUS_APPLICATION: u8 = 0x00;
    /// GET STATUS: current key path
    pub const GET_STATUS_KEY_PATH: u8 = 0x01;

    /// LOAD KEY: ECC key pair
    pub const LOAD_KEY_ECC: u8 = 0x01;
    /// LOAD KEY: extended key pair
    pub const LOAD_KEY_EXTENDED_ECC: u8 = 0x02;
    /// LOAD KEY: 64-byte BIP39 seed
    pub const LOAD_KEY_SEED: u8 = 0x03;

    /// Derivation starts at the master key
    pub const DERIVE_FROM_MASTER: u8 = 0x00;
    /// Derivation starts at the parent of the current key
    pub const DERIVE_FROM_PARENT: u8 = 0x40;
    /// Derivation starts at the current key
    pub const DERIVE_FROM_CURRENT: u8 = 0x80;
    /// Mask of the derivation source bits
    pub const DERIVE_SOURCE_MASK: u8 = 0xC0;

    /// EXPORT KEY / SIGN: use the current key
    pub const KEY_CURRENT: u8 = 0x00;
    /// EXPORT KEY / SIGN: derive without changing the current key
    pub const KEY_DERIVE: u8 = 0x01;
    /// EXPORT KEY / SIGN: derive and make the result current
    pub const KEY_DERIVE_AND_MAKE_CURRENT: u8 = 0x02;
    /// SIGN with the PIN-less path
    pub const SIGN_PINLESS: u8 = 0x03;

    /// FACTORY RESET magic P1
    pub const FACTORY_RESET: u8 = 0xAA;
    /// FACTORY RESET magic P2
    pub const FACTORY_RESET_P2: u8 = 0x55;
}

/// TLV tags
pub mod tags {
    /// Signature template containing:
    /// - ECC_PUBLIC_KEY
    /// - ECDSA_SIGNATURE
    pub const TEMPLATE_SIGNATURE: u8 = 0xA0;
    /// Keypair template containing:
    /// - ECC_PRIVATE_KEY
    /// - optional CHAIN_CODE / ECC_PUBLIC_KEY
    pub const TEMPLATE_KEYPAIR: u8 = 0xA1;
    /// Application status template containing:
    /// - OTHER (PIN and PUK retry count)
    /// - KEY_INITIALIZED
    pub const TEMPLATE_APPLICATION_STATUS: u8 = 0xA3;
    /// Application info template containing:
    /// - INSTANCE_UID
    /// - ECC_PUBLIC_KEY
    /// - OTHER (application version and number of remaining pairing slots)
    /// - KEY_UID
    /// - CAPABILITIES
    pub const TEMPLATE_APPLICATION_INFO: u8 = 0xA4;

    /// Instance UID (16 bytes)
    pub const INSTANCE_UID: u8 = 0x8F;
    /// ECC public key (uncompressed, 65 bytes, or empty)
    pub const ECC_PUBLIC_KEY: u8 = 0x80;
    /// ECC private key (32 bytes)
    pub const ECC_PRIVATE_KEY: u8 = 0x81;
    /// Chain code (32 bytes)
    pub const CHAIN_CODE: u8 = 0x82;
    /// Version (2 bytes), remaining slots (1 byte), retry counters and signature integers
    pub const OTHER: u8 = 0x02;
    /// Key UID (32 bytes or empty)
    pub const KEY_UID: u8 = 0x8E;
    /// Capabilities (1 byte)
    pub const CAPABILITIES: u8 = 0x8D;
    /// DER ECDSA signature (sequence of two OTHER integers)
    pub const ECDSA_SIGNATURE: u8 = 0x30;
    /// Key initialized (0xFF if a master key is loaded)
    pub const KEY_INITIALIZED: u8 = 0x01;
    /// Identity certificate (98 bytes)
    pub const CERTIFICATE: u8 = 0x8A;
}
