//! Host-side protocol engine for the Keycard applet
//!
//! [`Keycard`] drives a card through any [`CardTransport`](keycard_apdu::CardTransport):
//! SELECT and INIT, pairing, the secure channel handshake, PIN handling and
//! the key operations of a BIP32 wallet. [`simulator`] provides an in-memory
//! card to run the engine without hardware.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod commands;
pub mod constants;
pub mod crypto;
pub mod path;
pub mod simulator;

mod application;
mod config;
mod error;
mod events;
mod key_manager;
mod mnemonic;
mod pairing;
mod secrets;
mod secure_channel;
mod session;
mod state;
mod types;
mod validation;

pub use application::Keycard;
pub use config::{DEFAULT_MAX_TRANSPORT_RETRIES, KeycardConfig};
pub use error::{
    AuthenticationError, Credential, CryptoError, DecodingError, Error, PreconditionError, Result,
    SecureChannelError, StatusKind, StatusWordError,
};
pub use events::{DEFAULT_EVENT_CAPACITY, SessionEvent, SessionEventReceiver, SessionEventSender};
pub use mnemonic::Mnemonic;
pub use path::{DeriveSource, KeyPath, KeyPathError};
pub use secrets::{AppletVersion, Secrets};
pub use secure_channel::{ChannelState, KeycardSecureChannel};
pub use session::Session;
pub use state::{AppletState, Requirement};
pub use types::{
    ApplicationInfo, ApplicationStatus, CardIdentity, Capabilities, Capability, Certificate,
    EcdsaSignature, IdentityProof, Keypair, PairingInfo, RecoverableSignature, Signature, Version,
};
pub use validation::{ValidationError, ValidationResult};

pub use keycard_apdu::{CardTransport, TransportError};
