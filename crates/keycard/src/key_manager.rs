//! Key lifecycle on the card: generate, load, derive, export and sign
//!
//! The host mirrors the card's current key path. Absolute derivations update
//! the mirror, relative ones invalidate it until the next GET STATUS.

use keycard_apdu::CardTransport;
use tracing::debug;

use crate::{
    Keycard, Result,
    commands::{
        DeriveKeyCommand, ExportKeyCommand, ExportOption, GenerateKeyCommand,
        GenerateMnemonicCommand, LoadKeyCommand, RemoveKeyCommand, SetPinlessPathCommand,
        SignCommand,
    },
    mnemonic::Mnemonic,
    path::KeyPath,
    state::Requirement,
    types::{Capability, Keypair, RecoverableSignature},
    validation::validate_hash,
};

impl<T: CardTransport> Keycard<T> {
    /// GENERATE KEY, returns the key UID
    pub fn generate_key(&mut self) -> Result<[u8; 32]> {
        self.require_key_management("GENERATE KEY", Requirement::Authenticated)?;
        let key_uid = self.execute(&GenerateKeyCommand::create())?;
        self.master_key_changed(Some(key_uid));
        Ok(key_uid)
    }

    /// LOAD KEY from a key pair, extended when it carries a chain code
    pub fn load_key(&mut self, keypair: &Keypair) -> Result<[u8; 32]> {
        self.require_key_management("LOAD KEY", Requirement::Authenticated)?;
        let key_uid = self.execute(&LoadKeyCommand::with_keypair(keypair)?)?;
        self.master_key_changed(Some(key_uid));
        Ok(key_uid)
    }

    /// LOAD KEY from a 64 byte BIP39 seed
    pub fn load_seed(&mut self, seed: &[u8; 64]) -> Result<[u8; 32]> {
        self.require_key_management("LOAD KEY", Requirement::Authenticated)?;
        let key_uid = self.execute(&LoadKeyCommand::with_seed(seed))?;
        self.master_key_changed(Some(key_uid));
        Ok(key_uid)
    }

    /// REMOVE KEY
    pub fn remove_key(&mut self) -> Result<()> {
        self.require_key_management("REMOVE KEY", Requirement::Authenticated)?;
        self.execute(&RemoveKeyCommand::remove())?;
        self.master_key_changed(None);
        Ok(())
    }

    /// DERIVE KEY along a textual path such as `m/44'/60'/0'/0/0`
    pub fn derive_key(&mut self, path: &str) -> Result<()> {
        let path = path.parse::<KeyPath>()?;
        self.derive_key_path(&path)
    }

    /// DERIVE KEY along a parsed path
    pub fn derive_key_path(&mut self, path: &KeyPath) -> Result<()> {
        self.require_key_management("DERIVE KEY", Requirement::Authenticated)?;
        self.execute(&DeriveKeyCommand::with_path(path))?;
        debug!(%path, "Key derived");
        self.path_changed(path);
        Ok(())
    }

    /// EXPORT KEY of the current key
    ///
    /// The private key is only requested with `include_private`; the card
    /// refuses it outside of the paths it allows private export for.
    pub fn export_current_key(&mut self, include_private: bool) -> Result<Keypair> {
        self.require("EXPORT KEY", Requirement::Authenticated)?;
        let option = if include_private {
            ExportOption::PrivateAndPublic
        } else {
            ExportOption::PublicKeyOnly
        };
        self.execute(&ExportKeyCommand::current(option))
    }

    /// EXPORT KEY at `path` without changing the current key
    pub fn export_key(&mut self, option: ExportOption, path: &KeyPath) -> Result<Keypair> {
        self.require("EXPORT KEY", Requirement::Authenticated)?;
        self.execute(&ExportKeyCommand::with_path(option, path, false))
    }

    /// SIGN a 32 byte hash with the current key
    ///
    /// The card returns a bare ECDSA signature; the recovery id is found by
    /// trial recovery against the public key it sends along.
    pub fn sign(&mut self, hash: &[u8]) -> Result<RecoverableSignature> {
        self.require("SIGN", Requirement::Authenticated)?;
        let hash = validate_hash(hash)?;
        let signature = self.execute(&SignCommand::with_hash(&hash))?;
        signature.into_recoverable(hash)
    }

    /// SIGN with the key at `path`, optionally making it the current key
    pub fn sign_with_path(
        &mut self,
        hash: &[u8],
        path: &KeyPath,
        make_current: bool,
    ) -> Result<RecoverableSignature> {
        self.require("SIGN", Requirement::Authenticated)?;
        let hash = validate_hash(hash)?;
        let signature = self.execute(&SignCommand::with_path(&hash, path, make_current))?;
        if make_current {
            self.path_changed(path);
        }
        signature.into_recoverable(hash)
    }

    /// SIGN with the PIN-less path
    ///
    /// Needs neither a secure channel nor a PIN, only a selected applet with
    /// a PIN-less path set.
    pub fn sign_pinless(&mut self, hash: &[u8]) -> Result<RecoverableSignature> {
        self.require("SIGN", Requirement::Selected)?;
        let hash = validate_hash(hash)?;
        let signature = self.execute(&SignCommand::pinless(&hash))?;
        signature.into_recoverable(hash)
    }

    /// SET PINLESS PATH; the master path disables PIN-less signing
    pub fn set_pinless_path(&mut self, path: &KeyPath) -> Result<()> {
        self.require("SET PINLESS PATH", Requirement::Authenticated)?;
        self.execute(&SetPinlessPathCommand::with_path(path)?)
    }

    /// GENERATE MNEMONIC of 12, 15, 18, 21 or 24 words
    ///
    /// Only the word indices come from the card; no key is created.
    pub fn generate_mnemonic(&mut self, words: usize) -> Result<Mnemonic> {
        self.require_key_management("GENERATE MNEMONIC", Requirement::ChannelOpen)?;
        let indices = self.execute(&GenerateMnemonicCommand::with_words(words)?)?;
        Mnemonic::from_indices(indices)
    }

    fn require_key_management(
        &mut self,
        operation: &'static str,
        required: Requirement,
    ) -> Result<()> {
        self.require(operation, required)?;
        self.capabilities
            .require(operation, Capability::KeyManagement)?;
        Ok(())
    }

    fn master_key_changed(&mut self, key_uid: Option<[u8; 32]>) {
        debug!(has_key = key_uid.is_some(), "Master key changed");
        self.key_path = key_uid.map(|_| KeyPath::master());
        if let Some(info) = self.application_info.as_mut() {
            info.key_uid = key_uid;
        }
    }

    fn path_changed(&mut self, path: &KeyPath) {
        self.key_path = path.is_absolute().then(|| path.clone());
    }
}
