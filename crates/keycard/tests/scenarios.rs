//! End-to-end flows against the simulated card

mod common;

use alloy_primitives::address;
use common::{PAIRING_PASSWORD, PIN, PUK, authenticated, connected, opened, secrets};
use keycard_host::{
    AppletState, Credential, Error, KeyPath, Mnemonic, PreconditionError, Requirement,
    SecureChannelError,
    commands::{ExportOption, PersistentRecord}, constants::DEFAULT_PAIRING_SLOTS,
};

const DIGEST: &[u8; 32] = b"thiscouldbeahashintheorysoitisok";
const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

#[test]
fn test_init_then_reselect() {
    let (handle, mut keycard) = connected();

    let info = keycard.select().unwrap();
    assert!(!info.is_initialized());
    assert!(info.public_key.is_some());
    assert_eq!(keycard.state(), AppletState::Selected { initialized: false });

    keycard.init(&secrets()).unwrap();
    assert!(handle.is_initialized());
    assert!(keycard.application_info().is_none());
    assert_eq!(keycard.state(), AppletState::Selected { initialized: true });

    let info = keycard.select().unwrap();
    assert!(info.is_initialized());
    assert!(!info.has_master_key());
    assert_eq!(info.remaining_slots, DEFAULT_PAIRING_SLOTS);

    // INIT is one-shot
    assert!(matches!(
        keycard.init(&secrets()),
        Err(Error::Precondition(PreconditionError::State {
            required: Requirement::Uninitialized,
            ..
        }))
    ));
}

#[test]
fn test_pair_and_open_secure_channel() {
    let (handle, mut keycard) = opened();

    let index = keycard.pairing_info().map(|p| p.index()).unwrap();
    assert!(index < DEFAULT_PAIRING_SLOTS);
    assert_eq!(handle.paired_slots(), 1);

    let status = keycard.get_status().unwrap();
    assert_eq!(status.pin_retry_count, 3);
    assert_eq!(status.puk_retry_count, 5);
    assert!(!status.key_initialized);
}

#[test]
fn test_wrong_pairing_password() {
    let (_handle, mut keycard) = connected();
    keycard.select().unwrap();
    keycard.init(&secrets()).unwrap();
    keycard.select().unwrap();

    let err = keycard.pair("NotTheRightPassword").unwrap_err();
    assert!(matches!(
        err,
        Error::SecureChannel(SecureChannelError::PairingCryptogram)
    ));
    assert!(keycard.pairing_info().is_none());
}

#[test]
fn test_pin_blocks_until_unblocked() {
    let (handle, mut keycard) = opened();

    for expected in [2, 1] {
        let err = keycard.verify_pin("111111").unwrap_err();
        match err {
            Error::Authentication(e) => {
                assert_eq!(e.credential, Credential::Pin);
                assert_eq!(e.remaining, expected);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    let err = keycard.verify_pin("111111").unwrap_err();
    assert!(matches!(err, Error::CredentialBlocked(_)));
    assert_eq!(err.remaining_attempts(), Some(0));
    assert!(keycard.is_pin_blocked());
    assert_eq!(handle.pin_retry_count(), Some(0));

    // The right PIN is refused without reaching the card
    let exchanges = handle.exchanges();
    assert!(matches!(keycard.verify_pin(PIN), Err(Error::CredentialBlocked(_))));
    assert_eq!(handle.exchanges(), exchanges);
    assert_eq!(keycard.state(), AppletState::ChannelOpen);

    // A wrong PUK costs a PUK attempt
    let err = keycard.unblock_pin("000000000000", "654321").unwrap_err();
    assert!(matches!(
        err,
        Error::Authentication(e) if e.credential == Credential::Puk && e.remaining == 4
    ));

    keycard.unblock_pin(PUK, "654321").unwrap();
    assert!(!keycard.is_pin_blocked());
    assert_eq!(keycard.state(), AppletState::Authenticated);
    assert_eq!(handle.pin_retry_count(), Some(3));
    assert_eq!(handle.puk_retry_count(), Some(5));

    keycard.open_secure_channel().unwrap();
    keycard.verify_pin("654321").unwrap();
}

#[test]
fn test_wrong_pin_revokes_verification() {
    let (handle, mut keycard) = authenticated();
    keycard.generate_key().unwrap();

    assert!(matches!(keycard.verify_pin("111111"), Err(Error::Authentication(_))));
    assert_eq!(keycard.state(), AppletState::ChannelOpen);

    // Privileged commands are refused before reaching the card
    let exchanges = handle.exchanges();
    assert!(matches!(
        keycard.sign(DIGEST),
        Err(Error::Precondition(PreconditionError::State {
            required: Requirement::Authenticated,
            ..
        }))
    ));
    assert_eq!(handle.exchanges(), exchanges);

    keycard.verify_pin(PIN).unwrap();
    keycard.sign(DIGEST).unwrap();
}

#[test]
fn test_derive_is_idempotent() {
    let (handle, mut keycard) = authenticated();
    keycard.generate_key().unwrap();
    assert_eq!(keycard.key_path(), Some(&KeyPath::master()));

    let path: KeyPath = "m/44'/0'/0'/0/0".parse().unwrap();
    keycard.derive_key("m/44'/0'/0'/0/0").unwrap();
    let first = keycard.get_key_path().unwrap();
    keycard.derive_key("m/44'/0'/0'/0/0").unwrap();
    let second = keycard.get_key_path().unwrap();

    assert_eq!(first, path);
    assert_eq!(second, path);
    assert_eq!(handle.current_path(), path);
}

#[test]
fn test_signature_recovers_exported_key() {
    let (_handle, mut keycard) = authenticated();
    keycard.generate_key().unwrap();
    keycard.derive_key("m/44'/0'/0'/0/0").unwrap();

    let signature = keycard.sign(DIGEST).unwrap();
    let exported = keycard.export_current_key(false).unwrap();

    assert!(exported.private_key.is_none());
    assert_eq!(signature.hash, *DIGEST);
    assert_eq!(Some(signature.recover_public_key().unwrap()), exported.public_key);
    assert_eq!(Some(signature.address()), exported.ethereum_address());
}

#[test]
fn test_seed_derivation_is_deterministic() {
    let mnemonic: Mnemonic = Mnemonic::parse_phrase(ABANDON).unwrap();
    let seed = mnemonic.to_binary_seed("").unwrap();

    let mut addresses = Vec::new();
    for _ in 0..2 {
        let (_handle, mut keycard) = authenticated();
        keycard.load_seed(&seed).unwrap();
        keycard.derive_key("m/44'/60'/0'/0/0").unwrap();
        let exported = keycard.export_current_key(false).unwrap();
        addresses.push(exported.ethereum_address());
    }

    assert_eq!(addresses[0], addresses[1]);
    assert_eq!(
        addresses[0],
        Some(address!("0x9858EfFD232B4033E47d90003D41EC34EcaEda94"))
    );
}

#[test]
fn test_private_export_is_restricted() {
    let (_handle, mut keycard) = authenticated();
    keycard.generate_key().unwrap();

    keycard.derive_key("m/44'/60'/0'/0/0").unwrap();
    let err = keycard.export_current_key(true).unwrap_err();
    assert!(err.status_word().is_some());

    // The secure channel survives a refused command
    assert_eq!(keycard.state(), AppletState::Authenticated);

    keycard.derive_key("m/43'/60'/1581'/0'/0").unwrap();
    let exported = keycard.export_current_key(true).unwrap();
    assert!(exported.private_key.is_some());
    assert_eq!(
        exported.private_key.as_ref().map(|k| k.public_key()),
        exported.public_key
    );
}

#[test]
fn test_generate_mnemonic_and_load() {
    let (_handle, mut keycard) = opened();

    let mnemonic = keycard.generate_mnemonic(12).unwrap();
    assert_eq!(mnemonic.len(), 12);
    assert_eq!(mnemonic.words().unwrap().len(), 12);

    // Words map back to the same indices
    let phrase = mnemonic.to_phrase().unwrap();
    let reparsed: Mnemonic = Mnemonic::parse_phrase(&phrase).unwrap();
    assert_eq!(reparsed.indices(), mnemonic.indices());

    // Loading the seed needs the PIN
    let seed = mnemonic.to_binary_seed("").unwrap();
    assert!(matches!(
        keycard.load_seed(&seed),
        Err(Error::Precondition(PreconditionError::State { .. }))
    ));
    keycard.verify_pin(PIN).unwrap();
    let key_uid = keycard.load_seed(&seed).unwrap();

    let info = keycard.select().unwrap();
    assert_eq!(info.key_uid, Some(key_uid));
    assert_eq!(keycard.state(), AppletState::Paired);
}

#[test]
fn test_pinless_signing() {
    let (_handle, mut keycard) = authenticated();
    keycard.generate_key().unwrap();

    let path: KeyPath = "m/44'/60'/0'/0/1".parse().unwrap();
    keycard.set_pinless_path(&path).unwrap();
    let expected = keycard
        .export_key(ExportOption::PublicKeyOnly, &path)
        .unwrap();

    // A fresh SELECT closes the channel; PIN-less signing works in the clear
    keycard.select().unwrap();
    let signature = keycard.sign_pinless(DIGEST).unwrap();
    assert_eq!(Some(signature.public_key), expected.public_key);
    assert_eq!(Some(signature.recover_public_key().unwrap()), expected.public_key);
}

#[test]
fn test_change_credentials() {
    let (handle, mut keycard) = authenticated();

    keycard.change_pin("123123").unwrap();
    keycard.change_puk("999999999999").unwrap();
    keycard.change_pairing_secret("AnotherPassword").unwrap();

    keycard.open_secure_channel().unwrap();
    assert!(keycard.verify_pin(PIN).is_err());
    keycard.verify_pin("123123").unwrap();

    // New pairings need the new password
    keycard.select().unwrap();
    assert!(matches!(
        keycard.pair(PAIRING_PASSWORD),
        Err(Error::SecureChannel(SecureChannelError::PairingCryptogram))
    ));

    // The existing pairing stays valid
    keycard.open_secure_channel().unwrap();
    keycard.verify_pin("123123").unwrap();

    keycard.select().unwrap();
    keycard.pair("AnotherPassword").unwrap();
    assert_eq!(handle.paired_slots(), 2);
}

#[test]
fn test_unpair() {
    let (handle, mut keycard) = connected();
    keycard.select().unwrap();
    keycard.init(&secrets()).unwrap();

    // A second host pairs first
    {
        let mut other = keycard_host::Keycard::new(handle.transport(), Default::default());
        other.select().unwrap();
        other.pair(PAIRING_PASSWORD).unwrap();
    }

    keycard.select().unwrap();
    keycard.pair(PAIRING_PASSWORD).unwrap();
    keycard.open_secure_channel().unwrap();
    keycard.verify_pin(PIN).unwrap();
    assert_eq!(handle.paired_slots(), 2);

    keycard.unpair_others().unwrap();
    assert_eq!(handle.paired_slots(), 1);

    keycard.unpair().unwrap();
    assert_eq!(handle.paired_slots(), 0);
    assert!(keycard.pairing_info().is_none());
    assert_eq!(keycard.state(), AppletState::Selected { initialized: true });
}

#[test]
fn test_data_records() {
    let (_handle, mut keycard) = authenticated();

    keycard.store_data(PersistentRecord::Public, b"hello").unwrap();
    assert_eq!(keycard.get_data(PersistentRecord::Public).unwrap().as_ref(), b"hello");
    assert!(keycard.get_data(PersistentRecord::Ndef).unwrap().is_empty());
    assert!(matches!(
        keycard.store_data(PersistentRecord::Public, &[0u8; 256]),
        Err(Error::Validation(_))
    ));

    // Readable in the clear after a new SELECT
    keycard.select().unwrap();
    assert_eq!(keycard.get_data(PersistentRecord::Public).unwrap().as_ref(), b"hello");
}

#[test]
fn test_identify_card() {
    let (handle, mut keycard) = connected();
    keycard.select().unwrap();

    // In the clear on a fresh card
    let identity = keycard.identify().unwrap();
    assert_eq!(identity.identity_key, handle.identity_key());
    assert_eq!(identity.issuer_key, handle.issuer_key());

    // And through the secure channel
    let (handle, mut keycard) = opened();
    let identity = keycard.identify().unwrap();
    assert_eq!(identity.issuer_key, handle.issuer_key());
    assert_eq!(keycard.state(), AppletState::ChannelOpen);
}

#[test]
fn test_factory_reset() {
    let (handle, mut keycard) = authenticated();
    keycard.generate_key().unwrap();
    let identity_key = handle.identity_key();

    keycard.factory_reset().unwrap();
    assert_eq!(keycard.state(), AppletState::Unselected);
    assert!(keycard.pairing_info().is_none());
    assert!(!handle.is_initialized());

    let info = keycard.select().unwrap();
    assert!(!info.is_initialized());

    // The identity is not part of the wiped state
    assert_eq!(keycard.identify().unwrap().identity_key, identity_key);
}
