//! Shared setup for tests against the simulated card

#![allow(dead_code, unreachable_pub)]

use keycard_host::{
    AppletState, Keycard, KeycardConfig, Secrets,
    simulator::{SimulatedTransport, SimulatorHandle},
};

pub const PIN: &str = "000000";
pub const PUK: &str = "123456789012";
pub const PAIRING_PASSWORD: &str = "KeycardTest";

pub fn secrets() -> Secrets {
    Secrets::new(PIN, PUK, PAIRING_PASSWORD).expect("valid secrets")
}

/// A connected session over a fresh simulated card
pub fn connected() -> (SimulatorHandle, Keycard<SimulatedTransport>) {
    let handle = SimulatorHandle::new();
    let mut keycard = Keycard::new(handle.transport(), KeycardConfig::default());
    keycard.connect().expect("card is in the field");
    (handle, keycard)
}

/// An initialized and paired card with the secure channel open
pub fn opened() -> (SimulatorHandle, Keycard<SimulatedTransport>) {
    let (handle, mut keycard) = connected();
    keycard.select().expect("select");
    keycard.init(&secrets()).expect("init");
    keycard.select().expect("select after init");
    keycard.pair(PAIRING_PASSWORD).expect("pair");
    keycard.open_secure_channel().expect("open secure channel");
    assert_eq!(keycard.state(), AppletState::ChannelOpen);
    (handle, keycard)
}

/// [`opened`] plus a verified PIN
pub fn authenticated() -> (SimulatorHandle, Keycard<SimulatedTransport>) {
    let (handle, mut keycard) = opened();
    keycard.verify_pin(PIN).expect("verify PIN");
    (handle, keycard)
}
