use alloy_primitives::hex;
use clap::Args;
use colored::Colorize;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use keycard_host::{
    Keycard, KeycardConfig, Secrets, SessionEvent, simulator::SimulatorHandle,
};
use tracing::{debug, info};

use super::{field, section};

const DEMO_HASH: &[u8; 32] = b"thiscouldbeahashintheorysoitisok";

#[derive(Args)]
pub struct DemoArgs {
    /// PIN used to initialize and unlock the card
    #[arg(long, default_value = "000000")]
    pin: String,

    /// PUK used to initialize the card
    #[arg(long, default_value = "123456789012")]
    puk: String,

    /// Pairing password
    #[arg(long, default_value = "KeycardTest")]
    pairing_password: String,

    /// Derivation path of the signing key
    #[arg(long, default_value = "m/44'/0'/0'/0/0")]
    path: String,

    /// Number of words of the generated mnemonic
    #[arg(long, default_value_t = 12)]
    words: usize,

    /// Leave the pairing on the card at the end
    #[arg(long)]
    keep_pairing: bool,
}

pub fn demo_command(args: &DemoArgs) -> anyhow::Result<()> {
    let handle = SimulatorHandle::new();
    let mut keycard = Keycard::new(handle.transport(), KeycardConfig::default());
    let events = keycard.events();

    keycard.connect()?;
    let mut info = keycard.select()?;
    if !info.is_initialized() {
        info!("Card is not initialized, installing credentials");
        let secrets = Secrets::new(&args.pin, &args.puk, &args.pairing_password)?;
        keycard.init(&secrets)?;
        info = keycard.select()?;
    }

    section("Applet");
    println!("{info}");
    field("Capabilities", format!("0x{:02x}", info.capabilities.bits()));

    let identity = keycard.identify()?;
    field(
        "Identity key",
        hex::encode(identity.identity_key.to_encoded_point(true).as_bytes()),
    );
    field(
        "Issuer key",
        hex::encode(identity.issuer_key.to_encoded_point(true).as_bytes()),
    );

    info!("Pairing with the card");
    let pairing = keycard.pair(&args.pairing_password)?;
    keycard.open_secure_channel()?;
    section("Pairing");
    field("Index", pairing.index());
    field("State", keycard.state());

    let status = keycard.get_status()?;
    section("Status");
    field("PIN retries", status.pin_retry_count);
    field("PUK retries", status.puk_retry_count);
    field("Master key", status.key_initialized);

    let mnemonic = keycard.generate_mnemonic(args.words)?;
    section("Mnemonic");
    field("Phrase", mnemonic.to_phrase()?.as_str());
    field("Seed", hex::encode(mnemonic.to_binary_seed("")?.as_slice()));

    keycard.verify_pin(&args.pin)?;
    info!("PIN verified");

    if !status.key_initialized {
        let key_uid = keycard.generate_key()?;
        info!(key_uid = %hex::encode(key_uid), "Generated master key");
    }

    section("Keys");
    field("Current path", keycard.get_key_path()?);
    keycard.derive_key(&args.path)?;
    field("Derived path", keycard.get_key_path()?);

    let exported = keycard.export_current_key(false)?;
    if let Some(public_key) = exported.public_key {
        let point = public_key.to_encoded_point(false);
        field("Public key", hex::encode(point.as_bytes()));
    }
    if let Some(address) = exported.ethereum_address() {
        field("Address", address);
    }

    let signature = keycard.sign(DEMO_HASH)?;
    section("Signature");
    field("Hash", hex::encode(signature.hash));
    field("Recovery id", signature.recovery_id.to_byte());
    field("R", hex::encode(signature.r()));
    field("S", hex::encode(signature.s()));
    field("Signer", signature.address());

    if args.keep_pairing {
        info!("Keeping pairing slot {}", pairing.index());
    } else {
        keycard.unpair_others()?;
        keycard.unpair()?;
        info!("Unpaired");
    }

    for event in events.try_iter() {
        match event {
            SessionEvent::StateChanged { from, to } => debug!(%from, %to, "State changed"),
            other => debug!(event = ?other, "Session event"),
        }
    }

    println!("\n{} {}", "Done:".green().bold(), keycard.state());
    Ok(())
}
