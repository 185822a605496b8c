use alloy_primitives::hex;
use keycard_host::Mnemonic;

use super::{field, section};

pub fn seed_command(phrase: &str, passphrase: &str) -> anyhow::Result<()> {
    let phrase = phrase.split_whitespace().collect::<Vec<_>>().join(" ");
    let mnemonic: Mnemonic = Mnemonic::parse_phrase(&phrase)?;
    let seed = mnemonic.to_binary_seed(passphrase)?;

    section("BIP39 seed");
    field("Words", mnemonic.len());
    field("Seed", hex::encode(seed.as_slice()));
    Ok(())
}
