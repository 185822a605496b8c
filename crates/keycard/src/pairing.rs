//! Pairing with a card
//!
//! A pairing is a slot on the card holding a 32 byte key both sides derive
//! from the pairing password. It is required before a secure channel can be
//! opened and survives across sessions until unpaired.

use keycard_apdu::CardTransport;
use tracing::{debug, warn};

use crate::{
    Keycard, Result,
    commands::{PairCommand, PairResponse, UnpairCommand},
    crypto::{Challenge, PairingToken, calculate_cryptogram, generate_pairing_token, random_challenge},
    error::{DecodingError, SecureChannelError},
    state::{AppletState, Requirement},
    types::{Capability, PairingInfo},
    validation::validate_pairing_index,
};

impl<T: CardTransport> Keycard<T> {
    /// PAIR with the card using the pairing password
    ///
    /// Runs both steps of the exchange: the card first proves it knows the
    /// token, then the host does. The resulting pairing replaces any pairing
    /// held so far.
    pub fn pair(&mut self, password: &str) -> Result<PairingInfo> {
        self.require("PAIR", Requirement::PairingAllowed)?;
        self.capabilities.require("PAIR", Capability::SecureChannel)?;

        debug!("Starting pairing");
        let token = generate_pairing_token(password);
        let pairing_info = self.pair_with_token(&token)?;

        debug!(index = pairing_info.index(), "Paired");
        self.pairing_info = Some(pairing_info.clone());
        self.set_state(AppletState::Paired);
        Ok(pairing_info)
    }

    fn pair_with_token(&mut self, token: &PairingToken) -> Result<PairingInfo> {
        let challenge: Challenge = random_challenge();
        let PairResponse::FirstStep {
            card_cryptogram,
            card_challenge,
        } = self.execute(&PairCommand::with_first_stage(&challenge))?
        else {
            return Err(DecodingError::InvalidData("expected first PAIR step").into());
        };

        if card_cryptogram != calculate_cryptogram(token, &challenge) {
            warn!("Card cryptogram does not match, wrong pairing password?");
            return Err(SecureChannelError::PairingCryptogram.into());
        }

        let host_cryptogram = calculate_cryptogram(token, &card_challenge);
        let PairResponse::FinalStep { index, salt } =
            self.execute(&PairCommand::with_final_stage(&host_cryptogram))?
        else {
            return Err(DecodingError::InvalidData("expected final PAIR step").into());
        };

        let index = validate_pairing_index(index, self.config.pairing_slots)?;
        Ok(PairingInfo::new(index, calculate_cryptogram(token, &salt)))
    }

    /// Install a pairing obtained earlier
    pub fn set_pairing(&mut self, pairing_info: PairingInfo) -> Result<()> {
        self.require("SET PAIRING", Requirement::PairingAllowed)?;
        validate_pairing_index(pairing_info.index(), self.config.pairing_slots)?;

        self.pairing_info = Some(pairing_info);
        self.set_state(AppletState::Paired);
        Ok(())
    }

    /// Pairing currently held
    pub const fn pairing_info(&self) -> Option<&PairingInfo> {
        self.pairing_info.as_ref()
    }

    /// UNPAIR the own slot, then forget the pairing and close the channel
    pub fn unpair(&mut self) -> Result<()> {
        self.require("UNPAIR", Requirement::Authenticated)?;
        let Some(index) = self.pairing_info.as_ref().map(PairingInfo::index) else {
            return Ok(());
        };

        self.execute(&UnpairCommand::with_index(index))?;
        debug!(index, "Unpaired");

        self.channel.close();
        self.pairing_info = None;
        self.key_path = None;
        self.set_state(AppletState::Selected { initialized: true });
        Ok(())
    }

    /// UNPAIR every slot except the own one
    ///
    /// Administrative cleanup: other hosts lose their pairing and must pair
    /// again. Do not use on cards in production.
    pub fn unpair_others(&mut self) -> Result<()> {
        self.require("UNPAIR", Requirement::Authenticated)?;
        let own = self.pairing_info.as_ref().map(PairingInfo::index);

        for index in (0..self.config.pairing_slots).filter(|index| Some(*index) != own) {
            self.execute(&UnpairCommand::with_index(index))?;
        }
        warn!(kept = ?own, "Unpaired all other slots");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use keycard_apdu::{Exchange, ReplayTransport};

    use super::*;
    use crate::{Error, config::KeycardConfig, validation::ValidationError};

    fn initialized(exchanges: impl IntoIterator<Item = Exchange>) -> Keycard<ReplayTransport> {
        let mut keycard = Keycard::new(ReplayTransport::new(exchanges), KeycardConfig::default());
        keycard.connect().unwrap();
        keycard.state = AppletState::Selected { initialized: true };
        keycard
    }

    #[test]
    fn test_wrong_card_cryptogram() {
        let mut response = vec![0xAB; 64];
        response.extend_from_slice(&[0x90, 0x00]);
        let mut keycard = initialized([Exchange::header([0x80, 0x12, 0x00, 0x00], response)]);

        let err = keycard.pair("KeycardTest").unwrap_err();
        assert!(matches!(
            err,
            Error::SecureChannel(SecureChannelError::PairingCryptogram)
        ));
        assert!(keycard.pairing_info().is_none());
        assert_eq!(keycard.state(), AppletState::Selected { initialized: true });
    }

    #[test]
    fn test_no_free_slot() {
        let mut keycard = initialized([Exchange::header([0x80, 0x12, 0x00, 0x00], vec![0x6A, 0x84])]);
        let err = keycard.pair("KeycardTest").unwrap_err();
        assert_eq!(err.status_word(), Some(keycard_apdu::StatusWord::new(0x6A, 0x84)));
    }

    #[test]
    fn test_set_pairing() {
        let mut keycard = initialized([]);

        assert!(matches!(
            keycard.set_pairing(PairingInfo::new(7, [0x01; 32])),
            Err(Error::Validation(ValidationError::OutOfRange { field: "pairing index", .. }))
        ));

        keycard.set_pairing(PairingInfo::new(2, [0x01; 32])).unwrap();
        assert_eq!(keycard.state(), AppletState::Paired);
        assert_eq!(keycard.pairing_info().map(PairingInfo::index), Some(2));
    }

    #[test]
    fn test_unpair_others_skips_own_slot() {
        let ok = || vec![0x90, 0x00];
        let mut keycard = initialized([
            Exchange::exact([0x80, 0x13, 0x00, 0x00].to_vec(), ok()),
            Exchange::exact([0x80, 0x13, 0x02, 0x00].to_vec(), ok()),
        ]);
        keycard.config.pairing_slots = 3;
        keycard.pairing_info = Some(PairingInfo::new(1, [0x01; 32]));
        keycard.state = AppletState::Authenticated;

        // Plain exchanges stand in for the wrapped ones here
        keycard.unpair_others().unwrap();
        assert!(keycard.transport().is_exhausted());
        assert_eq!(keycard.pairing_info().map(PairingInfo::index), Some(1));
    }
}
