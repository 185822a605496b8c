//! Session with a Keycard applet
//!
//! [`Keycard`] tracks where the host is in the select, pair, open, verify
//! sequence and refuses operations outside of their legal state before any
//! byte is sent. Pairing lives in [`pairing`](crate::pairing) and key
//! operations in [`key_manager`](crate::key_manager); both extend the same
//! type.

use k256::PublicKey;
use keycard_apdu::{ApduCommand, CardTransport};
use tracing::{debug, warn};

use crate::{
    Error, Result,
    commands::{
        ChangePinCommand, FactoryResetCommand, GetDataCommand, GetKeyPathCommand,
        GetStatusCommand, IdentCommand, InitCommand, PersistentRecord, SelectCommand, StoreDataCommand,
        UnblockPinCommand, VerifyPinCommand,
    },
    config::KeycardConfig,
    crypto::{generate_pairing_token, random_challenge},
    error::{AuthenticationError, Credential, PreconditionError},
    events::{EventSubscribers, SessionEvent, SessionEventReceiver},
    path::KeyPath,
    secrets::Secrets,
    secure_channel::KeycardSecureChannel,
    state::{AppletState, Requirement},
    types::{
        ApplicationInfo, ApplicationStatus, Capabilities, Capability, CardIdentity, PairingInfo,
    },
    validation::{validate_data_length, validate_pin, validate_puk},
};

/// Host side of a Keycard session
pub struct Keycard<T: CardTransport> {
    pub(crate) channel: KeycardSecureChannel<T>,
    pub(crate) config: KeycardConfig,
    pub(crate) state: AppletState,
    subscribers: EventSubscribers,
    pub(crate) application_info: Option<ApplicationInfo>,
    card_public_key: Option<PublicKey>,
    pub(crate) capabilities: Capabilities,
    pub(crate) pairing_info: Option<PairingInfo>,
    /// Mirror of the card's current key path, `None` when unknown
    pub(crate) key_path: Option<KeyPath>,
    pin_blocked: bool,
}

impl<T: CardTransport> std::fmt::Debug for Keycard<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keycard")
            .field("state", &self.state)
            .field("channel", &self.channel.state())
            .field("paired", &self.pairing_info.is_some())
            .field("key_path", &self.key_path)
            .field("pin_blocked", &self.pin_blocked)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl<T: CardTransport> Keycard<T> {
    /// Create a session over `transport`
    ///
    /// Nothing is sent until [`connect`](Self::connect) and
    /// [`select`](Self::select).
    pub fn new(transport: T, config: KeycardConfig) -> Self {
        Self {
            channel: KeycardSecureChannel::new(transport)
                .with_max_retries(config.max_transport_retries),
            config,
            state: AppletState::Unselected,
            subscribers: EventSubscribers::default(),
            application_info: None,
            card_public_key: None,
            capabilities: Capabilities::all(),
            pairing_info: None,
            key_path: None,
            pin_blocked: false,
        }
    }

    /// Subscribe to connection and state events
    ///
    /// Each subscriber gets every event emitted after it subscribed, on a
    /// queue of [`KeycardConfig::event_capacity`] entries. Events that do not
    /// fit are dropped for that subscriber. Dropping the receiver ends the
    /// subscription.
    pub fn events(&mut self) -> SessionEventReceiver {
        self.subscribers.subscribe(self.config.event_capacity)
    }

    /// Session state
    pub const fn state(&self) -> AppletState {
        self.state
    }

    /// Session configuration
    pub const fn config(&self) -> &KeycardConfig {
        &self.config
    }

    /// Info from the last SELECT, dropped by INIT
    pub const fn application_info(&self) -> Option<&ApplicationInfo> {
        self.application_info.as_ref()
    }

    /// Capabilities advertised by the last SELECT
    pub const fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Cached current key path, `None` when it is not known
    pub const fn key_path(&self) -> Option<&KeyPath> {
        self.key_path.as_ref()
    }

    /// Whether a PIN block was observed on this card and not yet lifted
    ///
    /// Cleared by a new SELECT or a disconnect; the card reports it again
    /// through VERIFY PIN or GET STATUS.
    pub const fn is_pin_blocked(&self) -> bool {
        self.pin_blocked
    }

    /// Underlying transport
    pub const fn transport(&self) -> &T {
        self.channel.transport()
    }

    /// Connect the transport
    pub fn connect(&mut self) -> Result<()> {
        self.channel.transport_mut().connect()?;
        debug!("Connected to card");
        self.emit(SessionEvent::Connected);
        Ok(())
    }

    /// Disconnect the transport and reset the session
    pub fn disconnect(&mut self) -> Result<()> {
        let result = self.channel.transport_mut().disconnect();
        self.handle_disconnect();
        Ok(result?)
    }

    /// SELECT the applet
    ///
    /// Closes any open secure channel. The result is a fresh snapshot: the
    /// capabilities, card key and key path cache of a previous SELECT are
    /// discarded.
    pub fn select(&mut self) -> Result<ApplicationInfo> {
        self.ensure_connected()?;
        self.channel.close();
        self.key_path = None;
        self.pin_blocked = false;

        let cmd = SelectCommand::with_aid(self.config.aid.clone());
        let info = match self.execute(&cmd) {
            Ok(info) => info,
            Err(e) => {
                self.application_info = None;
                self.card_public_key = None;
                self.set_state(AppletState::Unselected);
                return Err(e);
            }
        };

        debug!(
            initialized = info.is_initialized(),
            version = %info.version,
            remaining_slots = info.remaining_slots,
            has_master_key = info.has_master_key(),
            "Applet selected"
        );

        self.card_public_key = info.public_key;
        self.capabilities = info.capabilities;
        self.application_info = Some(info.clone());

        let next = if info.is_initialized() && self.pairing_info.is_some() {
            AppletState::Paired
        } else {
            AppletState::Selected {
                initialized: info.is_initialized(),
            }
        };
        self.set_state(next);

        Ok(info)
    }

    /// INIT a pre-initialized applet with PIN, PUK and pairing password
    ///
    /// The cached application info is dropped; SELECT again to observe the
    /// initialized applet.
    pub fn init(&mut self, secrets: &Secrets) -> Result<()> {
        self.require("INIT", Requirement::Uninitialized)?;
        let card_public_key = self.card_public_key.ok_or(PreconditionError::NoCardKey)?;

        let cmd = InitCommand::with_card_pubkey_and_secrets(&card_public_key, secrets)?;
        self.execute(&cmd)?;

        debug!("Applet initialized");
        self.application_info = None;
        self.set_state(AppletState::Selected { initialized: true });
        Ok(())
    }

    /// IDENTIFY CARD with a fresh challenge
    ///
    /// Returns the verified identity key and the certificate issuer. Whether
    /// the issuer is trusted is up to the caller.
    pub fn identify(&mut self) -> Result<CardIdentity> {
        self.require("IDENTIFY CARD", Requirement::Selected)?;
        let challenge = random_challenge();
        let identity = self
            .execute(&IdentCommand::with_challenge(&challenge))?
            .verify(&challenge)?;
        debug!("Card identity verified");
        Ok(identity)
    }

    /// Run the secure channel handshake with the held pairing
    pub fn open_secure_channel(&mut self) -> Result<()> {
        self.require("OPEN SECURE CHANNEL", Requirement::Paired)?;
        self.capabilities
            .require("OPEN SECURE CHANNEL", Capability::SecureChannel)?;

        let card_public_key = self.card_public_key.ok_or(PreconditionError::NoCardKey)?;
        let Some(pairing_info) = self.pairing_info.clone() else {
            return Err(PreconditionError::State {
                operation: "OPEN SECURE CHANNEL",
                required: Requirement::Paired,
                actual: self.state,
            }
            .into());
        };

        match self.channel.open(&card_public_key, &pairing_info) {
            Ok(()) => {
                self.set_state(AppletState::ChannelOpen);
                Ok(())
            }
            Err(e) => {
                self.after_error(&e);
                if !e.is_disconnect() {
                    self.set_state(AppletState::Paired);
                }
                Err(e)
            }
        }
    }

    /// GET STATUS of the application
    pub fn get_status(&mut self) -> Result<ApplicationStatus> {
        self.require("GET STATUS", Requirement::ChannelOpen)?;
        let status = self.execute(&GetStatusCommand::application())?;
        self.pin_blocked = status.pin_blocked();
        Ok(status)
    }

    /// GET STATUS of the current key path
    pub fn get_key_path(&mut self) -> Result<KeyPath> {
        self.require("GET STATUS", Requirement::ChannelOpen)?;
        let path = self.execute(&GetKeyPathCommand::key_path())?;
        self.key_path = Some(path.clone());
        Ok(path)
    }

    /// VERIFY PIN
    ///
    /// Once the PIN is reported blocked no further attempt is sent until
    /// [`unblock_pin`](Self::unblock_pin) succeeds.
    pub fn verify_pin(&mut self, pin: &str) -> Result<()> {
        self.require("VERIFY PIN", Requirement::ChannelOpen)?;
        validate_pin(pin)?;
        if self.pin_blocked {
            return Err(Error::CredentialBlocked(AuthenticationError {
                credential: Credential::Pin,
                remaining: 0,
            }));
        }

        match self.execute(&VerifyPinCommand::with_pin(pin)) {
            Ok(()) => {
                debug!("PIN verified");
                self.set_state(AppletState::Authenticated);
                Ok(())
            }
            Err(e) => {
                if let Error::CredentialBlocked(_) = e {
                    warn!("PIN is blocked");
                    self.pin_blocked = true;
                }
                if let Some(remaining) = e.remaining_attempts() {
                    debug!(remaining, "Wrong PIN");
                }
                // A failed attempt revokes an earlier verification on the card
                if matches!(e, Error::Authentication(_) | Error::CredentialBlocked(_))
                    && self.state == AppletState::Authenticated
                {
                    self.set_state(AppletState::ChannelOpen);
                }
                Err(e)
            }
        }
    }

    /// UNBLOCK PIN with the PUK, setting a new PIN
    ///
    /// On success the new PIN counts as verified.
    pub fn unblock_pin(&mut self, puk: &str, new_pin: &str) -> Result<()> {
        self.require("UNBLOCK PIN", Requirement::ChannelOpen)?;
        self.capabilities
            .require("UNBLOCK PIN", Capability::CredentialsManagement)?;
        validate_puk(puk)?;
        validate_pin(new_pin)?;

        self.execute(&UnblockPinCommand::with_puk_and_new_pin(puk, new_pin))?;
        debug!("PIN unblocked");
        self.pin_blocked = false;
        self.set_state(AppletState::Authenticated);
        Ok(())
    }

    /// CHANGE PIN
    pub fn change_pin(&mut self, new_pin: &str) -> Result<()> {
        self.require("CHANGE PIN", Requirement::Authenticated)?;
        self.capabilities
            .require("CHANGE PIN", Capability::CredentialsManagement)?;
        validate_pin(new_pin)?;
        self.execute(&ChangePinCommand::with_pin(new_pin))
    }

    /// CHANGE PIN for the PUK
    pub fn change_puk(&mut self, new_puk: &str) -> Result<()> {
        self.require("CHANGE PUK", Requirement::Authenticated)?;
        self.capabilities
            .require("CHANGE PUK", Capability::CredentialsManagement)?;
        validate_puk(new_puk)?;
        self.execute(&ChangePinCommand::with_puk(new_puk))
    }

    /// CHANGE PIN for the pairing secret
    ///
    /// Existing pairings stay valid; new pairings need the new password.
    pub fn change_pairing_secret(&mut self, password: &str) -> Result<()> {
        self.require("CHANGE PAIRING SECRET", Requirement::Authenticated)?;
        self.capabilities
            .require("CHANGE PAIRING SECRET", Capability::CredentialsManagement)?;
        let token = generate_pairing_token(password);
        self.execute(&ChangePinCommand::with_pairing_secret(&token))
    }

    /// STORE DATA into a persistent record
    pub fn store_data(&mut self, record: PersistentRecord, data: &[u8]) -> Result<()> {
        self.require("STORE DATA", Requirement::Authenticated)?;
        if record == PersistentRecord::Ndef {
            self.capabilities.require("STORE DATA", Capability::Ndef)?;
        }
        validate_data_length(data)?;
        self.execute(&StoreDataCommand::put(record, data))
    }

    /// GET DATA from a persistent record
    ///
    /// Sent in the clear unless a secure channel is open.
    pub fn get_data(&mut self, record: PersistentRecord) -> Result<bytes::Bytes> {
        self.require("GET DATA", Requirement::Selected)?;
        self.execute(&GetDataCommand::get(record))
    }

    /// FACTORY RESET, wiping keys, credentials and pairings
    ///
    /// The session goes back to [`AppletState::Unselected`].
    pub fn factory_reset(&mut self) -> Result<()> {
        self.require("FACTORY RESET", Requirement::Selected)?;
        self.execute(&FactoryResetCommand::reset())?;

        warn!("Card factory reset");
        self.channel.close();
        self.pairing_info = None;
        self.application_info = None;
        self.card_public_key = None;
        self.key_path = None;
        self.pin_blocked = false;
        self.set_state(AppletState::Unselected);
        Ok(())
    }

    /// Fail unless connected and in a state satisfying `required`
    pub(crate) fn require(&mut self, operation: &'static str, required: Requirement) -> Result<()> {
        self.ensure_connected()?;
        if self.state.satisfies(required) {
            Ok(())
        } else {
            Err(PreconditionError::State {
                operation,
                required,
                actual: self.state,
            }
            .into())
        }
    }

    fn ensure_connected(&mut self) -> Result<()> {
        if self.channel.transport().is_connected() {
            return Ok(());
        }
        if self.state != AppletState::Unselected || self.channel.is_open() {
            self.handle_disconnect();
        }
        Err(PreconditionError::Disconnected.into())
    }

    /// Send a typed command, wrapped when the channel is open
    pub(crate) fn execute<C>(&mut self, command: &C) -> Result<C::Success>
    where
        C: ApduCommand<Error = Error>,
    {
        let result = self.channel.execute(command);
        if let Err(e) = &result {
            self.after_error(e);
        }
        result
    }

    fn after_error(&mut self, error: &Error) {
        if error.is_disconnect() {
            self.handle_disconnect();
        } else if self.state.channel_open() && !self.channel.is_open() {
            // MAC, counter or transport failure dropped the session
            warn!(error = %error, "Secure channel lost");
            self.set_state(AppletState::Paired);
        }
    }

    fn handle_disconnect(&mut self) {
        warn!("Card disconnected");
        self.channel.close();
        self.application_info = None;
        self.card_public_key = None;
        self.key_path = None;
        self.pin_blocked = false;
        self.emit(SessionEvent::Disconnected);
        self.set_state(AppletState::Unselected);
    }

    pub(crate) fn set_state(&mut self, to: AppletState) {
        let from = self.state;
        if from == to {
            return;
        }
        debug!(%from, %to, "Session state changed");
        self.state = to;
        self.emit(SessionEvent::StateChanged { from, to });
    }

    fn emit(&mut self, event: SessionEvent) {
        self.subscribers.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use keycard_apdu::{Exchange, Expect, ReplayTransport, TransportError};

    use k256::elliptic_curve::sec1::ToEncodedPoint;

    use super::*;

    fn keycard(exchanges: impl IntoIterator<Item = Exchange>) -> Keycard<ReplayTransport> {
        let mut keycard = Keycard::new(ReplayTransport::new(exchanges), KeycardConfig::default());
        keycard.connect().unwrap();
        keycard
    }

    #[test]
    fn test_operations_need_a_selected_applet() {
        let mut keycard = keycard([]);

        let err = keycard.verify_pin("123456").unwrap_err();
        assert!(matches!(
            err,
            Error::Precondition(PreconditionError::State {
                operation: "VERIFY PIN",
                required: Requirement::ChannelOpen,
                actual: AppletState::Unselected,
            })
        ));
        assert!(matches!(
            keycard.init(&Secrets::new("000000", "123456789012", "KeycardTest").unwrap()),
            Err(Error::Precondition(PreconditionError::State { .. }))
        ));
        assert!(keycard.transport().is_exhausted());
    }

    #[test]
    fn test_select_pre_initialized() {
        let card_key = k256::SecretKey::random(&mut rand_v8::thread_rng()).public_key();
        let point = card_key.to_encoded_point(false);
        let mut response = vec![0x80, 0x41];
        response.extend_from_slice(point.as_bytes());
        response.extend_from_slice(&[0x90, 0x00]);

        let mut keycard = keycard([Exchange::header([0x00, 0xA4, 0x04, 0x00], response)]);
        let events = keycard.events();

        let info = keycard.select().unwrap();
        assert!(!info.is_initialized());
        assert_eq!(info.public_key, Some(card_key));
        assert_eq!(keycard.state(), AppletState::Selected { initialized: false });
        assert_eq!(
            events.try_recv(),
            Ok(SessionEvent::StateChanged {
                from: AppletState::Unselected,
                to: AppletState::Selected { initialized: false },
            })
        );

        // Pairing is refused before INIT
        assert!(matches!(
            keycard.pair("KeycardTest"),
            Err(Error::Precondition(PreconditionError::State {
                required: Requirement::PairingAllowed,
                ..
            }))
        ));
    }

    #[test]
    fn test_select_failure_leaves_unselected() {
        let mut keycard = keycard([Exchange::header([0x00, 0xA4, 0x04, 0x00], vec![0x6A, 0x82])]);
        let err = keycard.select().unwrap_err();
        assert_eq!(err.status_word(), Some(keycard_apdu::StatusWord::new(0x6A, 0x82)));
        assert_eq!(keycard.state(), AppletState::Unselected);
    }

    #[test]
    fn test_disconnect_resets_session() {
        let mut keycard = keycard([Exchange::failure(Expect::Any, TransportError::Disconnected)]);
        let events = keycard.events();
        keycard.state = AppletState::Selected { initialized: true };

        let err = keycard.get_data(PersistentRecord::Public).unwrap_err();
        assert!(err.is_disconnect());
        assert_eq!(keycard.state(), AppletState::Unselected);
        assert_eq!(events.try_recv(), Ok(SessionEvent::Disconnected));
        assert_eq!(
            events.try_recv(),
            Ok(SessionEvent::StateChanged {
                from: AppletState::Selected { initialized: true },
                to: AppletState::Unselected,
            })
        );
    }

    #[test]
    fn test_blocked_pin_is_not_sent() {
        let mut keycard = keycard([]);
        keycard.state = AppletState::ChannelOpen;
        keycard.pin_blocked = true;

        let err = keycard.verify_pin("123456").unwrap_err();
        assert!(matches!(err, Error::CredentialBlocked(_)));
        assert!(keycard.transport().is_exhausted());
    }
}
