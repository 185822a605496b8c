//! Keycard secure channel over a [`CardTransport`]
//!
//! The channel moves `Closed -> Handshaking -> Open -> Closed`. While closed,
//! commands go out in the clear and transient transport errors are retried.
//! Once a handshake starts nothing is retried: any transport, MAC or counter
//! failure drops the session and a new handshake is needed.

use k256::PublicKey;
use keycard_apdu::{ApduCommand, CardTransport, Command, Response};
use tracing::{debug, warn};

use crate::{
    Error, Result,
    commands::MutuallyAuthenticateCommand,
    config::DEFAULT_MAX_TRANSPORT_RETRIES,
    crypto::random_challenge,
    error::SecureChannelError,
    session::Session,
    types::PairingInfo,
};

/// Lifecycle of the secure channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, derive_more::Display)]
pub enum ChannelState {
    /// No session, commands are sent in the clear
    #[default]
    #[display("closed")]
    Closed,
    /// OPEN SECURE CHANNEL or MUTUALLY AUTHENTICATE in progress
    #[display("handshaking")]
    Handshaking,
    /// Every command is wrapped
    #[display("open")]
    Open,
}

/// Secure channel protocol implementation for Keycard
#[derive(Debug)]
pub struct KeycardSecureChannel<T: CardTransport> {
    transport: T,
    session: Option<Session>,
    state: ChannelState,
    max_retries: u8,
}

impl<T: CardTransport> KeycardSecureChannel<T> {
    /// Wrap a transport; the channel starts closed
    pub const fn new(transport: T) -> Self {
        Self {
            transport,
            session: None,
            state: ChannelState::Closed,
            max_retries: DEFAULT_MAX_TRANSPORT_RETRIES,
        }
    }

    /// Set the retry budget for transient errors while closed
    pub const fn with_max_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }

    /// Current lifecycle state
    pub const fn state(&self) -> ChannelState {
        self.state
    }

    /// Whether commands are wrapped
    pub const fn is_open(&self) -> bool {
        matches!(self.state, ChannelState::Open)
    }

    /// Active session, if any
    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Underlying transport
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport, mutably
    pub const fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Give back the transport
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Run the handshake: OPEN SECURE CHANNEL, then a wrapped MUTUALLY AUTHENTICATE
    ///
    /// Any open session is dropped first. On failure the channel is closed.
    pub fn open(&mut self, card_public_key: &PublicKey, pairing_info: &PairingInfo) -> Result<()> {
        self.close();
        self.state = ChannelState::Handshaking;

        match self.handshake(card_public_key, pairing_info) {
            Ok(()) => {
                self.state = ChannelState::Open;
                debug!(index = pairing_info.index(), "Secure channel open");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Secure channel handshake failed");
                self.close();
                Err(e)
            }
        }
    }

    fn handshake(&mut self, card_public_key: &PublicKey, pairing_info: &PairingInfo) -> Result<()> {
        self.session = Some(Session::open(
            card_public_key,
            pairing_info,
            &mut self.transport,
        )?);

        let challenge = random_challenge();
        let cmd = MutuallyAuthenticateCommand::with_challenge(&challenge);

        // A card holding other session keys cannot verify our MAC and answers
        // in the clear; any such failure means the keys do not match
        let response = self
            .exchange_secure(&cmd.to_command())
            .map_err(mutual_authentication_error)?;
        MutuallyAuthenticateCommand::parse_response(response).map_err(mutual_authentication_error)?;

        Ok(())
    }

    /// Drop the session and go back to clear text
    pub fn close(&mut self) {
        if self.session.take().is_some() {
            debug!("Secure channel closed");
        }
        self.state = ChannelState::Closed;
    }

    /// Send a command, wrapped if the channel is open
    pub fn transmit(&mut self, command: &Command) -> Result<Response> {
        match self.state {
            ChannelState::Open => self.transmit_secure(command),
            _ => self.transmit_plain(command),
        }
    }

    /// Send a command in the clear
    ///
    /// Transient transport errors are retried only while the channel is
    /// closed. A disconnect closes the channel.
    pub fn transmit_plain(&mut self, command: &Command) -> Result<Response> {
        let bytes = command.encode()?;
        let mut attempt = 0u8;

        loop {
            match self.transport.transmit_raw(&bytes) {
                Ok(raw) => return Ok(Response::from_bytes(&raw).map_err(keycard_apdu::Error::from)?),
                Err(e)
                    if e.is_transient()
                        && self.state == ChannelState::Closed
                        && attempt < self.max_retries =>
                {
                    attempt += 1;
                    warn!(
                        ins = format_args!("{:#04x}", command.ins),
                        attempt,
                        error = %e,
                        "Transient transport error, retrying"
                    );
                }
                Err(e) => {
                    if e.is_disconnect() {
                        self.close();
                    }
                    return Err(e.into());
                }
            }
        }
    }

    /// Send a wrapped command; the channel must be open
    pub fn transmit_secure(&mut self, command: &Command) -> Result<Response> {
        if !self.is_open() {
            return Err(SecureChannelError::NotOpen.into());
        }
        self.exchange_secure(command)
    }

    fn exchange_secure(&mut self, command: &Command) -> Result<Response> {
        let Some(session) = self.session.as_mut() else {
            return Err(SecureChannelError::NotOpen.into());
        };
        let (counter, wrapped) = session.wrap(command)?;

        let transport = &mut self.transport;
        let result = wrapped
            .encode()
            .map_err(Error::from)
            .and_then(|bytes| transport.transmit_raw(&bytes).map_err(Error::from))
            .and_then(|raw| session.unwrap(counter, &raw));

        if result.is_err() {
            self.close();
        }
        result
    }

    /// Send a typed command, wrapped if the channel is open, and parse the answer
    pub fn execute<C>(&mut self, command: &C) -> Result<C::Success>
    where
        C: ApduCommand<Error = Error>,
    {
        let response = self.transmit(&command.to_command())?;
        C::parse_response(response)
    }
}

fn mutual_authentication_error(error: Error) -> Error {
    match error {
        Error::StatusWord(_) | Error::Decoding(_) | Error::SecureChannel(_) => {
            SecureChannelError::MutualAuthentication.into()
        }
        other => other,
    }
}
