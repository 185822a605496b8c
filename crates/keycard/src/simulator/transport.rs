use std::{collections::VecDeque, sync::Arc};

use bytes::Bytes;
use k256::PublicKey;
use keycard_apdu::{CardTransport, TransportError};
use parking_lot::Mutex;
use tracing::debug;

use super::applet::Applet;
use crate::path::{DeriveSource, KeyPath};

#[derive(Debug)]
struct Reader {
    applet: Applet,
    present: bool,
    connected: bool,
    injected: VecDeque<TransportError>,
    exchanges: usize,
}

/// [`CardTransport`] backed by the in-memory applet
///
/// Clones of a transport talk to the same card.
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    reader: Arc<Mutex<Reader>>,
}

impl CardTransport for SimulatedTransport {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        let mut reader = self.reader.lock();

        if let Some(error) = reader.injected.pop_front() {
            if error.is_disconnect() {
                reader.connected = false;
            }
            return Err(error);
        }
        if !reader.present || !reader.connected {
            reader.connected = false;
            return Err(TransportError::Disconnected);
        }

        reader.exchanges += 1;
        Ok(reader.applet.process(command))
    }

    fn connect(&mut self) -> Result<(), TransportError> {
        let mut reader = self.reader.lock();
        if !reader.present {
            return Err(TransportError::Connection);
        }
        if !reader.connected {
            reader.applet.power_on();
            reader.connected = true;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        let reader = self.reader.lock();
        reader.present && reader.connected
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.reader.lock().connected = false;
        Ok(())
    }
}

/// Test-side control of a simulated card
///
/// Moves the card in and out of the field, injects transport failures and
/// reads counters the host could only learn through the protocol.
#[derive(Debug, Clone)]
pub struct SimulatorHandle {
    reader: Arc<Mutex<Reader>>,
}

impl Default for SimulatorHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatorHandle {
    /// A fresh, pre-initialized card in the field
    pub fn new() -> Self {
        Self {
            reader: Arc::new(Mutex::new(Reader {
                applet: Applet::new(),
                present: true,
                connected: false,
                injected: VecDeque::new(),
                exchanges: 0,
            })),
        }
    }

    /// A transport connected to this card's reader
    pub fn transport(&self) -> SimulatedTransport {
        SimulatedTransport {
            reader: Arc::clone(&self.reader),
        }
    }

    /// Take the card out of the field
    pub fn remove_card(&self) {
        let mut reader = self.reader.lock();
        reader.present = false;
        reader.connected = false;
        debug!("Simulated card removed");
    }

    /// Put the card back; the host has to connect again
    pub fn insert_card(&self) {
        self.reader.lock().present = true;
        debug!("Simulated card inserted");
    }

    /// Replace the card with a fresh pre-initialized one
    ///
    /// The host is disconnected as if the old card had been pulled.
    pub fn swap_card(&self) {
        let mut reader = self.reader.lock();
        reader.applet = Applet::new();
        reader.present = true;
        reader.connected = false;
        debug!("Simulated card swapped");
    }

    /// Fail the next exchange with `error` before it reaches the card
    pub fn inject_error(&self, error: TransportError) {
        self.reader.lock().injected.push_back(error);
    }

    /// PIN attempts left, `None` before INIT
    pub fn pin_retry_count(&self) -> Option<u8> {
        self.reader.lock().applet.pin_retry_count()
    }

    /// PUK attempts left, `None` before INIT
    pub fn puk_retry_count(&self) -> Option<u8> {
        self.reader.lock().applet.puk_retry_count()
    }

    /// Occupied pairing slots
    pub fn paired_slots(&self) -> usize {
        self.reader.lock().applet.paired_slots()
    }

    /// Whether INIT has been performed
    pub fn is_initialized(&self) -> bool {
        self.reader.lock().applet.is_initialized()
    }

    /// Identity key the card proves with IDENTIFY CARD
    pub fn identity_key(&self) -> PublicKey {
        self.reader.lock().applet.identity_key()
    }

    /// Issuer of the card's identity certificate
    pub fn issuer_key(&self) -> PublicKey {
        self.reader.lock().applet.issuer_key()
    }

    /// Card side current key path
    pub fn current_path(&self) -> KeyPath {
        let components = self.reader.lock().applet.current_path().to_vec();
        KeyPath::new(DeriveSource::Master, components).unwrap_or_else(|_| KeyPath::master())
    }

    /// Exchanges that reached the card
    pub fn exchanges(&self) -> usize {
        self.reader.lock().exchanges
    }
}
