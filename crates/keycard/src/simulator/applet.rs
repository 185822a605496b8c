//! In-memory Keycard applet
//!
//! Answers raw APDUs the way applet 3.1 does: plain SELECT, INIT, PAIR and
//! OPEN SECURE CHANNEL, everything else through the secure channel. Only
//! GET DATA, FACTORY RESET and PIN-less SIGN are also served in the clear.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use coins_bip32::{
    path::DerivationPath,
    prelude::{ChainCode, Hint, KeyFingerprint, XKeyInfo, XPriv},
};
use coins_bip39::English;
use iso7816_tlv::ber::{Tag, Tlv, Value};
use k256::{PublicKey, SecretKey, ecdsa::SigningKey, elliptic_curve::sec1::ToEncodedPoint};
use keycard_apdu::{Command, Response, StatusWord, status::common};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::channel::CardChannel;
use crate::{
    constants::{
        CLA, CLA_ISO7816, DEFAULT_PAIRING_SLOTS, KEYCARD_AID, MAX_PATH_DEPTH, ins, p1, tags,
    },
    crypto::{
        BLOCK_SIZE, Challenge, Iv, PairingToken, SessionKey, calculate_cryptogram, decrypt_data,
        generate_ecdh_shared_secret, key_uid, random_challenge,
    },
    mnemonic::Mnemonic,
    path::{DeriveSource, HARDENED},
    types::{Capabilities, Keypair, Version},
};

type CardResult<T> = Result<T, StatusWord>;

const UNKNOWN_ERROR: StatusWord = StatusWord::new(0x6F, 0x00);

const APPLET_VERSION: Version = Version::V3_1;
const DEFAULT_MAX_PIN_ATTEMPTS: u8 = 3;
const DEFAULT_MAX_PUK_ATTEMPTS: u8 = 5;

// Private keys are only exported below m/43'/60'/1581'
const EIP1581_PREFIX: [u32; 3] = [43 | HARDENED, 60 | HARDENED, 1581 | HARDENED];

const PIN_LENGTH: usize = 6;
const PUK_LENGTH: usize = 12;
const LEGACY_INIT_LENGTH: usize = PIN_LENGTH + PUK_LENGTH + 32;
const V3_1_INIT_LENGTH: usize = LEGACY_INIT_LENGTH + 2 + PIN_LENGTH;

const fn retries(remaining: u8) -> StatusWord {
    StatusWord::new(0x63, 0xC0 | remaining)
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct Credentials {
    pin: [u8; PIN_LENGTH],
    puk: [u8; PUK_LENGTH],
    pairing_token: PairingToken,
    pin_retries: u8,
    puk_retries: u8,
    max_pin_retries: u8,
    max_puk_retries: u8,
}

impl Credentials {
    // pin || puk || token, then max PIN tries, max PUK tries and duress PIN
    fn parse(data: &[u8]) -> CardResult<Self> {
        let (max_pin_retries, max_puk_retries) = match data.len() {
            LEGACY_INIT_LENGTH => (DEFAULT_MAX_PIN_ATTEMPTS, DEFAULT_MAX_PUK_ATTEMPTS),
            V3_1_INIT_LENGTH => (data[LEGACY_INIT_LENGTH], data[LEGACY_INIT_LENGTH + 1]),
            _ => return Err(common::INCORRECT_DATA),
        };
        if max_pin_retries == 0 || max_puk_retries == 0 {
            return Err(common::INCORRECT_DATA);
        }

        let mut credentials = Self {
            pin: [0; PIN_LENGTH],
            puk: [0; PUK_LENGTH],
            pairing_token: [0; 32],
            pin_retries: max_pin_retries,
            puk_retries: max_puk_retries,
            max_pin_retries,
            max_puk_retries,
        };
        credentials.pin.copy_from_slice(&data[..PIN_LENGTH]);
        credentials
            .puk
            .copy_from_slice(&data[PIN_LENGTH..PIN_LENGTH + PUK_LENGTH]);
        credentials
            .pairing_token
            .copy_from_slice(&data[PIN_LENGTH + PUK_LENGTH..LEGACY_INIT_LENGTH]);
        Ok(credentials)
    }
}

/// Card identity key and the issuer that certified it
#[derive(Clone)]
struct Identity {
    key: SecretKey,
    issuer: SigningKey,
}

impl Identity {
    fn issue() -> Self {
        let mut rng = rand_v8::thread_rng();
        Self {
            key: SecretKey::random(&mut rng),
            issuer: SigningKey::random(&mut rng),
        }
    }

    // compressed key || r || s || recovery id
    fn certificate(&self) -> CardResult<Vec<u8>> {
        let compressed = self.key.public_key().to_encoded_point(true);
        let (signature, recovery_id) = self
            .issuer
            .sign_prehash_recoverable(&Sha256::digest(compressed.as_bytes()))
            .map_err(|_| UNKNOWN_ERROR)?;

        let mut certificate = compressed.as_bytes().to_vec();
        certificate.extend_from_slice(&signature.to_bytes());
        certificate.push(recovery_id.to_byte());
        Ok(certificate)
    }
}

enum MasterKey {
    // LOAD KEY without chain code; cannot derive
    Plain(SecretKey),
    Extended(XPriv),
}

struct DerivedKey {
    secret: SecretKey,
    chain_code: Option<[u8; 32]>,
}

impl MasterKey {
    fn extended(secret: &SecretKey, chain_code: [u8; 32]) -> Self {
        Self::Extended(XPriv::new(
            SigningKey::from(secret),
            XKeyInfo {
                depth: 0,
                parent: KeyFingerprint([0; 4]),
                index: 0,
                chain_code: ChainCode(chain_code),
                hint: Hint::SegWit,
            },
        ))
    }

    fn public_key(&self) -> CardResult<PublicKey> {
        self.derive(&[]).map(|key| key.secret.public_key())
    }

    fn derive(&self, path: &[u32]) -> CardResult<DerivedKey> {
        match self {
            Self::Plain(secret) if path.is_empty() => Ok(DerivedKey {
                secret: secret.clone(),
                chain_code: None,
            }),
            Self::Plain(_) => Err(common::CONDITIONS_NOT_SATISFIED),
            Self::Extended(root) => {
                let derived = root
                    .derive_path(path.iter().copied().collect::<DerivationPath>())
                    .map_err(|_| UNKNOWN_ERROR)?;
                let signing_key: &SigningKey = derived.as_ref();
                let info: &XKeyInfo = derived.as_ref();
                Ok(DerivedKey {
                    secret: SecretKey::from_bytes(&signing_key.to_bytes())
                        .map_err(|_| UNKNOWN_ERROR)?,
                    chain_code: Some(info.chain_code.0),
                })
            }
        }
    }
}

/// State of the simulated card
pub(crate) struct Applet {
    card_key: SecretKey,
    identity: Identity,
    instance_uid: [u8; 16],
    credentials: Option<Credentials>,
    pairings: [Option<[u8; 32]>; DEFAULT_PAIRING_SLOTS as usize],
    pair_challenge: Option<Challenge>,
    channel: Option<CardChannel>,
    mutually_authenticated: bool,
    pin_verified: bool,
    master: Option<MasterKey>,
    current_path: Vec<u32>,
    pinless_path: Option<Vec<u32>>,
    records: [Bytes; 3],
}

impl fmt::Debug for Applet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Applet")
            .field("initialized", &self.is_initialized())
            .field("paired_slots", &self.paired_slots())
            .field("channel_open", &self.channel.is_some())
            .field("pin_verified", &self.pin_verified)
            .field("has_master_key", &self.master.is_some())
            .finish_non_exhaustive()
    }
}

impl Applet {
    /// A fresh, pre-initialized card
    pub(crate) fn new() -> Self {
        let mut instance_uid = [0u8; 16];
        rand::rng().fill_bytes(&mut instance_uid);

        Self {
            card_key: SecretKey::random(&mut rand_v8::thread_rng()),
            identity: Identity::issue(),
            instance_uid,
            credentials: None,
            pairings: Default::default(),
            pair_challenge: None,
            channel: None,
            mutually_authenticated: false,
            pin_verified: false,
            master: None,
            current_path: Vec::new(),
            pinless_path: None,
            records: Default::default(),
        }
    }

    pub(crate) const fn is_initialized(&self) -> bool {
        self.credentials.is_some()
    }

    pub(crate) fn pin_retry_count(&self) -> Option<u8> {
        self.credentials.as_ref().map(|c| c.pin_retries)
    }

    pub(crate) fn puk_retry_count(&self) -> Option<u8> {
        self.credentials.as_ref().map(|c| c.puk_retries)
    }

    pub(crate) fn paired_slots(&self) -> usize {
        self.pairings.iter().flatten().count()
    }

    pub(crate) fn identity_key(&self) -> PublicKey {
        self.identity.key.public_key()
    }

    pub(crate) fn issuer_key(&self) -> PublicKey {
        PublicKey::from(self.identity.issuer.verifying_key())
    }

    pub(crate) fn current_path(&self) -> &[u32] {
        &self.current_path
    }

    /// Card entered the field; transient session state is lost
    pub(crate) fn power_on(&mut self) {
        self.close_channel();
        self.pair_challenge = None;
    }

    fn close_channel(&mut self) {
        self.channel = None;
        self.mutually_authenticated = false;
        self.pin_verified = false;
    }

    /// Handle one raw command APDU and return the raw response
    pub(crate) fn process(&mut self, raw: &[u8]) -> Bytes {
        let Ok(command) = Command::from_bytes(raw) else {
            return Response::error(common::WRONG_LENGTH).to_bytes();
        };
        trace!(
            ins = format_args!("{:#04x}", command.ins),
            secure = self.channel.is_some(),
            "Simulated card received command"
        );

        if command.cla == CLA_ISO7816 && command.ins == ins::SELECT {
            return respond(self.select(&command));
        }
        if command.cla != CLA {
            return Response::error(common::CLASS_NOT_SUPPORTED).to_bytes();
        }

        match command.ins {
            ins::INIT => respond(self.init(&command)),
            ins::PAIR => respond(self.pair(&command)),
            ins::OPEN_SECURE_CHANNEL => respond(self.open_secure_channel(&command)),
            _ => match self.channel.take() {
                Some(channel) => self.process_secure(channel, &command),
                None => respond(self.process_plain(&command)),
            },
        }
    }

    fn process_plain(&mut self, command: &Command) -> CardResult<Option<Bytes>> {
        match command.ins {
            ins::GET_DATA => self.get_data(command),
            ins::FACTORY_RESET => self.factory_reset(command),
            ins::IDENTIFY_CARD => self.identify_card(command),
            ins::SIGN if command.p1 & !p1::DERIVE_SOURCE_MASK == p1::SIGN_PINLESS => {
                self.sign(command)
            }
            _ => Err(common::CONDITIONS_NOT_SATISFIED),
        }
    }

    fn process_secure(&mut self, mut channel: CardChannel, wrapped: &Command) -> Bytes {
        let command = match channel.unwrap_command(wrapped) {
            Ok(command) => command,
            Err(status) => {
                debug!(status = %status, "Simulated card dropped the secure channel");
                self.close_channel();
                return Response::error(status).to_bytes();
            }
        };

        let result = if command.ins == ins::MUTUALLY_AUTHENTICATE {
            self.mutually_authenticate(&command)
        } else if !self.mutually_authenticated {
            Err(common::SECURITY_CONDITION_NOT_SATISFIED)
        } else {
            self.dispatch(&command)
        };
        let response = to_response(result);

        match channel.wrap_response(&response) {
            Ok(raw) => {
                let reset = command.ins == ins::FACTORY_RESET && response.is_success();
                if !reset {
                    self.channel = Some(channel);
                }
                raw
            }
            Err(_) => {
                self.close_channel();
                Response::error(UNKNOWN_ERROR).to_bytes()
            }
        }
    }

    fn dispatch(&mut self, command: &Command) -> CardResult<Option<Bytes>> {
        match command.ins {
            ins::GET_STATUS => self.get_status(command),
            ins::VERIFY_PIN => self.verify_pin(command),
            ins::CHANGE_PIN => self.change_pin(command),
            ins::UNBLOCK_PIN => self.unblock_pin(command),
            ins::UNPAIR => self.unpair(command),
            ins::GENERATE_MNEMONIC => self.generate_mnemonic(command),
            ins::GENERATE_KEY => self.generate_key(),
            ins::LOAD_KEY => self.load_key(command),
            ins::REMOVE_KEY => self.remove_key(),
            ins::DERIVE_KEY => self.derive_key(command),
            ins::EXPORT_KEY => self.export_key(command),
            ins::SIGN => self.sign(command),
            ins::SET_PINLESS_PATH => self.set_pinless_path(command),
            ins::STORE_DATA => self.store_data(command),
            ins::GET_DATA => self.get_data(command),
            ins::FACTORY_RESET => self.factory_reset(command),
            ins::IDENTIFY_CARD => self.identify_card(command),
            _ => Err(common::INVALID_INSTRUCTION),
        }
    }

    fn select(&mut self, command: &Command) -> CardResult<Option<Bytes>> {
        if !data(command).starts_with(KEYCARD_AID) {
            return Err(common::FILE_NOT_FOUND);
        }
        self.power_on();

        let public_key = primitive(tags::ECC_PUBLIC_KEY, uncompressed(&self.card_key.public_key()))?;
        if !self.is_initialized() {
            return Ok(Some(public_key.to_vec().into()));
        }

        let key_uid = match &self.master {
            Some(master) => key_uid(&master.public_key()?).to_vec(),
            None => Vec::new(),
        };
        let free_slots = self.pairings.iter().filter(|slot| slot.is_none()).count() as u8;

        let info = constructed(
            tags::TEMPLATE_APPLICATION_INFO,
            vec![
                primitive(tags::INSTANCE_UID, self.instance_uid.to_vec())?,
                public_key,
                primitive(tags::OTHER, vec![APPLET_VERSION.major, APPLET_VERSION.minor])?,
                primitive(tags::OTHER, vec![free_slots])?,
                primitive(tags::KEY_UID, key_uid)?,
                primitive(tags::CAPABILITIES, vec![Capabilities::all().bits()])?,
            ],
        )?;
        Ok(Some(info.to_vec().into()))
    }

    fn init(&mut self, command: &Command) -> CardResult<Option<Bytes>> {
        if self.is_initialized() {
            return Err(common::INVALID_INSTRUCTION);
        }

        let data = data(command);
        let key_len = *data.first().ok_or(common::INCORRECT_DATA)? as usize;
        if data.len() < 1 + key_len + BLOCK_SIZE {
            return Err(common::INCORRECT_DATA);
        }
        let host_key =
            PublicKey::from_sec1_bytes(&data[1..1 + key_len]).map_err(|_| common::INCORRECT_DATA)?;
        let mut iv = Iv::default();
        iv.copy_from_slice(&data[1 + key_len..1 + key_len + BLOCK_SIZE]);

        let shared_secret = generate_ecdh_shared_secret(&self.card_key, &host_key);
        let mut key = SessionKey::default();
        key.copy_from_slice(shared_secret.raw_secret_bytes());
        let plain = decrypt_data(&data[1 + key_len + BLOCK_SIZE..], &key, &iv)
            .map_err(|_| common::INCORRECT_DATA)?;

        self.credentials = Some(Credentials::parse(&plain)?);
        self.pairings = Default::default();
        debug!("Simulated card initialized");
        Ok(None)
    }

    fn pair(&mut self, command: &Command) -> CardResult<Option<Bytes>> {
        if self.channel.is_some() {
            return Err(common::CONDITIONS_NOT_SATISFIED);
        }
        let token = self
            .credentials
            .as_ref()
            .map(|c| c.pairing_token)
            .ok_or(common::CONDITIONS_NOT_SATISFIED)?;
        let data: Challenge = data(command)
            .try_into()
            .map_err(|_| common::INCORRECT_DATA)?;

        match command.p1 {
            p1::PAIR_FIRST_STEP => {
                let card_challenge = random_challenge();
                self.pair_challenge = Some(card_challenge);

                let mut out = BytesMut::with_capacity(64);
                out.put_slice(&calculate_cryptogram(&token, &data));
                out.put_slice(&card_challenge);
                Ok(Some(out.freeze()))
            }
            p1::PAIR_FINAL_STEP => {
                let card_challenge = self
                    .pair_challenge
                    .take()
                    .ok_or(common::CONDITIONS_NOT_SATISFIED)?;
                if calculate_cryptogram(&token, &card_challenge) != data {
                    return Err(common::SECURITY_CONDITION_NOT_SATISFIED);
                }
                let index = self
                    .pairings
                    .iter()
                    .position(Option::is_none)
                    .ok_or(common::FILE_FULL)?;

                let salt = random_challenge();
                self.pairings[index] = Some(calculate_cryptogram(&token, &salt));
                debug!(index, "Simulated card paired");

                let mut out = BytesMut::with_capacity(33);
                out.put_u8(index as u8);
                out.put_slice(&salt);
                Ok(Some(out.freeze()))
            }
            _ => Err(common::INCORRECT_P1P2),
        }
    }

    fn open_secure_channel(&mut self, command: &Command) -> CardResult<Option<Bytes>> {
        self.close_channel();
        let pairing_key = self
            .pairings
            .get(command.p1 as usize)
            .copied()
            .flatten()
            .ok_or(common::INCORRECT_P1P2)?;
        let host_key =
            PublicKey::from_sec1_bytes(data(command)).map_err(|_| common::INCORRECT_DATA)?;

        let (channel, parameters) = CardChannel::open(&self.card_key, &host_key, &pairing_key);
        self.channel = Some(channel);
        Ok(Some(parameters))
    }

    fn mutually_authenticate(&mut self, command: &Command) -> CardResult<Option<Bytes>> {
        if data(command).len() != 32 {
            return Err(common::INCORRECT_DATA);
        }
        self.mutually_authenticated = true;
        Ok(Some(Bytes::copy_from_slice(&random_challenge())))
    }

    fn credentials(&mut self) -> CardResult<&mut Credentials> {
        self.credentials
            .as_mut()
            .ok_or(common::CONDITIONS_NOT_SATISFIED)
    }

    const fn require_pin(&self) -> CardResult<()> {
        if self.pin_verified {
            Ok(())
        } else {
            Err(common::SECURITY_CONDITION_NOT_SATISFIED)
        }
    }

    fn master(&self) -> CardResult<&MasterKey> {
        self.master.as_ref().ok_or(common::CONDITIONS_NOT_SATISFIED)
    }

    fn get_status(&mut self, command: &Command) -> CardResult<Option<Bytes>> {
        match command.p1 {
            p1::GET_STATUS_APPLICATION => {
                let key_initialized = if self.master.is_some() { 0xFF } else { 0x00 };
                let credentials = self.credentials()?;
                let status = constructed(
                    tags::TEMPLATE_APPLICATION_STATUS,
                    vec![
                        primitive(tags::OTHER, vec![credentials.pin_retries])?,
                        primitive(tags::OTHER, vec![credentials.puk_retries])?,
                        primitive(tags::KEY_INITIALIZED, vec![key_initialized])?,
                    ],
                )?;
                Ok(Some(status.to_vec().into()))
            }
            p1::GET_STATUS_KEY_PATH => {
                let mut out = BytesMut::with_capacity(self.current_path.len() * 4);
                for component in &self.current_path {
                    out.put_u32(*component);
                }
                Ok(Some(out.freeze()))
            }
            _ => Err(common::INCORRECT_P1P2),
        }
    }

    fn verify_pin(&mut self, command: &Command) -> CardResult<Option<Bytes>> {
        let pin = data(command);
        let credentials = self
            .credentials
            .as_mut()
            .ok_or(common::CONDITIONS_NOT_SATISFIED)?;

        if credentials.pin_retries == 0 {
            return Err(retries(0));
        }
        if pin == credentials.pin.as_slice() {
            credentials.pin_retries = credentials.max_pin_retries;
            self.pin_verified = true;
            Ok(None)
        } else {
            credentials.pin_retries -= 1;
            self.pin_verified = false;
            Err(retries(credentials.pin_retries))
        }
    }

    fn change_pin(&mut self, command: &Command) -> CardResult<Option<Bytes>> {
        self.require_pin()?;
        let value = data(command);
        let credentials = self.credentials()?;

        match (command.p1, value.len()) {
            (p1::CHANGE_PIN, PIN_LENGTH) => credentials.pin.copy_from_slice(value),
            (p1::CHANGE_PUK, PUK_LENGTH) => credentials.puk.copy_from_slice(value),
            (p1::CHANGE_PAIRING_SECRET, 32) => credentials.pairing_token.copy_from_slice(value),
            (p1::CHANGE_PIN | p1::CHANGE_PUK | p1::CHANGE_PAIRING_SECRET, _) => {
                return Err(common::INCORRECT_DATA);
            }
            _ => return Err(common::INCORRECT_P1P2),
        }
        Ok(None)
    }

    fn unblock_pin(&mut self, command: &Command) -> CardResult<Option<Bytes>> {
        let value = data(command);
        if value.len() != PUK_LENGTH + PIN_LENGTH {
            return Err(common::INCORRECT_DATA);
        }
        let (puk, new_pin) = value.split_at(PUK_LENGTH);
        let credentials = self
            .credentials
            .as_mut()
            .ok_or(common::CONDITIONS_NOT_SATISFIED)?;

        if credentials.pin_retries != 0 {
            return Err(common::CONDITIONS_NOT_SATISFIED);
        }
        if credentials.puk_retries == 0 {
            return Err(retries(0));
        }
        if puk != credentials.puk.as_slice() {
            credentials.puk_retries -= 1;
            return Err(retries(credentials.puk_retries));
        }

        credentials.pin.copy_from_slice(new_pin);
        credentials.pin_retries = credentials.max_pin_retries;
        credentials.puk_retries = credentials.max_puk_retries;
        self.pin_verified = true;
        Ok(None)
    }

    fn unpair(&mut self, command: &Command) -> CardResult<Option<Bytes>> {
        self.require_pin()?;
        let slot = self
            .pairings
            .get_mut(command.p1 as usize)
            .ok_or(common::INCORRECT_P1P2)?;
        *slot = None;
        Ok(None)
    }

    fn generate_mnemonic(&mut self, command: &Command) -> CardResult<Option<Bytes>> {
        if !(4..=8).contains(&command.p1) {
            return Err(common::INCORRECT_P1P2);
        }
        let mut entropy = vec![0u8; command.p1 as usize * 4];
        rand::rng().fill_bytes(&mut entropy);

        let mnemonic = Mnemonic::<English>::from_entropy(&entropy).map_err(|_| UNKNOWN_ERROR)?;
        entropy.zeroize();

        let mut out = BytesMut::with_capacity(mnemonic.len() * 2);
        for index in mnemonic.indices() {
            out.put_u16(*index);
        }
        Ok(Some(out.freeze()))
    }

    fn install_master(&mut self, master: MasterKey) -> CardResult<Option<Bytes>> {
        let uid = key_uid(&master.public_key()?);
        self.master = Some(master);
        self.current_path.clear();
        self.pinless_path = None;
        Ok(Some(Bytes::copy_from_slice(&uid)))
    }

    fn generate_key(&mut self) -> CardResult<Option<Bytes>> {
        self.require_pin()?;
        let secret = SecretKey::random(&mut rand_v8::thread_rng());
        let mut chain_code = [0u8; 32];
        rand::rng().fill_bytes(&mut chain_code);
        self.install_master(MasterKey::extended(&secret, chain_code))
    }

    fn load_key(&mut self, command: &Command) -> CardResult<Option<Bytes>> {
        self.require_pin()?;
        let master = match command.p1 {
            p1::LOAD_KEY_SEED => {
                let seed = data(command);
                if seed.len() != 64 {
                    return Err(common::INCORRECT_DATA);
                }
                MasterKey::Extended(
                    XPriv::root_from_seed(seed, None).map_err(|_| common::INCORRECT_DATA)?,
                )
            }
            p1::LOAD_KEY_ECC | p1::LOAD_KEY_EXTENDED_ECC => {
                let keypair = Keypair::try_from(data(command)).map_err(|_| common::INCORRECT_DATA)?;
                let secret = keypair.private_key.ok_or(common::INCORRECT_DATA)?;
                match (command.p1, keypair.chain_code) {
                    (p1::LOAD_KEY_EXTENDED_ECC, Some(chain_code)) => {
                        MasterKey::extended(&secret, chain_code)
                    }
                    (p1::LOAD_KEY_EXTENDED_ECC, None) => return Err(common::INCORRECT_DATA),
                    _ => MasterKey::Plain(secret),
                }
            }
            _ => return Err(common::INCORRECT_P1P2),
        };
        self.install_master(master)
    }

    fn remove_key(&mut self) -> CardResult<Option<Bytes>> {
        self.require_pin()?;
        self.master = None;
        self.current_path.clear();
        self.pinless_path = None;
        Ok(None)
    }

    fn resolve(&self, source: DeriveSource, relative: &[u32]) -> CardResult<Vec<u32>> {
        let mut path = match source {
            DeriveSource::Master => Vec::new(),
            DeriveSource::Current => self.current_path.clone(),
            DeriveSource::Parent => match self.current_path.split_last() {
                Some((_, parent)) => parent.to_vec(),
                None => return Err(common::CONDITIONS_NOT_SATISFIED),
            },
        };
        path.extend_from_slice(relative);
        if path.len() > MAX_PATH_DEPTH {
            return Err(common::INCORRECT_DATA);
        }
        Ok(path)
    }

    fn derive_key(&mut self, command: &Command) -> CardResult<Option<Bytes>> {
        self.require_pin()?;
        let source = DeriveSource::from_p1(command.p1).ok_or(common::INCORRECT_P1P2)?;
        let path = self.resolve(source, &read_path(data(command))?)?;
        self.master()?.derive(&path)?;
        self.current_path = path;
        Ok(None)
    }

    // Key selected by the low bits of EXPORT KEY / SIGN P1
    fn key_for(&mut self, selector: u8, path_data: &[u8]) -> CardResult<(Vec<u32>, DerivedKey)> {
        match selector & !p1::DERIVE_SOURCE_MASK {
            p1::KEY_CURRENT if path_data.is_empty() => {
                let key = self.master()?.derive(&self.current_path)?;
                Ok((self.current_path.clone(), key))
            }
            mode @ (p1::KEY_DERIVE | p1::KEY_DERIVE_AND_MAKE_CURRENT) => {
                let source = DeriveSource::from_p1(selector).ok_or(common::INCORRECT_P1P2)?;
                let path = self.resolve(source, &read_path(path_data)?)?;
                let key = self.master()?.derive(&path)?;
                if mode == p1::KEY_DERIVE_AND_MAKE_CURRENT {
                    self.current_path = path.clone();
                }
                Ok((path, key))
            }
            p1::KEY_CURRENT => Err(common::INCORRECT_DATA),
            _ => Err(common::INCORRECT_P1P2),
        }
    }

    fn export_key(&mut self, command: &Command) -> CardResult<Option<Bytes>> {
        self.require_pin()?;
        if command.p2 > 0x02 {
            return Err(common::INCORRECT_P1P2);
        }
        let (path, key) = self.key_for(command.p1, data(command))?;

        let public_key = Some(key.secret.public_key());
        let keypair = match command.p2 {
            0x00 if path.starts_with(&EIP1581_PREFIX) => Keypair::with_keypair(key.secret),
            0x00 => return Err(common::CONDITIONS_NOT_SATISFIED),
            0x01 => Keypair {
                public_key,
                ..Default::default()
            },
            _ => Keypair {
                public_key,
                chain_code: Some(key.chain_code.ok_or(common::CONDITIONS_NOT_SATISFIED)?),
                private_key: None,
            },
        };
        let encoded = keypair.to_bytes().map_err(|_| UNKNOWN_ERROR)?;
        Ok(Some(encoded.into()))
    }

    fn sign(&mut self, command: &Command) -> CardResult<Option<Bytes>> {
        let data = data(command);
        if data.len() < 32 {
            return Err(common::INCORRECT_DATA);
        }
        let (hash, path_data) = data.split_at(32);

        let secret = if command.p1 & !p1::DERIVE_SOURCE_MASK == p1::SIGN_PINLESS {
            let path = self
                .pinless_path
                .as_deref()
                .ok_or(common::REFERENCED_DATA_NOT_FOUND)?;
            if !path_data.is_empty() {
                return Err(common::INCORRECT_DATA);
            }
            self.master()?.derive(path)?.secret
        } else {
            self.require_pin()?;
            self.key_for(command.p1, path_data)?.1.secret
        };

        let (signature, _) = SigningKey::from(&secret)
            .sign_prehash_recoverable(hash)
            .map_err(|_| UNKNOWN_ERROR)?;
        let (r, s) = signature.split_bytes();

        let template = constructed(
            tags::TEMPLATE_SIGNATURE,
            vec![
                primitive(tags::ECC_PUBLIC_KEY, uncompressed(&secret.public_key()))?,
                constructed(
                    tags::ECDSA_SIGNATURE,
                    vec![
                        primitive(tags::OTHER, der_integer(&r))?,
                        primitive(tags::OTHER, der_integer(&s))?,
                    ],
                )?,
            ],
        )?;
        Ok(Some(template.to_vec().into()))
    }

    fn identify_card(&self, command: &Command) -> CardResult<Option<Bytes>> {
        let challenge = data(command);
        if challenge.len() != 32 {
            return Err(common::INCORRECT_DATA);
        }

        let (signature, _) = SigningKey::from(&self.identity.key)
            .sign_prehash_recoverable(challenge)
            .map_err(|_| UNKNOWN_ERROR)?;
        let (r, s) = signature.split_bytes();

        let template = constructed(
            tags::TEMPLATE_SIGNATURE,
            vec![
                primitive(tags::CERTIFICATE, self.identity.certificate()?)?,
                constructed(
                    tags::ECDSA_SIGNATURE,
                    vec![
                        primitive(tags::OTHER, der_integer(&r))?,
                        primitive(tags::OTHER, der_integer(&s))?,
                    ],
                )?,
            ],
        )?;
        Ok(Some(template.to_vec().into()))
    }

    fn set_pinless_path(&mut self, command: &Command) -> CardResult<Option<Bytes>> {
        self.require_pin()?;
        let path = read_path(data(command))?;
        self.pinless_path = (!path.is_empty()).then_some(path);
        Ok(None)
    }

    fn store_data(&mut self, command: &Command) -> CardResult<Option<Bytes>> {
        self.require_pin()?;
        let record = self
            .records
            .get_mut(command.p1 as usize)
            .ok_or(common::INCORRECT_P1P2)?;
        *record = Bytes::copy_from_slice(data(command));
        Ok(None)
    }

    fn get_data(&mut self, command: &Command) -> CardResult<Option<Bytes>> {
        let record = self
            .records
            .get(command.p1 as usize)
            .ok_or(common::INCORRECT_P1P2)?;
        Ok((!record.is_empty()).then(|| record.clone()))
    }

    fn factory_reset(&mut self, command: &Command) -> CardResult<Option<Bytes>> {
        if (command.p1, command.p2) != (p1::FACTORY_RESET, p1::FACTORY_RESET_P2) {
            return Err(common::INCORRECT_P1P2);
        }
        let identity = self.identity.clone();
        *self = Self::new();
        self.identity = identity;
        debug!("Simulated card factory reset");
        Ok(None)
    }
}

fn data(command: &Command) -> &[u8] {
    command.data.as_deref().unwrap_or_default()
}

fn to_response(result: CardResult<Option<Bytes>>) -> Response {
    match result {
        Ok(payload) => Response::success(payload),
        Err(status) => Response::error(status),
    }
}

fn respond(result: CardResult<Option<Bytes>>) -> Bytes {
    to_response(result).to_bytes()
}

fn read_path(bytes: &[u8]) -> CardResult<Vec<u32>> {
    if bytes.len() % 4 != 0 || bytes.len() / 4 > MAX_PATH_DEPTH {
        return Err(common::INCORRECT_DATA);
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn uncompressed(key: &PublicKey) -> Vec<u8> {
    key.to_encoded_point(false).as_bytes().to_vec()
}

// DER INTEGER body: no leading zeros, sign byte when the top bit is set
fn der_integer(scalar: &[u8]) -> Vec<u8> {
    let first = scalar
        .iter()
        .position(|&b| b != 0)
        .unwrap_or(scalar.len() - 1);
    let digits = &scalar[first..];

    let mut out = Vec::with_capacity(digits.len() + 1);
    if digits[0] & 0x80 != 0 {
        out.push(0x00);
    }
    out.extend_from_slice(digits);
    out
}

fn primitive(tag: u8, value: Vec<u8>) -> CardResult<Tlv> {
    tlv(tag, Value::Primitive(value))
}

fn constructed(tag: u8, children: Vec<Tlv>) -> CardResult<Tlv> {
    tlv(tag, Value::Constructed(children))
}

fn tlv(tag: u8, value: Value) -> CardResult<Tlv> {
    let tag = Tag::try_from(tag).map_err(|_| UNKNOWN_ERROR)?;
    Tlv::new(tag, value).map_err(|_| UNKNOWN_ERROR)
}
