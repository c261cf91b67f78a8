//! Common test utilities for openfido-ctap integration tests
//!
//! Shared platform doubles, frame builders and a platform-side PIN client.

#![allow(dead_code)]

use openfido_crypto::digest;
use openfido_crypto::ecdh::KeyPair;
use openfido_ctap::cbor::{self, Decoder, Encoder};
use openfido_ctap::pin_token::SharedSecret;
use openfido_ctap::storage::layout::PARTITION_SIZE;
use openfido_ctap::types::{CoseAlgorithm, decode_cose_key, encode_cose_key};
use openfido_ctap::{
    Authenticator, AuthenticatorConfig, CommandDispatcher, LedState, Platform, PinProtocol,
    RamFlash,
};

pub const RP_ID: &str = "example.com";
pub const CLIENT_DATA_HASH: [u8; 32] = [0x42; 32];
pub const PIN: &[u8] = b"123456";

pub const MAKE_CREDENTIAL: u8 = 0x01;
pub const GET_ASSERTION: u8 = 0x02;
pub const GET_INFO: u8 = 0x04;
pub const CLIENT_PIN: u8 = 0x06;
pub const RESET: u8 = 0x07;
pub const GET_NEXT_ASSERTION: u8 = 0x08;
pub const CREDENTIAL_MANAGEMENT: u8 = 0x0A;

/// Button that answers every wait with `press` and records LED changes
#[derive(Debug, Default)]
pub struct ScriptedPlatform {
    pub press: bool,
    pub waits: usize,
    pub leds: Vec<LedState>,
}

impl ScriptedPlatform {
    pub fn pressing() -> Self {
        Self {
            press: true,
            ..Self::default()
        }
    }

    pub fn idle() -> Self {
        Self::default()
    }
}

impl Platform for ScriptedPlatform {
    fn button_wait_press(&mut self, _timeout_ms: u32) -> bool {
        self.waits += 1;
        self.press
    }

    fn set_led(&mut self, state: LedState) {
        self.leds.push(state);
    }
}

pub type TestDispatcher = CommandDispatcher<RamFlash, ScriptedPlatform>;

pub fn blank_flash() -> RamFlash {
    RamFlash::new(PARTITION_SIZE as usize)
}

pub fn dispatcher_on(flash: RamFlash, platform: ScriptedPlatform) -> TestDispatcher {
    let auth = Authenticator::new(AuthenticatorConfig::default(), flash, platform).unwrap();
    CommandDispatcher::new(auth)
}

pub fn dispatcher() -> TestDispatcher {
    dispatcher_on(blank_flash(), ScriptedPlatform::pressing())
}

/// Simulate a power cycle, keeping the flash contents
pub fn power_cycle(dispatcher: TestDispatcher, platform: ScriptedPlatform) -> TestDispatcher {
    let flash = dispatcher.into_authenticator().into_flash();
    dispatcher_on(flash, platform)
}

/// Encode a CBOR body
pub fn encode<W>(write: W) -> Vec<u8>
where
    W: FnOnce(&mut Encoder<'_>) -> cbor::Result<()>,
{
    let mut buf = [0u8; 2048];
    let mut enc = Encoder::new(&mut buf);
    write(&mut enc).unwrap();
    enc.as_bytes().to_vec()
}

/// `command ‖ body`
pub fn frame(command: u8, body: &[u8]) -> Vec<u8> {
    let mut frame = vec![command];
    frame.extend_from_slice(body);
    frame
}

/// Send a frame and split the status byte off the response
pub fn send(dispatcher: &mut TestDispatcher, command: u8, body: &[u8]) -> (u8, Vec<u8>) {
    let response = dispatcher.process(&frame(command, body));
    (response[0], response[1..].to_vec())
}

/// pinUvAuthParam and protocol attached to a request
pub struct PinAuth<'a> {
    pub param: &'a [u8],
    pub protocol: u64,
}

pub fn make_credential_request(rk: bool, user_id: &[u8], pin: Option<PinAuth<'_>>) -> Vec<u8> {
    encode(|e| {
        e.map(5 + 2 * usize::from(pin.is_some()))?;
        e.unsigned(1)?.bytes(&CLIENT_DATA_HASH)?;
        e.unsigned(2)?.map(1)?.text("id")?.text(RP_ID)?;
        e.unsigned(3)?
            .map(2)?
            .text("id")?
            .bytes(user_id)?
            .text("name")?
            .text("alice@example.com")?;
        e.unsigned(4)?
            .array(1)?
            .map(2)?
            .text("alg")?
            .int(-7)?
            .text("type")?
            .text("public-key")?;
        e.unsigned(7)?.map(1)?.text("rk")?.bool(rk)?;
        if let Some(pin) = pin {
            e.unsigned(8)?.bytes(pin.param)?;
            e.unsigned(9)?.unsigned(pin.protocol)?;
        }
        Ok(())
    })
}

pub fn get_assertion_request(allow: &[&[u8]], pin: Option<PinAuth<'_>>) -> Vec<u8> {
    encode(|e| {
        e.map(2 + usize::from(!allow.is_empty()) + 2 * usize::from(pin.is_some()))?;
        e.unsigned(1)?.text(RP_ID)?;
        e.unsigned(2)?.bytes(&CLIENT_DATA_HASH)?;
        if !allow.is_empty() {
            e.unsigned(3)?.array(allow.len())?;
            for id in allow {
                e.map(2)?.text("id")?.bytes(id)?.text("type")?.text("public-key")?;
            }
        }
        if let Some(pin) = pin {
            e.unsigned(6)?.bytes(pin.param)?;
            e.unsigned(7)?.unsigned(pin.protocol)?;
        }
        Ok(())
    })
}

/// Fields of an attestation object or assertion that the tests look at
#[derive(Debug)]
pub struct Signed {
    pub credential_id: Option<Vec<u8>>,
    pub auth_data: Vec<u8>,
    pub signature: Vec<u8>,
    pub user_id: Option<Vec<u8>>,
    pub number_of_credentials: Option<u64>,
}

impl Signed {
    pub fn flags(&self) -> u8 {
        self.auth_data[32]
    }

    pub fn sign_count(&self) -> u32 {
        u32::from_be_bytes(self.auth_data[33..37].try_into().unwrap())
    }

    /// Credential ID embedded in attested credential data
    pub fn attested_id(&self) -> Vec<u8> {
        let len = u16::from_be_bytes([self.auth_data[53], self.auth_data[54]]) as usize;
        self.auth_data[55..55 + len].to_vec()
    }
}

pub fn decode_make_credential(response: &[u8]) -> Signed {
    let mut dec = Decoder::new(response);
    assert_eq!(dec.map().unwrap(), 3);
    assert_eq!(dec.unsigned().unwrap(), 1);
    assert_eq!(dec.text().unwrap(), "packed");
    assert_eq!(dec.unsigned().unwrap(), 2);
    let auth_data = dec.bytes().unwrap().to_vec();
    assert_eq!(dec.unsigned().unwrap(), 3);
    let mut signature = Vec::new();
    for _ in 0..dec.map().unwrap() {
        match dec.text().unwrap() {
            "sig" => signature = dec.bytes().unwrap().to_vec(),
            _ => dec.skip().unwrap(),
        }
    }
    Signed {
        credential_id: None,
        auth_data,
        signature,
        user_id: None,
        number_of_credentials: None,
    }
}

pub fn decode_assertion(response: &[u8]) -> Signed {
    let mut dec = Decoder::new(response);
    let mut signed = Signed {
        credential_id: None,
        auth_data: Vec::new(),
        signature: Vec::new(),
        user_id: None,
        number_of_credentials: None,
    };
    for _ in 0..dec.map().unwrap() {
        match dec.unsigned().unwrap() {
            1 => {
                for _ in 0..dec.map().unwrap() {
                    match dec.text().unwrap() {
                        "id" => signed.credential_id = Some(dec.bytes().unwrap().to_vec()),
                        _ => dec.skip().unwrap(),
                    }
                }
            }
            2 => signed.auth_data = dec.bytes().unwrap().to_vec(),
            3 => signed.signature = dec.bytes().unwrap().to_vec(),
            4 => {
                for _ in 0..dec.map().unwrap() {
                    match dec.text().unwrap() {
                        "id" => signed.user_id = Some(dec.bytes().unwrap().to_vec()),
                        _ => dec.skip().unwrap(),
                    }
                }
            }
            5 => signed.number_of_credentials = Some(dec.unsigned().unwrap()),
            _ => dec.skip().unwrap(),
        }
    }
    signed
}

/// Platform side of the ClientPIN key agreement
pub struct PinClient {
    key: KeyPair,
    secret: SharedSecret,
}

impl PinClient {
    /// Run getKeyAgreement and derive the shared secret
    pub fn connect(dispatcher: &mut TestDispatcher, protocol: PinProtocol) -> Self {
        let body = encode(|e| {
            e.map(2)?.unsigned(1)?.unsigned(protocol.to_u64())?.unsigned(2)?.unsigned(2)?;
            Ok(())
        });
        let (status, response) = send(dispatcher, CLIENT_PIN, &body);
        assert_eq!(status, 0x00);

        let mut dec = Decoder::new(&response);
        assert_eq!(dec.map().unwrap(), 1);
        assert_eq!(dec.unsigned().unwrap(), 1);
        let (x, y) = decode_cose_key(&mut dec).unwrap();

        let key = KeyPair::generate();
        let z = key.shared_secret(&x, &y).unwrap();
        let secret = SharedSecret::derive(protocol, &z).unwrap();
        Self { key, secret }
    }

    pub fn protocol(&self) -> u64 {
        self.secret.protocol().to_u64()
    }

    fn request(
        &self,
        sub_command: u64,
        extra: &[(u64, &[u8])],
        tail: &[(u64, u64)],
        rp_id: Option<&str>,
    ) -> Vec<u8> {
        let (x, y) = self.key.public_key_cose();
        encode(|e| {
            e.map(3 + extra.len() + tail.len() + usize::from(rp_id.is_some()))?;
            e.unsigned(1)?.unsigned(self.protocol())?;
            e.unsigned(2)?.unsigned(sub_command)?;
            e.unsigned(3)?;
            encode_cose_key(e, &x, &y, CoseAlgorithm::EcdhEsHkdf256)?;
            for (key, value) in extra {
                e.unsigned(*key)?.bytes(value)?;
            }
            for (key, value) in tail {
                e.unsigned(*key)?.unsigned(*value)?;
            }
            if let Some(rp_id) = rp_id {
                e.unsigned(0x0A)?.text(rp_id)?;
            }
            Ok(())
        })
    }

    pub fn set_pin(&self, pin: &[u8]) -> Vec<u8> {
        let mut padded = [0u8; 64];
        padded[..pin.len()].copy_from_slice(pin);
        let new_pin_enc = self.secret.encrypt(&padded).unwrap();
        let pin_auth = self.secret.authenticate(&new_pin_enc).unwrap();
        self.request(3, &[(4, &pin_auth), (5, &new_pin_enc)], &[], None)
    }

    pub fn token_request(&self, pin: &[u8], permissions: u64, rp_id: Option<&str>) -> Vec<u8> {
        let pin_hash_enc = self.secret.encrypt(&digest::sha256(pin)[..16]).unwrap();
        self.request(9, &[(6, &pin_hash_enc)], &[(9, permissions)], rp_id)
    }

    /// hmac-secret getAssertion input for one or two 32-byte salts
    pub fn hmac_secret_input(&self, salts: &[u8]) -> Vec<u8> {
        let (x, y) = self.key.public_key_cose();
        let salt_enc = self.secret.encrypt(salts).unwrap();
        let salt_auth = self.secret.authenticate(&salt_enc).unwrap();
        encode(|e| {
            e.map(4)?.unsigned(1)?;
            encode_cose_key(e, &x, &y, CoseAlgorithm::EcdhEsHkdf256)?;
            e.unsigned(2)?.bytes(&salt_enc)?;
            e.unsigned(3)?.bytes(&salt_auth)?;
            e.unsigned(4)?.unsigned(self.protocol())?;
            Ok(())
        })
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Vec<u8> {
        self.secret.decrypt(ciphertext).unwrap().to_vec()
    }

    pub fn decrypt_token(&self, response: &[u8]) -> Vec<u8> {
        let mut dec = Decoder::new(response);
        assert_eq!(dec.map().unwrap(), 1);
        assert_eq!(dec.unsigned().unwrap(), 2);
        self.secret.decrypt(dec.bytes().unwrap()).unwrap().to_vec()
    }
}

/// Set `PIN` and return a token carrying `permissions`
pub fn pin_token(
    dispatcher: &mut TestDispatcher,
    permissions: u64,
    rp_id: Option<&str>,
) -> Vec<u8> {
    let client = PinClient::connect(dispatcher, PinProtocol::Two);
    if !dispatcher.authenticator().is_pin_set() {
        let (status, _) = send(dispatcher, CLIENT_PIN, &client.set_pin(PIN));
        assert_eq!(status, 0x00);
    }
    let request = client.token_request(PIN, permissions, rp_id);
    let (status, response) = send(dispatcher, CLIENT_PIN, &request);
    assert_eq!(status, 0x00);
    client.decrypt_token(&response)
}

pub fn authenticate(token: &[u8], message: &[u8]) -> Vec<u8> {
    PinProtocol::Two.authenticate(token, message).unwrap()
}
