//! Web Push payload encryption (RFC 8291, `aes128gcm` content coding).

use crate::domain::SubscriptionKeys;
use crate::errors::{ApiError, ApiResult};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hkdf::Hkdf;
use p256::{ecdh::EphemeralSecret, elliptic_curve::sec1::ToEncodedPoint, PublicKey};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;

pub const RECORD_SIZE: u32 = 4096;
pub const SALT_LEN: usize = 16;
pub const PUBLIC_KEY_LEN: usize = 65;
pub const HEADER_LEN: usize = SALT_LEN + 4 + 1 + PUBLIC_KEY_LEN;
const TAG_LEN: usize = 16;
const AUTH_SECRET_LEN: usize = 16;
/// Padding delimiter for the final (and only) record.
const LAST_RECORD: u8 = 0x02;

const KEY_INFO: &[u8] = b"WebPush: info\0";
const CEK_INFO: &[u8] = b"Content-Encoding: aes128gcm\0";
const NONCE_INFO: &[u8] = b"Content-Encoding: nonce\0";

/// Decode browser-supplied base64url, tolerating padding and the standard alphabet.
pub fn decode_b64(input: &str) -> ApiResult<Vec<u8>> {
    let normalized: String = input
        .trim()
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    URL_SAFE_NO_PAD
        .decode(normalized)
        .map_err(|e| ApiError::InvalidInput(format!("bad base64url: {e}")))
}

/// Subscriber key material from `PushSubscription.getKey()`.
#[derive(Debug, Clone)]
pub struct SubscriberKeys {
    public: PublicKey,
    public_bytes: Vec<u8>,
    auth: Vec<u8>,
}

impl SubscriberKeys {
    pub fn from_subscription(keys: &SubscriptionKeys) -> ApiResult<Self> {
        let public_bytes = decode_b64(&keys.p256dh)?;
        let public = PublicKey::from_sec1_bytes(&public_bytes)
            .map_err(|_| ApiError::InvalidInput("p256dh is not a P-256 point".into()))?;
        if public_bytes.len() != PUBLIC_KEY_LEN {
            return Err(ApiError::InvalidInput("p256dh must be an uncompressed point".into()));
        }
        let auth = decode_b64(&keys.auth)?;
        if auth.len() != AUTH_SECRET_LEN {
            return Err(ApiError::InvalidInput(format!(
                "auth secret must be {AUTH_SECRET_LEN} bytes, got {}",
                auth.len()
            )));
        }
        Ok(Self {
            public,
            public_bytes,
            auth,
        })
    }
}

fn crypto_err(e: impl std::fmt::Display) -> ApiError {
    ApiError::Crypto(e.to_string())
}

/// Content-encryption key and nonce for one message.
///
/// `ua_public` is the subscriber key, `as_public` the sender's ephemeral key;
/// both are bound into the key derivation.
pub(crate) fn derive_key_and_nonce(
    ecdh_secret: &[u8],
    auth: &[u8],
    ua_public: &[u8],
    as_public: &[u8],
    salt: &[u8],
) -> ApiResult<([u8; 16], [u8; 12])> {
    let mut key_info = Vec::with_capacity(KEY_INFO.len() + ua_public.len() + as_public.len());
    key_info.extend_from_slice(KEY_INFO);
    key_info.extend_from_slice(ua_public);
    key_info.extend_from_slice(as_public);

    let mut ikm = [0u8; 32];
    Hkdf::<Sha256>::new(Some(auth), ecdh_secret)
        .expand(&key_info, &mut ikm)
        .map_err(crypto_err)?;

    let prk = Hkdf::<Sha256>::new(Some(salt), &ikm);
    let mut cek = [0u8; 16];
    prk.expand(CEK_INFO, &mut cek).map_err(crypto_err)?;
    let mut nonce = [0u8; 12];
    prk.expand(NONCE_INFO, &mut nonce).map_err(crypto_err)?;
    Ok((cek, nonce))
}

/// Encrypt `plaintext` for one subscriber as a single aes128gcm record:
/// `salt ‖ rs ‖ idlen ‖ ephemeral public key ‖ ciphertext`.
pub fn encrypt(plaintext: &[u8], keys: &SubscriberKeys) -> ApiResult<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let ephemeral = EphemeralSecret::random(&mut OsRng);
    encrypt_with(plaintext, keys, &salt, &ephemeral)
}

fn encrypt_with(
    plaintext: &[u8],
    keys: &SubscriberKeys,
    salt: &[u8; SALT_LEN],
    ephemeral: &EphemeralSecret,
) -> ApiResult<Vec<u8>> {
    if plaintext.len() + 1 + TAG_LEN > RECORD_SIZE as usize {
        return Err(ApiError::InvalidInput(format!(
            "payload of {} bytes does not fit one record",
            plaintext.len()
        )));
    }

    let as_public = ephemeral.public_key().to_encoded_point(false);
    let shared = ephemeral.diffie_hellman(&keys.public);
    let (cek, nonce) = derive_key_and_nonce(
        shared.raw_secret_bytes().as_slice(),
        &keys.auth,
        &keys.public_bytes,
        as_public.as_bytes(),
        salt,
    )?;

    let mut record = Vec::with_capacity(plaintext.len() + 1);
    record.extend_from_slice(plaintext);
    record.push(LAST_RECORD);

    let cipher = Aes128Gcm::new_from_slice(&cek).map_err(crypto_err)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), record.as_slice())
        .map_err(crypto_err)?;

    let mut body = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    body.extend_from_slice(salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(PUBLIC_KEY_LEN as u8);
    body.extend_from_slice(as_public.as_bytes());
    body.extend_from_slice(&ciphertext);
    Ok(body)
}
