//! VAPID (RFC 8292) request signing.

use super::crypto::decode_b64;
use crate::config::tuning::VAPID_TOKEN_HOURS;
use crate::errors::{ApiError, ApiResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use serde::Serialize;
use url::Url;

const JWT_HEADER: &str = r#"{"typ":"JWT","alg":"ES256"}"#;

#[derive(Serialize)]
struct Claims<'a> {
    aud: &'a str,
    exp: i64,
    sub: &'a str,
}

/// Origin of a push endpoint, the `aud` claim of the token.
pub fn audience(endpoint: &str) -> ApiResult<String> {
    let url = Url::parse(endpoint)
        .map_err(|e| ApiError::InvalidInput(format!("bad endpoint {endpoint}: {e}")))?;
    match url.scheme() {
        "https" | "http" => Ok(url.origin().ascii_serialization()),
        other => Err(ApiError::InvalidInput(format!("unsupported endpoint scheme {other}"))),
    }
}

pub struct VapidSigner {
    key: SigningKey,
    public_key: String,
    subject: String,
}

impl VapidSigner {
    /// `private_key` is the base64url-encoded 32-byte P-256 scalar.
    pub fn from_base64(private_key: &str, subject: &str) -> ApiResult<Self> {
        let bytes = decode_b64(private_key)
            .map_err(|_| ApiError::ConfigMissing("VAPID_PRIVATE_KEY is not base64url".into()))?;
        let key = SigningKey::from_slice(&bytes)
            .map_err(|_| ApiError::ConfigMissing("VAPID_PRIVATE_KEY is not a P-256 key".into()))?;
        let public_key =
            URL_SAFE_NO_PAD.encode(key.verifying_key().to_encoded_point(false).as_bytes());
        Ok(Self {
            key,
            public_key,
            subject: subject.to_string(),
        })
    }

    /// Application server key, as handed to `pushManager.subscribe`.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn token(&self, endpoint: &str, now: DateTime<Utc>) -> ApiResult<String> {
        let aud = audience(endpoint)?;
        let claims = Claims {
            aud: &aud,
            exp: (now + Duration::hours(VAPID_TOKEN_HOURS)).timestamp(),
            sub: &self.subject,
        };
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(JWT_HEADER),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?)
        );
        let signature: Signature = self.key.sign(signing_input.as_bytes());
        Ok(format!(
            "{signing_input}.{}",
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        ))
    }

    /// Value of the `Authorization` header for a request to `endpoint`.
    pub fn authorization(&self, endpoint: &str, now: DateTime<Utc>) -> ApiResult<String> {
        Ok(format!(
            "vapid t={}, k={}",
            self.token(endpoint, now)?,
            self.public_key
        ))
    }
}
