//! JSON Web Signature helpers for the ACME wire protocol.
//!
//! Account keys are P-256; requests are signed ES256 with the raw `r || s`
//! signature encoding.  External account binding uses HS256.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair as _, ECDSA_P256_SHA256_FIXED_SIGNING};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::AcmeError;

pub(crate) fn b64(bytes: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// An ACME account key.
pub struct AccountKey {
    pem: String,
    key: EcdsaKeyPair,
    rng: SystemRandom,
}

impl std::fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountKey").finish_non_exhaustive()
    }
}

impl AccountKey {
    /// Generate a fresh P-256 key.
    pub fn generate() -> Result<Self, AcmeError> {
        let pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?;
        Self::from_pem(&pair.serialize_pem())
    }

    /// Load a PKCS#8 PEM key.
    pub fn from_pem(pem: &str) -> Result<Self, AcmeError> {
        let pair = rcgen::KeyPair::from_pem(pem)?;
        let rng = SystemRandom::new();
        let key = EcdsaKeyPair::from_pkcs8(
            &ECDSA_P256_SHA256_FIXED_SIGNING,
            &pair.serialize_der(),
            &rng,
        )
        .map_err(|e| AcmeError::Crypto(format!("account key must be P-256: {e}")))?;

        Ok(Self {
            pem: pair.serialize_pem(),
            key,
            rng,
        })
    }

    pub fn to_pem(&self) -> &str {
        &self.pem
    }

    /// Public key as a JWK.
    pub fn jwk(&self) -> Value {
        let (x, y) = self.coordinates();
        json!({
            "crv": "P-256",
            "kty": "EC",
            "x": b64(x),
            "y": b64(y),
        })
    }

    /// RFC 7638 thumbprint of the public key.
    pub fn thumbprint(&self) -> String {
        let (x, y) = self.coordinates();
        // Members in lexicographic order, no whitespace.
        let canonical = format!(
            r#"{{"crv":"P-256","kty":"EC","x":"{}","y":"{}"}}"#,
            b64(x),
            b64(y)
        );
        b64(Sha256::digest(canonical.as_bytes()))
    }

    /// `token.thumbprint`, the value a challenge must serve.
    pub fn key_authorization(&self, token: &str) -> String {
        format!("{token}.{}", self.thumbprint())
    }

    fn coordinates(&self) -> (&[u8], &[u8]) {
        // Uncompressed point: 0x04 || x || y
        let point = self.key.public_key().as_ref();
        (&point[1..33], &point[33..65])
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, AcmeError> {
        self.key
            .sign(&self.rng, message)
            .map(|s| s.as_ref().to_vec())
            .map_err(|_| AcmeError::Crypto("signing failed".into()))
    }

    /// Build a flattened JWS.  `kid` selects the account URL header instead of
    /// the embedded JWK; `payload` of `None` produces a POST-as-GET body.
    pub fn sign_request(
        &self,
        url: &str,
        nonce: &str,
        kid: Option<&str>,
        payload: Option<&Value>,
    ) -> Result<Value, AcmeError> {
        let mut protected = json!({
            "alg": "ES256",
            "nonce": nonce,
            "url": url,
        });
        match kid {
            Some(kid) => protected["kid"] = json!(kid),
            None => protected["jwk"] = self.jwk(),
        }

        let protected = b64(serde_json::to_vec(&protected)?);
        let payload = match payload {
            Some(value) => b64(serde_json::to_vec(value)?),
            None => String::new(),
        };
        let signature = self.sign(format!("{protected}.{payload}").as_bytes())?;

        Ok(json!({
            "protected": protected,
            "payload": payload,
            "signature": b64(signature),
        }))
    }

    /// External account binding object for a new-account request.
    pub fn eab_binding(
        &self,
        kid: &str,
        hmac_key: &str,
        new_account_url: &str,
    ) -> Result<Value, AcmeError> {
        let key = normalize_eab_hmac_key(hmac_key)?;

        let protected = b64(serde_json::to_vec(&json!({
            "alg": "HS256",
            "kid": kid,
            "url": new_account_url,
        }))?);
        let payload = b64(serde_json::to_vec(&self.jwk())?);

        let mut mac = Hmac::<Sha256>::new_from_slice(&key)
            .map_err(|e| AcmeError::Config(format!("invalid eab hmac key: {e}")))?;
        mac.update(format!("{protected}.{payload}").as_bytes());
        let signature = mac.finalize().into_bytes();

        Ok(json!({
            "protected": protected,
            "payload": payload,
            "signature": b64(signature),
        }))
    }
}

/// Decode an EAB HMAC key.  Authorities hand these out in assorted base64
/// flavours; padding is stripped and the standard alphabet mapped to the
/// URL-safe one before decoding.
pub fn normalize_eab_hmac_key(raw: &str) -> Result<Vec<u8>, AcmeError> {
    let cleaned: String = raw
        .trim()
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();

    if cleaned.is_empty() {
        return Err(AcmeError::Config("eab hmac key is empty".into()));
    }

    URL_SAFE_NO_PAD
        .decode(cleaned.as_bytes())
        .map_err(|e| AcmeError::Config(format!("eab hmac key is not base64url: {e}")))
}
