//! Error type for the certificate-authority client.
//!
//! `AcmeError` is `Clone` so that one registration result can be handed to
//! every caller waiting on the same account key.

use thiserror::Error;

/// Problem type suffix the authority uses when a `replaces` hint names a
/// certificate that has already been renewed.
pub const ALREADY_REPLACED: &str = "alreadyReplaced";

const BAD_NONCE: &str = "urn:ietf:params:acme:error:badNonce";

#[derive(Debug, Clone, Error)]
pub enum AcmeError {
    /// Invalid or missing configuration; caller error, never retried.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The authority requires external account binding credentials.
    #[error("ca '{ca}' requires external account binding (eab_kid and eab_hmac_key)")]
    EabRequired { ca: String },

    #[error("account registration failed: {0}")]
    Registration(String),

    /// The certificate named by the `replaces` hint was already renewed.
    #[error("ari conflict: {0}")]
    AriConflict(String),

    /// An RFC 8555 problem document returned by the authority.
    #[error("acme problem {kind} (status {status}): {detail}")]
    Problem {
        kind: String,
        detail: String,
        status: u16,
    },

    #[error("challenge failed: {0}")]
    Challenge(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// The caller's cancellation signal fired before the authority answered.
    #[error("operation cancelled")]
    Cancelled,
}

impl AcmeError {
    pub fn is_ari_conflict(&self) -> bool {
        matches!(self, Self::AriConflict(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub(crate) fn is_bad_nonce(&self) -> bool {
        matches!(self, Self::Problem { kind, .. } if kind == BAD_NONCE)
    }

    /// Map a problem document to the matching variant.
    pub(crate) fn from_problem(kind: String, detail: String, status: u16) -> Self {
        if kind.ends_with(ALREADY_REPLACED) {
            Self::AriConflict(detail)
        } else {
            Self::Problem { kind, detail, status }
        }
    }
}

impl From<reqwest::Error> for AcmeError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<db::DbError> for AcmeError {
    fn from(err: db::DbError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<rcgen::Error> for AcmeError {
    fn from(err: rcgen::Error) -> Self {
        Self::Crypto(err.to_string())
    }
}

impl From<serde_json::Error> for AcmeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Http(format!("invalid json: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn already_replaced_problem_maps_to_ari_conflict() {
        let err = AcmeError::from_problem(
            "urn:ietf:params:acme:error:alreadyReplaced".into(),
            "certificate already replaced".into(),
            409,
        );
        assert!(err.is_ari_conflict());

        let other = AcmeError::from_problem(
            "urn:ietf:params:acme:error:rejectedIdentifier".into(),
            "nope".into(),
            400,
        );
        assert_matches!(other, AcmeError::Problem { status: 400, .. });
    }
}
