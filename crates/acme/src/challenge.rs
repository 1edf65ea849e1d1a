//! Challenge providers: the pluggable boundary through which dns-01 and
//! http-01 proofs are published.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::jws::b64;
use crate::AcmeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeType {
    #[serde(rename = "dns-01")]
    Dns01,
    #[serde(rename = "http-01")]
    Http01,
}

impl ChallengeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dns01 => "dns-01",
            Self::Http01 => "http-01",
        }
    }
}

impl std::fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait ChallengeProvider: Send + Sync {
    async fn present(&self, domain: &str, token: &str, key_auth: &str) -> Result<(), AcmeError>;

    async fn clean_up(&self, domain: &str, token: &str, key_auth: &str) -> Result<(), AcmeError>;

    /// Overrides the configured dns propagation timeout when set.
    fn propagation_timeout(&self) -> Option<Duration> {
        None
    }
}

/// TXT record value a dns-01 provider must publish at `_acme-challenge.<domain>`.
pub fn dns01_txt_value(key_auth: &str) -> String {
    b64(Sha256::digest(key_auth.as_bytes()))
}

pub fn dns01_record_name(domain: &str) -> String {
    format!("_acme-challenge.{}", domain.trim_start_matches("*."))
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Builds a provider from the node's access config and extended config.
pub type ProviderFactory =
    Arc<dyn Fn(&Value, &Value) -> Result<Arc<dyn ChallengeProvider>, AcmeError> + Send + Sync>;

/// Named challenge providers.
#[derive(Clone, Default)]
pub struct ChallengeProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ChallengeProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `webroot` provider rooted at `data_dir/webroot`
    /// unless the access config names a `root`.
    pub fn with_builtin(data_dir: impl Into<PathBuf>) -> Self {
        let default_root = data_dir.into().join("webroot");
        let mut registry = Self::new();
        registry.register(
            WebrootProvider::NAME,
            Arc::new(
                move |access: &Value, _extended: &Value| -> Result<Arc<dyn ChallengeProvider>, AcmeError> {
                    let root = access
                        .get("root")
                        .and_then(Value::as_str)
                        .map(PathBuf::from)
                        .unwrap_or_else(|| default_root.clone());
                    Ok(Arc::new(WebrootProvider::new(root)))
                },
            ),
        );
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: ProviderFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn build(
        &self,
        name: &str,
        access: &Value,
        extended: &Value,
    ) -> Result<Arc<dyn ChallengeProvider>, AcmeError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| AcmeError::Config(format!("unknown challenge provider '{name}'")))?;
        factory(access, extended)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

// ---------------------------------------------------------------------------
// Webroot
// ---------------------------------------------------------------------------

/// http-01 provider writing `<root>/.well-known/acme-challenge/<token>`.
#[derive(Debug, Clone)]
pub struct WebrootProvider {
    root: PathBuf,
}

impl WebrootProvider {
    pub const NAME: &'static str = "webroot";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn token_path(&self, token: &str) -> Result<PathBuf, AcmeError> {
        if token.is_empty() || token.contains(['/', '\\', '.']) {
            return Err(AcmeError::Challenge(format!("invalid token '{token}'")));
        }
        Ok(self.root.join(".well-known").join("acme-challenge").join(token))
    }
}

#[async_trait]
impl ChallengeProvider for WebrootProvider {
    async fn present(&self, _domain: &str, token: &str, key_auth: &str) -> Result<(), AcmeError> {
        let path = self.token_path(token)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| AcmeError::Challenge(format!("create {}: {e}", dir.display())))?;
        }
        tokio::fs::write(&path, key_auth)
            .await
            .map_err(|e| AcmeError::Challenge(format!("write {}: {e}", path.display())))
    }

    async fn clean_up(&self, _domain: &str, token: &str, _key_auth: &str) -> Result<(), AcmeError> {
        let path = self.token_path(token)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AcmeError::Challenge(format!("remove {}: {e}", path.display()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    impl std::fmt::Debug for dyn ChallengeProvider {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("dyn ChallengeProvider")
        }
    }

    #[tokio::test]
    async fn webroot_writes_and_removes_token() {
        let root = std::env::temp_dir().join(format!("webroot-{}", uuid::Uuid::new_v4()));
        let provider = WebrootProvider::new(&root);

        provider.present("a.example", "tok123", "tok123.thumb").await.unwrap();
        let served = tokio::fs::read_to_string(root.join(".well-known/acme-challenge/tok123"))
            .await
            .unwrap();
        assert_eq!(served, "tok123.thumb");

        provider.clean_up("a.example", "tok123", "tok123.thumb").await.unwrap();
        assert!(!root.join(".well-known/acme-challenge/tok123").exists());
        // Second clean-up is a no-op.
        provider.clean_up("a.example", "tok123", "tok123.thumb").await.unwrap();

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn webroot_rejects_path_tokens() {
        let provider = WebrootProvider::new("/tmp/unused");
        assert_matches!(
            provider.present("a.example", "../etc", "x").await,
            Err(AcmeError::Challenge(_))
        );
    }

    #[test]
    fn registry_builds_builtin_and_rejects_unknown() {
        let registry = ChallengeProviderRegistry::with_builtin("/tmp/certflow");
        assert_eq!(registry.names(), vec!["webroot"]);
        assert!(registry
            .build("webroot", &Value::Null, &Value::Null)
            .is_ok());
        assert_matches!(
            registry.build("route53", &Value::Null, &Value::Null),
            Err(AcmeError::Config(_))
        );
    }

    #[test]
    fn dns01_record_strips_wildcard() {
        assert_eq!(dns01_record_name("*.example.com"), "_acme-challenge.example.com");
        assert_eq!(dns01_txt_value("abc").len(), 43);
    }
}
