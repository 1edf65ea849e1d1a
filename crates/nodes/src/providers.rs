//! Pluggable capability boundary: deployers, certificate managers and
//! notifiers, looked up by name from a node's `provider` field.
//!
//! Only two built-ins ship here (`local` and `webhook`); vendor integrations
//! register their own factories.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::NodeError;

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

/// Free-form details returned by a provider, logged by the caller.
pub type ProviderResult = Map<String, Value>;

#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(
        &self,
        cancel: &CancellationToken,
        cert_pem: &str,
        key_pem: &str,
    ) -> Result<ProviderResult, NodeError>;
}

/// A cloud certificate store.
#[async_trait]
pub trait CertificateManager: Send + Sync {
    async fn upload(
        &self,
        cancel: &CancellationToken,
        cert_pem: &str,
        key_pem: &str,
    ) -> Result<ProviderResult, NodeError>;

    async fn replace(
        &self,
        cancel: &CancellationToken,
        id: &str,
        cert_pem: &str,
        key_pem: &str,
    ) -> Result<ProviderResult, NodeError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        cancel: &CancellationToken,
        subject: &str,
        message: &str,
    ) -> Result<(), NodeError>;
}

/// Deploys through a certificate manager: replaces `replace_id` when set,
/// uploads a new entry otherwise.
pub struct ManagerDeployer {
    manager: Arc<dyn CertificateManager>,
    replace_id: Option<String>,
}

impl ManagerDeployer {
    pub fn new(manager: Arc<dyn CertificateManager>, replace_id: Option<String>) -> Self {
        Self {
            manager,
            replace_id,
        }
    }
}

#[async_trait]
impl Deployer for ManagerDeployer {
    async fn deploy(
        &self,
        cancel: &CancellationToken,
        cert_pem: &str,
        key_pem: &str,
    ) -> Result<ProviderResult, NodeError> {
        match self.replace_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => self.manager.replace(cancel, id, cert_pem, key_pem).await,
            None => self.manager.upload(cancel, cert_pem, key_pem).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Builds a provider from `(access config, provider config)`.
pub type Factory<T> = Arc<dyn Fn(&Value, &Value) -> Result<Arc<T>, NodeError> + Send + Sync>;

pub struct ProviderRegistry<T: ?Sized> {
    factories: HashMap<String, Factory<T>>,
}

impl<T: ?Sized> Clone for ProviderRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            factories: self.factories.clone(),
        }
    }
}

impl<T: ?Sized> Default for ProviderRegistry<T> {
    fn default() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }
}

impl<T: ?Sized> ProviderRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, factory: Factory<T>) -> &mut Self {
        self.factories.insert(name.into(), factory);
        self
    }

    pub fn build(&self, name: &str, access: &Value, config: &Value) -> Result<Arc<T>, NodeError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| NodeError::Config(format!("unknown provider '{name}'")))?;
        factory(access, config)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

pub type DeployerRegistry = ProviderRegistry<dyn Deployer>;
pub type NotifierRegistry = ProviderRegistry<dyn Notifier>;

fn decode<T: for<'de> Deserialize<'de>>(what: &str, value: &Value) -> Result<T, NodeError> {
    let value = if value.is_null() {
        json!({})
    } else {
        value.clone()
    };
    serde_json::from_value(value).map_err(|e| NodeError::Config(format!("{what}: {e}")))
}

/// Registry holding the built-in `local` deployer, writing under
/// `data_dir/certs` unless configured otherwise.
pub fn builtin_deployers(data_dir: impl Into<PathBuf>) -> DeployerRegistry {
    let default_dir = data_dir.into().join("certs");
    let mut registry = DeployerRegistry::new();
    registry.register(
        LocalDeployer::NAME,
        Arc::new(move |_access: &Value, config: &Value| -> Result<Arc<dyn Deployer>, NodeError> {
            let cfg: LocalDeployConfig = decode("local deployer", config)?;
            let dir = cfg.dir.map(PathBuf::from).unwrap_or_else(|| default_dir.clone());
            Ok(Arc::new(LocalDeployer::new(dir, cfg.name)))
        }),
    );
    registry
}

/// Registry holding the built-in `webhook` notifier.
pub fn builtin_notifiers() -> NotifierRegistry {
    let mut registry = NotifierRegistry::new();
    registry.register(
        WebhookNotifier::NAME,
        Arc::new(|access: &Value, _config: &Value| -> Result<Arc<dyn Notifier>, NodeError> {
            let cfg: WebhookAccess = decode("webhook notifier", access)?;
            Ok(Arc::new(WebhookNotifier::new(cfg.url)?))
        }),
    );
    registry
}

// ---------------------------------------------------------------------------
// Local deployer
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LocalDeployConfig {
    #[serde(default)]
    dir: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Writes `<name>.crt` and `<name>.key` into a directory.
#[derive(Debug, Clone)]
pub struct LocalDeployer {
    dir: PathBuf,
    name: String,
}

impl LocalDeployer {
    pub const NAME: &'static str = "local";

    pub fn new(dir: impl Into<PathBuf>, name: Option<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| "certificate".into()),
        }
    }
}

#[async_trait]
impl Deployer for LocalDeployer {
    async fn deploy(
        &self,
        cancel: &CancellationToken,
        cert_pem: &str,
        key_pem: &str,
    ) -> Result<ProviderResult, NodeError> {
        if cancel.is_cancelled() {
            return Err(NodeError::Cancelled);
        }
        if self.name.contains(['/', '\\']) {
            return Err(NodeError::Config(format!("invalid file name '{}'", self.name)));
        }

        let io = |e: std::io::Error| NodeError::failed(format!("local deploy: {e}"));
        tokio::fs::create_dir_all(&self.dir).await.map_err(io)?;

        let cert_path = self.dir.join(format!("{}.crt", self.name));
        let key_path = self.dir.join(format!("{}.key", self.name));
        tokio::fs::write(&cert_path, cert_pem).await.map_err(io)?;
        tokio::fs::write(&key_path, key_pem).await.map_err(io)?;

        let mut result = ProviderResult::new();
        result.insert("certPath".into(), json!(cert_path.display().to_string()));
        result.insert("keyPath".into(), json!(key_path.display().to_string()));
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Webhook notifier
// ---------------------------------------------------------------------------

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct WebhookAccess {
    url: String,
}

/// POSTs `{"subject": ..., "message": ...}` to a URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub const NAME: &'static str = "webhook";

    pub fn new(url: impl Into<String>) -> Result<Self, NodeError> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(NodeError::Config("webhook url is required".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| NodeError::failed(format!("http client: {e}")))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(
        &self,
        cancel: &CancellationToken,
        subject: &str,
        message: &str,
    ) -> Result<(), NodeError> {
        let request = self
            .client
            .post(&self.url)
            .json(&json!({ "subject": subject, "message": message }))
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(NodeError::Cancelled),
            response = request => response
                .map_err(|e| NodeError::failed(format!("webhook request failed: {e}")))?,
        };

        if !response.status().is_success() {
            return Err(NodeError::failed(format!(
                "webhook returned http {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }
}
