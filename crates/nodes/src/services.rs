//! Collaborators shared by the business node executors.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use acme::{AcmeClient, ChallengeProviderRegistry};
use db::Repositories;

use crate::probe::{CertificateProbe, TlsProbe};
use crate::providers::{builtin_deployers, builtin_notifiers, DeployerRegistry, NotifierRegistry};

pub const DEFAULT_MONITOR_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct NodeServices {
    pub repos: Repositories,
    pub acme: AcmeClient,
    pub challenges: ChallengeProviderRegistry,
    pub deployers: DeployerRegistry,
    pub notifiers: NotifierRegistry,
    pub probe: Arc<dyn CertificateProbe>,
    /// Pause between monitor probe attempts.
    pub monitor_retry_delay: Duration,
}

impl NodeServices {
    /// Services with the built-in providers, writing files under `data_dir`.
    pub fn new(repos: Repositories, acme: AcmeClient, data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            repos,
            acme,
            challenges: ChallengeProviderRegistry::with_builtin(&data_dir),
            deployers: builtin_deployers(&data_dir),
            notifiers: builtin_notifiers(),
            probe: Arc::new(TlsProbe),
            monitor_retry_delay: DEFAULT_MONITOR_RETRY_DELAY,
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn CertificateProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_monitor_retry_delay(mut self, delay: Duration) -> Self {
        self.monitor_retry_delay = delay;
        self
    }
}
