//! TLS probe used by the monitor node.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::tls::TlsInfo;

use crate::NodeError;

const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    /// Address to connect to.
    pub host: String,
    pub port: u16,
    /// Name sent as SNI and `Host`.
    pub domain: String,
    pub request_path: String,
}

#[async_trait]
pub trait CertificateProbe: Send + Sync {
    /// DER of the leaf certificate the server presents.
    async fn fetch_leaf(&self, target: &ProbeTarget) -> Result<Vec<u8>, NodeError>;
}

/// Connects to `host:port`, presents `domain`, and sends a HEAD request.
/// Certificate verification is off: the point is to inspect whatever the
/// server serves.
#[derive(Debug, Clone, Default)]
pub struct TlsProbe;

impl TlsProbe {
    async fn resolve(host: &str, port: u16) -> Result<SocketAddr, NodeError> {
        tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| NodeError::failed(format!("resolve {host}: {e}")))?
            .next()
            .ok_or_else(|| NodeError::failed(format!("{host} has no address")))
    }
}

#[async_trait]
impl CertificateProbe for TlsProbe {
    async fn fetch_leaf(&self, target: &ProbeTarget) -> Result<Vec<u8>, NodeError> {
        let addr = Self::resolve(&target.host, target.port).await?;
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .tls_info(true)
            .resolve(&target.domain, addr)
            .build()
            .map_err(|e| NodeError::failed(format!("http client: {e}")))?;

        let path = if target.request_path.starts_with('/') {
            target.request_path.clone()
        } else {
            format!("/{}", target.request_path)
        };
        let url = format!("https://{}:{}{}", target.domain, target.port, path);

        let response = client
            .head(&url)
            .send()
            .await
            .map_err(|e| NodeError::failed(format!("HEAD {url}: {e}")))?;

        response
            .extensions()
            .get::<TlsInfo>()
            .and_then(TlsInfo::peer_certificate)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| NodeError::failed(format!("{url} presented no certificate")))
    }
}
