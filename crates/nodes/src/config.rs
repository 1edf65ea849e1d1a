//! Typed node configurations, decoded from `Node::config`.

use acme::{CaSettings, ChallengeType, KeyAlgorithm};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Accept either `["a", "b"]` or `"a;b"`.
fn string_or_list<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(String),
        Many(Vec<String>),
    }

    let items = match Raw::deserialize(de)? {
        Raw::One(s) => s.split(';').map(str::to_string).collect(),
        Raw::Many(v) => v,
    };
    Ok(items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

// ---------------------------------------------------------------------------
// Apply
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplyConfig {
    #[serde(deserialize_with = "string_or_list")]
    pub domains: Vec<String>,
    pub contact_email: String,
    pub ca: String,
    pub ca_directory_url: Option<String>,
    pub eab_kid: Option<String>,
    pub eab_hmac_key: Option<String>,
    pub challenge_type: ChallengeType,
    /// Challenge provider name, e.g. `webroot`.
    pub provider: String,
    pub provider_access_config: Value,
    pub provider_extended_config: Value,
    /// Seconds.
    pub dns_propagation_wait: Option<u64>,
    /// Seconds.
    pub dns_propagation_timeout: Option<u64>,
    #[serde(deserialize_with = "string_or_list")]
    pub dns_nameservers: Vec<String>,
    /// Seconds.
    pub http_delay: Option<u64>,
    pub key_algorithm: KeyAlgorithm,
    /// Reuse this PEM key instead of generating one per order.
    pub private_key: Option<String>,
    /// Requested lifetime hint (`notAfter`).
    pub validity_days: Option<u32>,
    pub preferred_chain: Option<String>,
    /// Send the previous certificate's ARI id as the `replaces` hint.
    pub ari_replace: bool,
    /// Renew once fewer days than this remain.
    pub skip_before_expiry_days: u32,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            domains: Vec::new(),
            contact_email: String::new(),
            ca: String::new(),
            ca_directory_url: None,
            eab_kid: None,
            eab_hmac_key: None,
            challenge_type: ChallengeType::Dns01,
            provider: String::new(),
            provider_access_config: Value::Null,
            provider_extended_config: Value::Null,
            dns_propagation_wait: None,
            dns_propagation_timeout: None,
            dns_nameservers: Vec::new(),
            http_delay: None,
            key_algorithm: KeyAlgorithm::default(),
            private_key: None,
            validity_days: None,
            preferred_chain: None,
            ari_replace: true,
            skip_before_expiry_days: 30,
        }
    }
}

impl ApplyConfig {
    pub fn ca_settings(&self) -> CaSettings {
        CaSettings {
            ca: self.ca.clone(),
            directory_url: self.ca_directory_url.clone(),
            eab_kid: self.eab_kid.clone(),
            eab_hmac_key: self.eab_hmac_key.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.domains.is_empty() {
            return Err("at least one domain is required".into());
        }
        if self.contact_email.trim().is_empty() {
            return Err("contact email is required".into());
        }
        if self.provider.trim().is_empty() {
            return Err("challenge provider is required".into());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadConfig {
    /// PEM chain, leaf first.
    pub certificate: String,
    pub private_key: String,
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    pub host: String,
    pub port: u16,
    /// Name checked against the certificate and sent as SNI/Host; defaults
    /// to `host`.
    pub domain: String,
    pub request_path: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 443,
            domain: String::new(),
            request_path: "/".into(),
        }
    }
}

impl MonitorConfig {
    pub fn domain(&self) -> &str {
        if self.domain.trim().is_empty() {
            &self.host
        } else {
            &self.domain
        }
    }
}

// ---------------------------------------------------------------------------
// Deploy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeployConfig {
    /// Producing node, as `nodeId` or `nodeId#certificate`.
    pub certificate: String,
    /// Deployer name, e.g. `local`.
    pub provider: String,
    pub provider_access_config: Value,
    pub provider_config: Value,
    pub skip_on_last_succeeded: bool,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            certificate: String::new(),
            provider: String::new(),
            provider_access_config: Value::Null,
            provider_config: Value::Null,
            skip_on_last_succeeded: true,
        }
    }
}

impl DeployConfig {
    pub fn source_node_id(&self) -> &str {
        self.certificate
            .split_once('#')
            .map_or(self.certificate.as_str(), |(id, _)| id)
            .trim()
    }
}

// ---------------------------------------------------------------------------
// Notify
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotifyConfig {
    /// Notifier name, e.g. `webhook`.
    pub provider: String,
    pub provider_access_config: Value,
    pub provider_config: Value,
    pub subject: String,
    pub message: String,
    /// Stay quiet when every preceding business node skipped.
    pub skip_on_all_prev_skipped: bool,
}

// ---------------------------------------------------------------------------
// Delay / Branch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DelayConfig {
    /// Seconds.
    pub wait: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BranchConfig {
    pub expression: Option<crate::expr::Expr>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn apply_config_accepts_joined_domains() {
        let cfg: ApplyConfig = serde_json::from_value(json!({
            "domains": "a.example.com; *.b.example.com;",
            "contactEmail": "ops@example.com",
            "challengeType": "http-01",
            "provider": "webroot"
        }))
        .unwrap();

        assert_eq!(cfg.domains, vec!["a.example.com", "*.b.example.com"]);
        assert_eq!(cfg.challenge_type, ChallengeType::Http01);
        assert_eq!(cfg.skip_before_expiry_days, 30);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deploy_reference_strips_output_suffix() {
        let cfg = DeployConfig {
            certificate: "apply-1#certificate".into(),
            ..Default::default()
        };
        assert_eq!(cfg.source_node_id(), "apply-1");
    }
}
