//! Known certificate authorities and their directory endpoints.

use serde::{Deserialize, Serialize};

use crate::AcmeError;

pub const LETSENCRYPT: &str = "letsencrypt";
pub const LETSENCRYPT_STAGING: &str = "letsencrypt_staging";
pub const ZEROSSL: &str = "zerossl";
pub const GOOGLE: &str = "google";
pub const BUYPASS: &str = "buypass";
pub const CUSTOM: &str = "custom";

struct KnownCa {
    name: &'static str,
    directory_url: &'static str,
    eab_required: bool,
}

const KNOWN: &[KnownCa] = &[
    KnownCa {
        name: LETSENCRYPT,
        directory_url: "https://acme-v02.api.letsencrypt.org/directory",
        eab_required: false,
    },
    KnownCa {
        name: LETSENCRYPT_STAGING,
        directory_url: "https://acme-staging-v02.api.letsencrypt.org/directory",
        eab_required: false,
    },
    KnownCa {
        name: ZEROSSL,
        directory_url: "https://acme.zerossl.com/v2/DV90",
        eab_required: true,
    },
    KnownCa {
        name: GOOGLE,
        directory_url: "https://dv.acme-v02.api.pki.goog/directory",
        eab_required: true,
    },
    KnownCa {
        name: BUYPASS,
        directory_url: "https://api.buypass.com/acme/directory",
        eab_required: false,
    },
];

/// External account binding credentials as entered by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EabCredentials {
    pub kid: String,
    pub hmac_key: String,
}

/// CA selection carried by an apply-certificate node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaSettings {
    #[serde(default)]
    pub ca: String,
    /// Required when `ca` is `custom`.
    #[serde(default)]
    pub directory_url: Option<String>,
    #[serde(default)]
    pub eab_kid: Option<String>,
    #[serde(default)]
    pub eab_hmac_key: Option<String>,
}

/// A CA resolved to its directory URL and binding credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCa {
    pub ca: String,
    pub directory_url: String,
    pub eab: Option<EabCredentials>,
    pub eab_required: bool,
}

impl CaSettings {
    pub fn resolve(&self) -> Result<ResolvedCa, AcmeError> {
        let ca = if self.ca.trim().is_empty() {
            LETSENCRYPT.to_string()
        } else {
            self.ca.trim().to_string()
        };

        let eab = match (non_empty(&self.eab_kid), non_empty(&self.eab_hmac_key)) {
            (Some(kid), Some(hmac_key)) => Some(EabCredentials {
                kid: kid.to_string(),
                hmac_key: hmac_key.to_string(),
            }),
            _ => None,
        };

        let (directory_url, eab_required) = if ca == CUSTOM {
            let url = non_empty(&self.directory_url).ok_or_else(|| {
                AcmeError::Config("custom ca requires a directory url".into())
            })?;
            (url.to_string(), false)
        } else {
            let known = KNOWN
                .iter()
                .find(|k| k.name == ca)
                .ok_or_else(|| AcmeError::Config(format!("unknown ca '{ca}'")))?;
            (known.directory_url.to_string(), known.eab_required)
        };

        if eab_required && eab.is_none() {
            return Err(AcmeError::EabRequired { ca });
        }

        Ok(ResolvedCa {
            ca,
            directory_url,
            eab,
            eab_required,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn empty_ca_defaults_to_letsencrypt() {
        let resolved = CaSettings::default().resolve().unwrap();
        assert_eq!(resolved.ca, LETSENCRYPT);
        assert!(resolved.directory_url.contains("letsencrypt"));
    }

    #[test]
    fn zerossl_without_eab_is_rejected() {
        let settings = CaSettings {
            ca: ZEROSSL.into(),
            ..Default::default()
        };
        assert_matches!(settings.resolve(), Err(AcmeError::EabRequired { .. }));
    }

    #[test]
    fn custom_ca_needs_directory() {
        let settings = CaSettings {
            ca: CUSTOM.into(),
            ..Default::default()
        };
        assert_matches!(settings.resolve(), Err(AcmeError::Config(_)));

        let settings = CaSettings {
            ca: CUSTOM.into(),
            directory_url: Some("https://ca.internal/directory".into()),
            ..Default::default()
        };
        assert_eq!(
            settings.resolve().unwrap().directory_url,
            "https://ca.internal/directory"
        );
    }
}
