//! X.509 helpers: PEM chain handling, leaf metadata, ARI identifiers and
//! hostname matching.

use chrono::{DateTime, Utc};
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::pem::Pem;
use x509_parser::prelude::{FromDer, X509Certificate};
use x509_parser::public_key::PublicKey;

use crate::jws::b64;
use crate::AcmeError;

const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const END: &str = "-----END CERTIFICATE-----";

/// Split a PEM bundle into its certificates, preserving order.
pub fn split_pem_chain(pem: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = pem;
    while let Some(start) = rest.find(BEGIN) {
        let Some(end) = rest[start..].find(END) else {
            break;
        };
        let end = start + end + END.len();
        out.push(format!("{}\n", &rest[start..end]));
        rest = &rest[end..];
    }
    out
}

/// DER bytes of every certificate in a PEM bundle.
pub fn pem_to_der(pem: &str) -> Result<Vec<Vec<u8>>, AcmeError> {
    Pem::iter_from_buffer(pem.as_bytes())
        .map(|block| {
            block
                .map(|p| p.contents)
                .map_err(|e| AcmeError::Certificate(format!("invalid pem: {e}")))
        })
        .collect()
}

/// Metadata extracted from the leaf of a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCertificate {
    pub common_name: String,
    pub subject_alt_names: Vec<String>,
    /// Lowercase hex of the serial number.
    pub serial_number: String,
    pub issuer_org: String,
    pub issuer_common_name: String,
    pub key_algorithm: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    /// `base64url(AKI).base64url(serial)` when the leaf carries an AKI.
    pub ari_cert_id: Option<String>,
}

impl ParsedCertificate {
    /// Parse the first certificate of a PEM bundle.
    pub fn from_pem(pem: &str) -> Result<Self, AcmeError> {
        let der = pem_to_der(pem)?
            .into_iter()
            .next()
            .ok_or_else(|| AcmeError::Certificate("no certificate in pem".into()))?;
        Self::from_der(&der)
    }

    pub fn from_der(der: &[u8]) -> Result<Self, AcmeError> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| AcmeError::Certificate(format!("invalid certificate: {e}")))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or_default()
            .to_string();

        let mut subject_alt_names = Vec::new();
        let mut aki = None;
        for ext in cert.extensions() {
            match ext.parsed_extension() {
                ParsedExtension::SubjectAlternativeName(san) => {
                    for name in &san.general_names {
                        match name {
                            GeneralName::DNSName(dns) => subject_alt_names.push(dns.to_string()),
                            GeneralName::IPAddress(ip) => {
                                if let Some(ip) = ip_from_bytes(ip) {
                                    subject_alt_names.push(ip);
                                }
                            }
                            _ => {}
                        }
                    }
                }
                ParsedExtension::AuthorityKeyIdentifier(id) => {
                    aki = id.key_identifier.as_ref().map(|k| k.0.to_vec());
                }
                _ => {}
            }
        }
        if subject_alt_names.is_empty() && !common_name.is_empty() {
            subject_alt_names.push(common_name.clone());
        }

        let serial = cert.tbs_certificate.raw_serial();
        let ari_cert_id = aki.map(|aki| format!("{}.{}", b64(aki), b64(serial)));

        let issuer = cert.issuer();
        let issuer_org = issuer
            .iter_organization()
            .next()
            .and_then(|o| o.as_str().ok())
            .unwrap_or_default()
            .to_string();
        let issuer_common_name = issuer
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or_default()
            .to_string();

        let key_algorithm = match cert.public_key().parsed() {
            Ok(PublicKey::RSA(rsa)) => format!("RSA{}", rsa.key_size()),
            Ok(PublicKey::EC(point)) => format!("EC{}", point.key_size()),
            _ => "unknown".to_string(),
        };

        let validity = cert.validity();
        Ok(Self {
            common_name,
            subject_alt_names,
            serial_number: hex::encode(trim_leading_zeros(serial)),
            issuer_org,
            issuer_common_name,
            key_algorithm,
            valid_from: to_utc(validity.not_before.timestamp())?,
            valid_to: to_utc(validity.not_after.timestamp())?,
            ari_cert_id,
        })
    }

    /// Whether the leaf covers `host` through any SAN, wildcards included.
    pub fn matches_hostname(&self, host: &str) -> bool {
        self.subject_alt_names
            .iter()
            .any(|pattern| hostname_matches(pattern, host))
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && now <= self.valid_to
    }
}

/// Issuer common name of the last certificate in a chain.
pub fn top_issuer_common_name(chain_pem: &str) -> Result<String, AcmeError> {
    let last = pem_to_der(chain_pem)?
        .pop()
        .ok_or_else(|| AcmeError::Certificate("empty chain".into()))?;
    Ok(ParsedCertificate::from_der(&last)?.issuer_common_name)
}

/// RFC 6125 style match: a `*.` pattern covers exactly one leftmost label.
pub fn hostname_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim_end_matches('.').to_ascii_lowercase();
    let host = host.trim_end_matches('.').to_ascii_lowercase();

    match pattern.strip_prefix("*.") {
        Some(suffix) => match host.split_once('.') {
            Some((label, rest)) => !label.is_empty() && rest == suffix,
            None => false,
        },
        None => pattern == host,
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Option<String> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(std::net::Ipv4Addr::from(octets).to_string())
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(std::net::Ipv6Addr::from(octets).to_string())
        }
        _ => None,
    }
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    if first == bytes.len() {
        &bytes[bytes.len().saturating_sub(1)..]
    } else {
        &bytes[first..]
    }
}

fn to_utc(timestamp: i64) -> Result<DateTime<Utc>, AcmeError> {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .ok_or_else(|| AcmeError::Certificate(format!("timestamp {timestamp} out of range")))
}
