//! ACME v2 (RFC 8555) over HTTPS.
//!
//! Each call opens a short-lived [`Session`] holding the directory, the
//! account key and the current replay nonce.  Nothing here is process-global:
//! logging goes through `tracing` spans and resolver settings are passed per
//! order.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE, LINK, LOCATION};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::backend::{
    AccountCredentials, AcmeBackend, IssuedCertificate, OrderRequest, RegisterRequest,
    RegisteredAccount,
};
use crate::certs::{pem_to_der, split_pem_chain, top_issuer_common_name};
use crate::challenge::{dns01_record_name, dns01_txt_value, ChallengeType};
use crate::dns::{wait_for_txt, DEFAULT_PROPAGATION_TIMEOUT};
use crate::jws::{b64, AccountKey};
use crate::AcmeError;

const JOSE_JSON: &str = "application/jose+json";
const PEM_CHAIN: &str = "application/pem-certificate-chain";
const NONCE_RETRIES: usize = 3;
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const POLL_ATTEMPTS: usize = 90;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Directory {
    new_nonce: String,
    new_account: String,
    new_order: String,
    revoke_cert: String,
    #[serde(default)]
    meta: Option<DirectoryMeta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectoryMeta {
    #[serde(default)]
    external_account_required: bool,
}

#[derive(Debug, Deserialize)]
struct Problem {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    detail: String,
}

#[derive(Debug, Deserialize)]
struct Order {
    status: String,
    #[serde(default)]
    authorizations: Vec<String>,
    finalize: String,
    #[serde(default)]
    certificate: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Identifier {
    value: String,
}

#[derive(Debug, Deserialize)]
struct Authorization {
    status: String,
    identifier: Identifier,
    #[serde(default)]
    challenges: Vec<Challenge>,
}

#[derive(Debug, Clone, Deserialize)]
struct Challenge {
    #[serde(rename = "type")]
    kind: String,
    url: String,
    #[serde(default)]
    token: String,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct Session<'a> {
    http: &'a Client,
    directory: Directory,
    key: AccountKey,
    kid: Option<String>,
    nonce: Option<String>,
}

impl<'a> Session<'a> {
    async fn open(http: &'a Client, directory_url: &str, key: AccountKey) -> Result<Self, AcmeError> {
        let directory = http
            .get(directory_url)
            .send()
            .await?
            .error_for_status()?
            .json::<Directory>()
            .await?;

        Ok(Self {
            http,
            directory,
            key,
            kid: None,
            nonce: None,
        })
    }

    async fn fresh_nonce(&mut self) -> Result<String, AcmeError> {
        if let Some(nonce) = self.nonce.take() {
            return Ok(nonce);
        }
        let response = self.http.head(&self.directory.new_nonce).send().await?;
        replay_nonce(response.headers())
            .ok_or_else(|| AcmeError::Http("authority returned no replay-nonce".into()))
    }

    /// Signed POST; `payload` of `None` is POST-as-GET.  A `badNonce` problem
    /// is retried with the nonce the authority handed back.
    async fn post(
        &mut self,
        url: &str,
        payload: Option<&Value>,
        accept: Option<&str>,
    ) -> Result<Response, AcmeError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let nonce = self.fresh_nonce().await?;
            let body = self
                .key
                .sign_request(url, &nonce, self.kid.as_deref(), payload)?;

            let mut request = self
                .http
                .post(url)
                .header(CONTENT_TYPE, JOSE_JSON)
                .body(serde_json::to_vec(&body)?);
            if let Some(accept) = accept {
                request = request.header(ACCEPT, accept);
            }

            let response = request.send().await?;
            self.nonce = replay_nonce(response.headers());

            if response.status().is_success() {
                return Ok(response);
            }

            let err = problem(response).await;
            if err.is_bad_nonce() && attempt < NONCE_RETRIES {
                debug!(url, attempt, "bad nonce, retrying");
                continue;
            }
            return Err(err);
        }
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &mut self,
        url: &str,
        payload: Option<&Value>,
    ) -> Result<(T, HeaderMap), AcmeError> {
        let response = self.post(url, payload, None).await?;
        let headers = response.headers().clone();
        Ok((response.json::<T>().await?, headers))
    }

    async fn register(
        &mut self,
        email: &str,
        eab: Option<&crate::ca::EabCredentials>,
    ) -> Result<RegisteredAccount, AcmeError> {
        let mut payload = json!({ "termsOfServiceAgreed": true });
        if !email.is_empty() {
            payload["contact"] = json!([format!("mailto:{email}")]);
        }

        let eab_required = self
            .directory
            .meta
            .as_ref()
            .is_some_and(|m| m.external_account_required);
        match eab {
            Some(eab) => {
                payload["externalAccountBinding"] =
                    self.key
                        .eab_binding(&eab.kid, &eab.hmac_key, &self.directory.new_account)?;
            }
            None if eab_required => {
                return Err(AcmeError::Registration(
                    "authority requires external account binding".into(),
                ))
            }
            None => {}
        }

        let url = self.directory.new_account.clone();
        let (account, headers) = self
            .post_json::<Value>(&url, Some(&payload))
            .await
            .map_err(|e| match e {
                AcmeError::Problem { kind, detail, .. } => {
                    AcmeError::Registration(format!("{kind}: {detail}"))
                }
                other => other,
            })?;
        let account_url = location(&headers)?;

        Ok(RegisteredAccount {
            account_url,
            account,
        })
    }

    async fn poll_authorization(&mut self, url: &str) -> Result<(), AcmeError> {
        for _ in 0..POLL_ATTEMPTS {
            let (authz, _) = self.post_json::<Authorization>(url, None).await?;
            match authz.status.as_str() {
                "valid" => return Ok(()),
                "pending" | "processing" => tokio::time::sleep(POLL_INTERVAL).await,
                other => {
                    return Err(AcmeError::Challenge(format!(
                        "authorization for {} is {other}",
                        authz.identifier.value
                    )))
                }
            }
        }
        Err(AcmeError::Challenge(format!("authorization {url} timed out")))
    }

    async fn poll_order(&mut self, url: &str) -> Result<Order, AcmeError> {
        for _ in 0..POLL_ATTEMPTS {
            let (order, _) = self.post_json::<Order>(url, None).await?;
            match order.status.as_str() {
                "valid" => return Ok(order),
                "pending" | "ready" | "processing" => tokio::time::sleep(POLL_INTERVAL).await,
                other => {
                    return Err(AcmeError::Problem {
                        kind: format!("order {other}"),
                        detail: order.error.map(|e| e.to_string()).unwrap_or_default(),
                        status: 0,
                    })
                }
            }
        }
        Err(AcmeError::Http(format!("order {url} did not become valid")))
    }

    async fn solve(
        &mut self,
        authz_url: &str,
        order: &OrderRequest,
    ) -> Result<(), AcmeError> {
        let (authz, _) = self.post_json::<Authorization>(authz_url, None).await?;
        if authz.status == "valid" {
            return Ok(());
        }

        let solver = &order.solver;
        let wanted = solver.challenge_type.as_str();
        let challenge = authz
            .challenges
            .iter()
            .find(|c| c.kind == wanted)
            .cloned()
            .ok_or_else(|| {
                AcmeError::Challenge(format!(
                    "authority offered no {wanted} challenge for {}",
                    authz.identifier.value
                ))
            })?;

        let domain = authz.identifier.value.clone();
        let key_auth = self.key.key_authorization(&challenge.token);

        solver
            .provider
            .present(&domain, &challenge.token, &key_auth)
            .await?;

        let result = self
            .validate(&domain, &challenge, &key_auth, authz_url, order)
            .await;

        if let Err(e) = solver
            .provider
            .clean_up(&domain, &challenge.token, &key_auth)
            .await
        {
            warn!(domain = %domain, error = %e, "challenge clean-up failed");
        }

        result
    }

    async fn validate(
        &mut self,
        domain: &str,
        challenge: &Challenge,
        key_auth: &str,
        authz_url: &str,
        order: &OrderRequest,
    ) -> Result<(), AcmeError> {
        let solver = &order.solver;
        match solver.challenge_type {
            ChallengeType::Dns01 => {
                if let Some(wait) = solver.dns_propagation_wait {
                    tokio::time::sleep(wait).await;
                }
                let timeout = solver
                    .provider
                    .propagation_timeout()
                    .or(solver.dns_propagation_timeout)
                    .unwrap_or(DEFAULT_PROPAGATION_TIMEOUT);
                wait_for_txt(
                    &dns01_record_name(domain),
                    &dns01_txt_value(key_auth),
                    &solver.dns_nameservers,
                    timeout,
                )
                .await?;
            }
            ChallengeType::Http01 => {
                if let Some(delay) = solver.http_delay {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        self.post(&challenge.url, Some(&json!({})), None).await?;
        self.poll_authorization(authz_url).await
    }

    async fn download(&mut self, url: &str) -> Result<(String, Vec<String>), AcmeError> {
        let response = self.post(url, None, Some(PEM_CHAIN)).await?;
        let alternates = alternate_links(response.headers());
        Ok((response.text().await?, alternates))
    }

    async fn pick_chain(
        &mut self,
        cert_url: &str,
        preferred: Option<&str>,
    ) -> Result<String, AcmeError> {
        let (default_chain, alternates) = self.download(cert_url).await?;
        let Some(preferred) = preferred.filter(|p| !p.trim().is_empty()) else {
            return Ok(default_chain);
        };

        if top_issuer_common_name(&default_chain)? == preferred {
            return Ok(default_chain);
        }
        for url in alternates {
            let (chain, _) = self.download(&url).await?;
            if top_issuer_common_name(&chain)? == preferred {
                debug!(preferred, "using alternate chain");
                return Ok(chain);
            }
        }

        warn!(preferred, "preferred chain not offered, using default");
        Ok(default_chain)
    }
}

fn replay_nonce(headers: &HeaderMap) -> Option<String> {
    headers
        .get("replay-nonce")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn location(headers: &HeaderMap) -> Result<String, AcmeError> {
    headers
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| AcmeError::Http("authority returned no location header".into()))
}

/// URLs of `Link: <url>;rel="alternate"` headers.
fn alternate_links(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|link| {
            let (target, params) = link.trim().split_once(';')?;
            let is_alternate = params
                .split(';')
                .any(|p| p.trim().trim_start_matches("rel=").trim_matches('"') == "alternate");
            is_alternate.then(|| target.trim().trim_matches(['<', '>']).to_string())
        })
        .collect()
}

async fn problem(response: Response) -> AcmeError {
    let status = response.status().as_u16();
    match response.json::<Problem>().await {
        Ok(p) => AcmeError::from_problem(p.kind, p.detail, status),
        Err(_) => AcmeError::Http(format!("authority returned http {status}")),
    }
}

fn identifier(value: &str) -> Value {
    let kind = if value.parse::<std::net::IpAddr>().is_ok() {
        "ip"
    } else {
        "dns"
    };
    json!({ "type": kind, "value": value })
}

// ---------------------------------------------------------------------------
// HttpBackend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: Client,
}

impl HttpBackend {
    pub fn new() -> Result<Self, AcmeError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("certflow/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    pub fn with_client(http: Client) -> Self {
        Self { http }
    }

    async fn session(&self, account: &AccountCredentials) -> Result<Session<'_>, AcmeError> {
        let key = AccountKey::from_pem(&account.key_pem)?;
        let mut session = Session::open(&self.http, &account.directory_url, key).await?;
        session.kid = Some(account.account_url.clone());
        Ok(session)
    }
}

#[async_trait]
impl AcmeBackend for HttpBackend {
    #[instrument(skip_all, fields(directory = %request.directory_url, email = %request.email))]
    async fn register(&self, request: &RegisterRequest) -> Result<RegisteredAccount, AcmeError> {
        let key = AccountKey::from_pem(&request.key_pem)?;
        let mut session = Session::open(&self.http, &request.directory_url, key).await?;
        let account = session.register(&request.email, request.eab.as_ref()).await?;
        info!(account_url = %account.account_url, "account registered");
        Ok(account)
    }

    #[instrument(skip_all, fields(identifiers = ?order.identifiers))]
    async fn obtain(
        &self,
        account: &AccountCredentials,
        order: &OrderRequest,
    ) -> Result<IssuedCertificate, AcmeError> {
        if order.identifiers.is_empty() {
            return Err(AcmeError::Config("no domains to order".into()));
        }

        let mut session = self.session(account).await?;

        let mut payload = json!({
            "identifiers": order.identifiers.iter().map(|d| identifier(d)).collect::<Vec<_>>(),
        });
        if let Some(nb) = order.not_before {
            payload["notBefore"] = json!(nb.to_rfc3339());
        }
        if let Some(na) = order.not_after {
            payload["notAfter"] = json!(na.to_rfc3339());
        }
        if let Some(replaces) = &order.replaces {
            payload["replaces"] = json!(replaces);
        }

        let new_order = session.directory.new_order.clone();
        let (created, headers) = session.post_json::<Order>(&new_order, Some(&payload)).await?;
        let order_url = location(&headers)?;
        debug!(order_url = %order_url, status = %created.status, "order created");

        for authz_url in &created.authorizations {
            session.solve(authz_url, order).await?;
        }

        let cert_key = match &order.private_key_pem {
            Some(pem) if !pem.trim().is_empty() => rcgen::KeyPair::from_pem(pem)?,
            _ => order.key_algorithm.generate()?,
        };
        let csr = rcgen::CertificateParams::new(order.identifiers.clone())?
            .serialize_request(&cert_key)?;
        let csr_der: &[u8] = csr.der().as_ref();
        session
            .post(&created.finalize, Some(&json!({ "csr": b64(csr_der) })), None)
            .await?;

        let finished = session.poll_order(&order_url).await?;
        let cert_url = finished
            .certificate
            .ok_or_else(|| AcmeError::Http("valid order has no certificate url".into()))?;

        let chain = session
            .pick_chain(&cert_url, order.preferred_chain.as_deref())
            .await?;
        let parts = split_pem_chain(&chain);
        if parts.is_empty() {
            return Err(AcmeError::Certificate("authority returned an empty chain".into()));
        }

        info!(cert_url = %cert_url, "certificate issued");
        Ok(IssuedCertificate {
            issuer_certificate_pem: parts[1..].concat(),
            certificate_pem: parts.concat(),
            private_key_pem: cert_key.serialize_pem(),
            cert_url,
            ari_replaced: order.replaces.is_some(),
        })
    }

    #[instrument(skip_all, fields(account_url = %account.account_url))]
    async fn revoke(
        &self,
        account: &AccountCredentials,
        certificate_pem: &str,
    ) -> Result<(), AcmeError> {
        let leaf = pem_to_der(certificate_pem)?
            .into_iter()
            .next()
            .ok_or_else(|| AcmeError::Certificate("no certificate to revoke".into()))?;

        let mut session = self.session(account).await?;
        let url = session.directory.revoke_cert.clone();
        session
            .post(&url, Some(&json!({ "certificate": b64(leaf) })), None)
            .await?;
        info!("certificate revoked");
        Ok(())
    }
}
