use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use db::models::{Certificate, CertificateSource};

use super::AppState;
use crate::ApiError;

/// A certificate without its private key.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateView {
    pub id: Uuid,
    pub source: CertificateSource,
    pub domains: Vec<String>,
    pub serial_number: String,
    pub issuer_org: String,
    pub key_algorithm: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub is_renewed: bool,
    pub is_revoked: bool,
    pub workflow_id: Uuid,
    pub node_id: String,
}

impl From<Certificate> for CertificateView {
    fn from(cert: Certificate) -> Self {
        Self {
            id: cert.id,
            domains: cert.domains().into_iter().map(str::to_string).collect(),
            source: cert.source,
            serial_number: cert.serial_number,
            issuer_org: cert.issuer_org,
            key_algorithm: cert.key_algorithm,
            valid_from: cert.valid_from,
            valid_to: cert.valid_to,
            is_renewed: cert.is_renewed,
            is_revoked: cert.is_revoked,
            workflow_id: cert.workflow_id,
            node_id: cert.node_id,
        }
    }
}

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<CertificateView>, ApiError> {
    Ok(Json(state.repos.certificates.get_by_id(id).await?.into()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateBundle {
    pub certificate: String,
    pub private_key: String,
    pub issuer_certificate: String,
}

/// PEM material for installing the certificate by hand.
pub async fn download(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<CertificateBundle>, ApiError> {
    let cert = state.repos.certificates.get_by_id(id).await?;
    info!(certificate_id = %id, "certificate downloaded");
    Ok(Json(CertificateBundle {
        certificate: cert.certificate,
        private_key: cert.private_key,
        issuer_certificate: cert.issuer_certificate,
    }))
}

/// Revoke an issued certificate with the account that ordered it.
pub async fn revoke(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<CertificateView>, ApiError> {
    let mut cert = state.repos.certificates.get_by_id(id).await?;
    if cert.is_revoked {
        return Err(ApiError::BadRequest(format!("certificate {id} is already revoked")));
    }
    let account_url = cert
        .acme_account_url
        .as_deref()
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("certificate {id} was not issued through ACME")))?;
    let account = state
        .repos
        .accounts
        .get_by_account_url(account_url)
        .await?
        .ok_or_else(|| ApiError::BadRequest(format!("ACME account {account_url} not found")))?;

    state
        .acme
        .revoke(&account, &cert.certificate, &CancellationToken::new())
        .await?;

    cert.is_revoked = true;
    cert.updated_at = Utc::now();
    let cert = state.repos.certificates.save(&cert).await?;
    info!(certificate_id = %id, "certificate revoked");
    Ok(Json(cert.into()))
}
