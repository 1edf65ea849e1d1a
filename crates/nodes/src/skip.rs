//! Skip policy for the business nodes.
//!
//! Each comparison names the fields that affect the produced artifact.  A new
//! config field is ignored here until it is added on purpose.

use chrono::{DateTime, Utc};
use db::models::{Certificate, WorkflowOutput};

use crate::config::{ApplyConfig, DeployConfig, UploadConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipDecision {
    /// Nothing to do; the reason goes to the node log.
    Skip(String),
    /// Real work required.
    Run(String),
}

impl SkipDecision {
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip(_))
    }
}

fn first_change(checks: &[(&'static str, bool)]) -> Option<&'static str> {
    checks
        .iter()
        .find(|(_, changed)| *changed)
        .map(|(field, _)| *field)
}

pub fn apply_changed_field(current: &ApplyConfig, previous: &ApplyConfig) -> Option<&'static str> {
    first_change(&[
        ("domains", current.domains != previous.domains),
        ("contactEmail", current.contact_email != previous.contact_email),
        ("ca", current.ca != previous.ca),
        ("caDirectoryUrl", current.ca_directory_url != previous.ca_directory_url),
        ("eabKid", current.eab_kid != previous.eab_kid),
        ("challengeType", current.challenge_type != previous.challenge_type),
        ("provider", current.provider != previous.provider),
        (
            "providerAccessConfig",
            current.provider_access_config != previous.provider_access_config,
        ),
        ("keyAlgorithm", current.key_algorithm != previous.key_algorithm),
        ("privateKey", current.private_key != previous.private_key),
        ("validityDays", current.validity_days != previous.validity_days),
        ("preferredChain", current.preferred_chain != previous.preferred_chain),
    ])
}

pub fn upload_changed_field(
    current: &UploadConfig,
    previous: &UploadConfig,
) -> Option<&'static str> {
    first_change(&[
        ("certificate", current.certificate.trim() != previous.certificate.trim()),
        ("privateKey", current.private_key.trim() != previous.private_key.trim()),
    ])
}

pub fn deploy_changed_field(
    current: &DeployConfig,
    previous: &DeployConfig,
) -> Option<&'static str> {
    first_change(&[
        ("certificate", current.source_node_id() != previous.source_node_id()),
        ("provider", current.provider != previous.provider),
        (
            "providerAccessConfig",
            current.provider_access_config != previous.provider_access_config,
        ),
        ("providerConfig", current.provider_config != previous.provider_config),
    ])
}

/// Apply: skip when the config is unchanged and the certificate from the last
/// successful run is still outside the renewal window.
pub fn decide_apply(
    current: &ApplyConfig,
    last: Option<(&WorkflowOutput, &Certificate)>,
    now: DateTime<Utc>,
) -> SkipDecision {
    let Some((output, certificate)) = last else {
        return SkipDecision::Run("no previous certificate".into());
    };
    let previous: ApplyConfig = match serde_json::from_value(output.node_config.clone()) {
        Ok(previous) => previous,
        Err(_) => return SkipDecision::Run("previous configuration unreadable".into()),
    };
    if let Some(field) = apply_changed_field(current, &previous) {
        return SkipDecision::Run(format!("configuration field '{field}' changed"));
    }
    if certificate.is_revoked {
        return SkipDecision::Run("previous certificate was revoked".into());
    }

    let days_left = certificate.days_left(now);
    if days_left > i64::from(current.skip_before_expiry_days) {
        SkipDecision::Skip(format!(
            "certificate still valid for {days_left} days (renewal at {} days)",
            current.skip_before_expiry_days
        ))
    } else {
        SkipDecision::Run(format!("certificate expires in {days_left} days"))
    }
}

/// Upload: once uploaded with the same material, never again.
pub fn decide_upload(current: &UploadConfig, last: Option<&WorkflowOutput>) -> SkipDecision {
    let Some(output) = last else {
        return SkipDecision::Run("nothing uploaded yet".into());
    };
    match serde_json::from_value::<UploadConfig>(output.node_config.clone()) {
        Ok(previous) => match upload_changed_field(current, &previous) {
            Some(field) => SkipDecision::Run(format!("configuration field '{field}' changed")),
            None => SkipDecision::Skip("certificate already uploaded".into()),
        },
        Err(_) => SkipDecision::Run("previous configuration unreadable".into()),
    }
}

/// Deploy: skip when the config is unchanged and the certificate predates
/// the last successful deployment.
pub fn decide_deploy(
    current: &DeployConfig,
    last: Option<&WorkflowOutput>,
    certificate: &Certificate,
) -> SkipDecision {
    if !current.skip_on_last_succeeded {
        return SkipDecision::Run("skipping disabled".into());
    }
    let Some(output) = last else {
        return SkipDecision::Run("no previous deployment".into());
    };
    let previous: DeployConfig = match serde_json::from_value(output.node_config.clone()) {
        Ok(previous) => previous,
        Err(_) => return SkipDecision::Run("previous configuration unreadable".into()),
    };
    if let Some(field) = deploy_changed_field(current, &previous) {
        return SkipDecision::Run(format!("configuration field '{field}' changed"));
    }
    if certificate.created_at > output.created_at {
        return SkipDecision::Run("certificate is newer than the last deployment".into());
    }
    SkipDecision::Skip("certificate already deployed".into())
}
