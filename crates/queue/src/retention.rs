//! Retention cleanup of old runs and long-expired certificates.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use db::models::{
    CertificateFilter, PersistenceSettings, RunFilter, RunStatus, PERSISTENCE_SETTINGS,
};
use db::{DbError, Repositories};

use crate::{CronScheduler, DispatchError};

pub const RETENTION_JOB_ID: &str = "system#retention";
pub const RETENTION_CRON: &str = "0 0 * * *";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionReport {
    pub runs_deleted: u64,
    pub certificates_deleted: u64,
}

async fn load_settings(repos: &Repositories) -> PersistenceSettings {
    let setting = match repos.settings.get_by_name(PERSISTENCE_SETTINGS).await {
        Ok(setting) => setting,
        Err(err) => {
            warn!(error = %err, "persistence settings unavailable, using defaults");
            return PersistenceSettings::default();
        }
    };
    match setting {
        Some(setting) => serde_json::from_value(setting.content).unwrap_or_else(|err| {
            warn!(error = %err, "persistence settings malformed, using defaults");
            PersistenceSettings::default()
        }),
        None => PersistenceSettings::default(),
    }
}

/// Delete terminal runs (with their logs) and expired certificates older
/// than the configured number of days.  A retention of zero keeps
/// everything.  A workflow's latest run is never deleted so that
/// `last_run_id` keeps resolving.
pub async fn cleanup(repos: &Repositories, now: DateTime<Utc>) -> Result<RetentionReport, DbError> {
    let settings = load_settings(repos).await;
    let mut report = RetentionReport::default();

    if settings.workflow_runs_max_days_retention > 0 {
        let filter = RunFilter {
            workflow_id: None,
            ended_before: Some(now - Duration::days(settings.workflow_runs_max_days_retention.into())),
            statuses: vec![RunStatus::Succeeded, RunStatus::Failed, RunStatus::Canceled],
            exclude_ids: repos
                .workflows
                .list()
                .await?
                .into_iter()
                .filter_map(|wf| wf.last_run_id)
                .collect(),
        };
        report.runs_deleted = repos.runs.delete_where(&filter).await?;
    }

    if settings.expired_certificates_max_days_retention > 0 {
        let filter = CertificateFilter {
            expired_before: Some(
                now - Duration::days(settings.expired_certificates_max_days_retention.into()),
            ),
        };
        report.certificates_deleted = repos.certificates.delete_where(&filter).await?;
    }

    info!(
        runs_deleted = report.runs_deleted,
        certificates_deleted = report.certificates_deleted,
        "retention cleanup finished"
    );
    Ok(report)
}

/// Run `cleanup` daily at midnight.
pub fn register_retention(scheduler: &CronScheduler, repos: Repositories) -> Result<(), DispatchError> {
    scheduler.add(RETENTION_JOB_ID, RETENTION_CRON, move || {
        let repos = repos.clone();
        async move {
            if let Err(err) = cleanup(&repos, Utc::now()).await {
                error!(error = %err, "retention cleanup failed");
            }
        }
    })
}
