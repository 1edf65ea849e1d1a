//! In-process cron scheduler.
//!
//! Each job runs on its own tokio task: compute the next occurrence, sleep
//! until then, fire the callback, repeat.  Removing or replacing a job
//! cancels its task.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use croner::Cron;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::DispatchError;

pub type JobCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct ScheduledJob {
    expression: String,
    cron: Cron,
    cancel: CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub id: String,
    pub expression: String,
    pub next_run: Option<DateTime<Utc>>,
}

/// Cheap to clone; clones share the job table.
#[derive(Clone, Default)]
pub struct CronScheduler {
    jobs: Arc<Mutex<HashMap<String, ScheduledJob>>>,
}

pub fn parse_cron(expression: &str) -> Result<Cron, DispatchError> {
    Cron::new(expression)
        .with_seconds_optional()
        .parse()
        .map_err(|e| DispatchError::InvalidCron {
            expression: expression.to_string(),
            message: e.to_string(),
        })
}

impl CronScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `id`, replacing any job with that id.
    pub fn add<F, Fut>(&self, id: &str, expression: &str, callback: F) -> Result<(), DispatchError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cron = parse_cron(expression)?;
        let callback: JobCallback = Arc::new(move || Box::pin(callback()));
        let cancel = CancellationToken::new();

        let previous = self.lock_jobs().insert(
            id.to_string(),
            ScheduledJob {
                expression: expression.to_string(),
                cron: cron.clone(),
                cancel: cancel.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }

        tokio::spawn(run_job(id.to_string(), cron, callback, cancel));
        info!(job = id, expression, "cron job registered");
        Ok(())
    }

    /// Returns whether a job was removed.
    pub fn remove(&self, id: &str) -> bool {
        match self.lock_jobs().remove(id) {
            Some(job) => {
                job.cancel.cancel();
                info!(job = id, "cron job removed");
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock_jobs().contains_key(id)
    }

    /// Registered jobs ordered by id.
    pub fn list_jobs(&self) -> Vec<JobInfo> {
        let now = Utc::now();
        let mut jobs: Vec<JobInfo> = self
            .lock_jobs()
            .iter()
            .map(|(id, job)| JobInfo {
                id: id.clone(),
                expression: job.expression.clone(),
                next_run: job.cron.find_next_occurrence(&now, false).ok(),
            })
            .collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    /// Stop every job.
    pub fn shutdown(&self) {
        for (id, job) in self.lock_jobs().drain() {
            debug!(job = %id, "stopping cron job");
            job.cancel.cancel();
        }
    }

    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, ScheduledJob>> {
        // A poisoned table is still structurally valid.
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn run_job(id: String, cron: Cron, callback: JobCallback, cancel: CancellationToken) {
    loop {
        let now = Utc::now();
        let next = match cron.find_next_occurrence(&now, false) {
            Ok(next) => next,
            Err(err) => {
                warn!(job = %id, error = %err, "no next occurrence, stopping job");
                return;
            }
        };
        let wait = (next - now).to_std().unwrap_or_default();

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        debug!(job = %id, "cron job firing");
        callback().await;
    }
}
