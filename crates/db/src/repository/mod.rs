//! Repository traits — one trait per entity, one file per Postgres table.
//!
//! The core consumes persistence only through these narrow interfaces.
//! [`crate::memory::MemoryStore`] and [`crate::pool::PgStore`] both implement
//! every trait; [`Repositories`] bundles them for the engine and dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    AcmeAccount, Certificate, CertificateFilter, RunFilter, RunStatus, Setting, Workflow,
    WorkflowLog, WorkflowOutput, WorkflowRun,
};
use crate::DbError;

pub mod accounts;
pub mod certificates;
pub mod logs;
pub mod outputs;
pub mod runs;
pub mod settings;
pub mod workflows;

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<Workflow, DbError>;

    async fn save(&self, workflow: &Workflow) -> Result<Workflow, DbError>;

    async fn list(&self) -> Result<Vec<Workflow>, DbError>;

    /// Enabled workflows whose trigger is `scheduled`.
    async fn list_enabled_scheduled(&self) -> Result<Vec<Workflow>, DbError>;

    /// Workflows whose last run is in one of `statuses`.
    async fn list_by_last_run_status(
        &self,
        statuses: &[RunStatus],
    ) -> Result<Vec<Workflow>, DbError>;
}

#[async_trait]
pub trait WorkflowRunRepository: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<WorkflowRun, DbError>;

    async fn save(&self, run: &WorkflowRun) -> Result<WorkflowRun, DbError>;

    /// Save the run and, when it is the owning workflow's most recent run,
    /// copy its id/status/time into the workflow's last-run fields.
    async fn save_with_cascading(&self, run: &WorkflowRun) -> Result<WorkflowRun, DbError>;

    async fn list_by_status(&self, statuses: &[RunStatus]) -> Result<Vec<WorkflowRun>, DbError>;

    /// Delete matching runs together with their logs.
    /// Returns the number of deleted runs.
    async fn delete_where(&self, filter: &RunFilter) -> Result<u64, DbError>;
}

#[async_trait]
pub trait WorkflowLogRepository: Send + Sync {
    async fn save(&self, log: &WorkflowLog) -> Result<WorkflowLog, DbError>;

    async fn list_by_run(&self, run_id: Uuid) -> Result<Vec<WorkflowLog>, DbError>;
}

#[async_trait]
pub trait WorkflowOutputRepository: Send + Sync {
    async fn save(&self, output: &WorkflowOutput) -> Result<WorkflowOutput, DbError>;

    /// Persist an output and the certificate it produced atomically.
    async fn save_with_certificate(
        &self,
        output: &WorkflowOutput,
        certificate: &Certificate,
    ) -> Result<(WorkflowOutput, Certificate), DbError>;

    /// Most recent successful output of `node_id` within `workflow_id`.
    async fn get_last_succeeded(
        &self,
        workflow_id: Uuid,
        node_id: &str,
    ) -> Result<Option<WorkflowOutput>, DbError>;

    async fn get_by_run_node(
        &self,
        run_id: Uuid,
        node_id: &str,
    ) -> Result<Option<WorkflowOutput>, DbError>;
}

#[async_trait]
pub trait AcmeAccountRepository: Send + Sync {
    async fn get_by_ca_and_email(
        &self,
        ca: &str,
        directory_url: &str,
        email: &str,
    ) -> Result<Option<AcmeAccount>, DbError>;

    async fn get_by_account_url(&self, account_url: &str) -> Result<Option<AcmeAccount>, DbError>;

    async fn save(&self, account: &AcmeAccount) -> Result<AcmeAccount, DbError>;
}

#[async_trait]
pub trait CertificateRepository: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<Certificate, DbError>;

    async fn get_by_run_node(
        &self,
        run_id: Uuid,
        node_id: &str,
    ) -> Result<Option<Certificate>, DbError>;

    /// Newest certificate produced by `node_id` across all runs of the workflow.
    async fn get_latest_by_workflow_node(
        &self,
        workflow_id: Uuid,
        node_id: &str,
    ) -> Result<Option<Certificate>, DbError>;

    async fn save(&self, certificate: &Certificate) -> Result<Certificate, DbError>;

    /// Returns the number of deleted certificates.
    async fn delete_where(&self, filter: &CertificateFilter) -> Result<u64, DbError>;
}

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn get_by_name(&self, name: &str) -> Result<Option<Setting>, DbError>;

    async fn save(&self, setting: &Setting) -> Result<Setting, DbError>;
}

/// Every repository the core needs, behind shared trait objects.
#[derive(Clone)]
pub struct Repositories {
    pub workflows: Arc<dyn WorkflowRepository>,
    pub runs: Arc<dyn WorkflowRunRepository>,
    pub logs: Arc<dyn WorkflowLogRepository>,
    pub outputs: Arc<dyn WorkflowOutputRepository>,
    pub accounts: Arc<dyn AcmeAccountRepository>,
    pub certificates: Arc<dyn CertificateRepository>,
    pub settings: Arc<dyn SettingsRepository>,
}

impl Repositories {
    /// Build the bundle from one store implementing every repository.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: WorkflowRepository
            + WorkflowRunRepository
            + WorkflowLogRepository
            + WorkflowOutputRepository
            + AcmeAccountRepository
            + CertificateRepository
            + SettingsRepository
            + 'static,
    {
        Self {
            workflows: store.clone(),
            runs: store.clone(),
            logs: store.clone(),
            outputs: store.clone(),
            accounts: store.clone(),
            certificates: store.clone(),
            settings: store,
        }
    }
}
