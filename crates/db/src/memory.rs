//! In-memory store for tests and `serve --in-memory`.
//!
//! Implements every repository trait with the same semantics as the
//! Postgres store, including the cascading run save.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    AcmeAccount, Certificate, CertificateFilter, RunFilter, RunStatus, Setting, Workflow,
    WorkflowLog, WorkflowOutput, WorkflowRun,
};
use crate::repository::{
    AcmeAccountRepository, CertificateRepository, SettingsRepository, WorkflowLogRepository,
    WorkflowOutputRepository, WorkflowRepository, WorkflowRunRepository,
};
use crate::DbError;

#[derive(Debug, Default)]
pub struct MemoryStore {
    workflows: RwLock<HashMap<Uuid, Workflow>>,
    runs: RwLock<HashMap<Uuid, WorkflowRun>>,
    logs: RwLock<Vec<WorkflowLog>>,
    outputs: RwLock<Vec<WorkflowOutput>>,
    accounts: RwLock<Vec<AcmeAccount>>,
    certificates: RwLock<HashMap<Uuid, Certificate>>,
    settings: RwLock<HashMap<String, Setting>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored certificate, oldest first.
    pub async fn all_certificates(&self) -> Vec<Certificate> {
        let mut certificates: Vec<_> = self.certificates.read().await.values().cloned().collect();
        certificates.sort_by_key(|c| c.created_at);
        certificates
    }

    /// Every stored output, in insertion order.
    pub async fn all_outputs(&self) -> Vec<WorkflowOutput> {
        self.outputs.read().await.clone()
    }
}

#[async_trait]
impl WorkflowRepository for MemoryStore {
    async fn get_by_id(&self, id: Uuid) -> Result<Workflow, DbError> {
        self.workflows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::not_found("workflow", id))
    }

    async fn save(&self, workflow: &Workflow) -> Result<Workflow, DbError> {
        let mut workflow = workflow.clone();
        workflow.updated_at = Utc::now();
        self.workflows.write().await.insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    async fn list(&self) -> Result<Vec<Workflow>, DbError> {
        let mut workflows: Vec<_> = self.workflows.read().await.values().cloned().collect();
        workflows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(workflows)
    }

    async fn list_enabled_scheduled(&self) -> Result<Vec<Workflow>, DbError> {
        Ok(self
            .workflows
            .read()
            .await
            .values()
            .filter(|w| w.is_scheduled())
            .cloned()
            .collect())
    }

    async fn list_by_last_run_status(
        &self,
        statuses: &[RunStatus],
    ) -> Result<Vec<Workflow>, DbError> {
        Ok(self
            .workflows
            .read()
            .await
            .values()
            .filter(|w| w.last_run_status.is_some_and(|s| statuses.contains(&s)))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WorkflowRunRepository for MemoryStore {
    async fn get_by_id(&self, id: Uuid) -> Result<WorkflowRun, DbError> {
        self.runs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::not_found("workflow run", id))
    }

    async fn save(&self, run: &WorkflowRun) -> Result<WorkflowRun, DbError> {
        self.runs.write().await.insert(run.id, run.clone());
        Ok(run.clone())
    }

    async fn save_with_cascading(&self, run: &WorkflowRun) -> Result<WorkflowRun, DbError> {
        // Lock order matches the Postgres store: run first, then workflow.
        let mut runs = self.runs.write().await;
        let mut workflows = self.workflows.write().await;

        runs.insert(run.id, run.clone());
        if let Some(workflow) = workflows.get_mut(&run.workflow_id) {
            workflow.apply_run(run);
        }

        Ok(run.clone())
    }

    async fn list_by_status(&self, statuses: &[RunStatus]) -> Result<Vec<WorkflowRun>, DbError> {
        let mut runs: Vec<_> = self
            .runs
            .read()
            .await
            .values()
            .filter(|r| statuses.contains(&r.status))
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.created_at);
        Ok(runs)
    }

    async fn delete_where(&self, filter: &RunFilter) -> Result<u64, DbError> {
        let mut runs = self.runs.write().await;
        let doomed: Vec<Uuid> = runs
            .values()
            .filter(|run| filter.matches(run))
            .map(|run| run.id)
            .collect();
        for id in &doomed {
            runs.remove(id);
        }
        self.logs
            .write()
            .await
            .retain(|log| !doomed.contains(&log.run_id));
        Ok(doomed.len() as u64)
    }
}

#[async_trait]
impl WorkflowLogRepository for MemoryStore {
    async fn save(&self, log: &WorkflowLog) -> Result<WorkflowLog, DbError> {
        self.logs.write().await.push(log.clone());
        Ok(log.clone())
    }

    async fn list_by_run(&self, run_id: Uuid) -> Result<Vec<WorkflowLog>, DbError> {
        Ok(self
            .logs
            .read()
            .await
            .iter()
            .filter(|l| l.run_id == run_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WorkflowOutputRepository for MemoryStore {
    async fn save(&self, output: &WorkflowOutput) -> Result<WorkflowOutput, DbError> {
        let mut outputs = self.outputs.write().await;
        outputs.retain(|o| o.id != output.id);
        outputs.push(output.clone());
        Ok(output.clone())
    }

    async fn save_with_certificate(
        &self,
        output: &WorkflowOutput,
        certificate: &Certificate,
    ) -> Result<(WorkflowOutput, Certificate), DbError> {
        let mut outputs = self.outputs.write().await;
        let mut certificates = self.certificates.write().await;

        certificates.insert(certificate.id, certificate.clone());
        outputs.retain(|o| o.id != output.id);
        outputs.push(output.clone());

        Ok((output.clone(), certificate.clone()))
    }

    async fn get_last_succeeded(
        &self,
        workflow_id: Uuid,
        node_id: &str,
    ) -> Result<Option<WorkflowOutput>, DbError> {
        Ok(self
            .outputs
            .read()
            .await
            .iter()
            .rev()
            .find(|o| o.workflow_id == workflow_id && o.node_id == node_id && o.succeeded)
            .cloned())
    }

    async fn get_by_run_node(
        &self,
        run_id: Uuid,
        node_id: &str,
    ) -> Result<Option<WorkflowOutput>, DbError> {
        Ok(self
            .outputs
            .read()
            .await
            .iter()
            .rev()
            .find(|o| o.run_id == run_id && o.node_id == node_id)
            .cloned())
    }
}

#[async_trait]
impl AcmeAccountRepository for MemoryStore {
    async fn get_by_ca_and_email(
        &self,
        ca: &str,
        directory_url: &str,
        email: &str,
    ) -> Result<Option<AcmeAccount>, DbError> {
        Ok(self
            .accounts
            .read()
            .await
            .iter()
            .rev()
            .find(|a| a.ca == ca && a.directory_url == directory_url && a.email == email)
            .cloned())
    }

    async fn get_by_account_url(&self, account_url: &str) -> Result<Option<AcmeAccount>, DbError> {
        Ok(self
            .accounts
            .read()
            .await
            .iter()
            .find(|a| a.account_url == account_url)
            .cloned())
    }

    async fn save(&self, account: &AcmeAccount) -> Result<AcmeAccount, DbError> {
        let mut accounts = self.accounts.write().await;
        accounts.retain(|a| a.id != account.id);
        accounts.push(account.clone());
        Ok(account.clone())
    }
}

#[async_trait]
impl CertificateRepository for MemoryStore {
    async fn get_by_id(&self, id: Uuid) -> Result<Certificate, DbError> {
        self.certificates
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::not_found("certificate", id))
    }

    async fn get_by_run_node(
        &self,
        run_id: Uuid,
        node_id: &str,
    ) -> Result<Option<Certificate>, DbError> {
        Ok(self
            .certificates
            .read()
            .await
            .values()
            .filter(|c| c.run_id == run_id && c.node_id == node_id)
            .max_by_key(|c| c.created_at)
            .cloned())
    }

    async fn get_latest_by_workflow_node(
        &self,
        workflow_id: Uuid,
        node_id: &str,
    ) -> Result<Option<Certificate>, DbError> {
        Ok(self
            .certificates
            .read()
            .await
            .values()
            .filter(|c| c.workflow_id == workflow_id && c.node_id == node_id)
            .max_by_key(|c| c.created_at)
            .cloned())
    }

    async fn save(&self, certificate: &Certificate) -> Result<Certificate, DbError> {
        let mut certificate = certificate.clone();
        certificate.updated_at = Utc::now();
        self.certificates
            .write()
            .await
            .insert(certificate.id, certificate.clone());
        Ok(certificate)
    }

    async fn delete_where(&self, filter: &CertificateFilter) -> Result<u64, DbError> {
        let mut certificates = self.certificates.write().await;
        let before = certificates.len();
        certificates.retain(|_, c| !filter.matches(c));
        Ok((before - certificates.len()) as u64)
    }
}

#[async_trait]
impl SettingsRepository for MemoryStore {
    async fn get_by_name(&self, name: &str) -> Result<Option<Setting>, DbError> {
        Ok(self.settings.read().await.get(name).cloned())
    }

    async fn save(&self, setting: &Setting) -> Result<Setting, DbError> {
        self.settings
            .write()
            .await
            .insert(setting.name.clone(), setting.clone());
        Ok(setting.clone())
    }
}
