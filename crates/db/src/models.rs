//! Entity structs shared by the engine, the dispatcher and the stores.
//!
//! These are persistence models: they carry state, not behaviour.  The
//! Postgres store keeps each of them as a JSONB document next to the few
//! columns it needs to filter on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::graph::WorkflowGraph;

// ---------------------------------------------------------------------------
// Trigger / status enums
// ---------------------------------------------------------------------------

/// How a workflow (and therefore a run) is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowTrigger {
    Manual,
    Scheduled,
}

impl std::fmt::Display for WorkflowTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Scheduled => write!(f, "scheduled"),
        }
    }
}

/// Lifecycle of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending"    => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "succeeded"  => Ok(Self::Succeeded),
            "failed"     => Ok(Self::Failed),
            "canceled"   => Ok(Self::Canceled),
            other        => Err(format!("unknown run status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub enabled: bool,
    pub trigger: WorkflowTrigger,
    /// Standard 5-field cron expression, used when `trigger` is scheduled.
    #[serde(default)]
    pub trigger_cron: Option<String>,
    pub graph: WorkflowGraph,
    #[serde(default)]
    pub last_run_id: Option<Uuid>,
    #[serde(default)]
    pub last_run_status: Option<RunStatus>,
    #[serde(default)]
    pub last_run_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, trigger: WorkflowTrigger, graph: WorkflowGraph) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            enabled: true,
            trigger,
            trigger_cron: None,
            graph,
            last_run_id: None,
            last_run_status: None,
            last_run_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy a run's id/status/time into the last-run fields when the run is
    /// the workflow's most recent one.  Returns whether anything changed.
    pub fn apply_run(&mut self, run: &WorkflowRun) -> bool {
        let is_latest = match (self.last_run_id, self.last_run_time) {
            (None, _) => true,
            (Some(last), _) if last == run.id => true,
            (Some(_), Some(time)) => time <= run.created_at,
            (Some(_), None) => true,
        };
        if !is_latest {
            return false;
        }

        self.last_run_id = Some(run.id);
        self.last_run_status = Some(run.status);
        self.last_run_time = Some(run.created_at);
        self.updated_at = Utc::now();
        true
    }

    /// Whether the workflow should currently own a cron job.
    pub fn is_scheduled(&self) -> bool {
        self.enabled
            && self.trigger == WorkflowTrigger::Scheduled
            && self.trigger_cron.as_deref().is_some_and(|c| !c.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// WorkflowRun
// ---------------------------------------------------------------------------

/// One execution instance of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: RunStatus,
    pub trigger: WorkflowTrigger,
    /// Copy of the workflow graph taken when the run was created.
    pub graph: WorkflowGraph,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowRun {
    /// Create a pending run holding a snapshot of the workflow's graph.
    pub fn pending(workflow: &Workflow, trigger: WorkflowTrigger) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow.id,
            status: RunStatus::Pending,
            trigger,
            graph: workflow.graph.clone(),
            started_at: None,
            ended_at: None,
            error: None,
            created_at: Utc::now(),
        }
    }
}

/// Bulk-delete filter for runs.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub workflow_id: Option<Uuid>,
    pub ended_before: Option<DateTime<Utc>>,
    pub statuses: Vec<RunStatus>,
    /// Runs kept regardless of the other criteria.
    pub exclude_ids: Vec<Uuid>,
}

impl RunFilter {
    pub fn matches(&self, run: &WorkflowRun) -> bool {
        if self.exclude_ids.contains(&run.id) {
            return false;
        }
        if let Some(workflow_id) = self.workflow_id {
            if run.workflow_id != workflow_id {
                return false;
            }
        }
        if let Some(before) = self.ended_before {
            match run.ended_at {
                Some(ended) if ended < before => {}
                _ => return false,
            }
        }
        self.statuses.is_empty() || self.statuses.contains(&run.status)
    }
}

// ---------------------------------------------------------------------------
// WorkflowOutput
// ---------------------------------------------------------------------------

/// Type tag of a state value or output entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Number,
    Boolean,
}

/// A named value produced by a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputEntry {
    pub name: String,
    pub value: String,
    pub value_type: ValueType,
    /// Persistent entries cause the engine to store a `WorkflowOutput` row.
    #[serde(default)]
    pub persistent: bool,
}

impl OutputEntry {
    pub fn new(name: impl Into<String>, value: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            value_type,
            persistent: false,
        }
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }
}

/// The persisted result of one node within one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowOutput {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub run_id: Uuid,
    pub node_id: String,
    /// Node configuration at execution time, compared by later runs.
    pub node_config: serde_json::Value,
    pub outputs: Vec<OutputEntry>,
    pub succeeded: bool,
    pub created_at: DateTime<Utc>,
}

impl WorkflowOutput {
    pub fn succeeded(
        workflow_id: Uuid,
        run_id: Uuid,
        node_id: impl Into<String>,
        node_config: serde_json::Value,
        outputs: Vec<OutputEntry>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            run_id,
            node_id: node_id.into(),
            node_config,
            outputs,
            succeeded: true,
            created_at: Utc::now(),
        }
    }

    pub fn output(&self, name: &str) -> Option<&OutputEntry> {
        self.outputs.iter().find(|o| o.name == name)
    }
}

// ---------------------------------------------------------------------------
// WorkflowLog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One structured log line emitted by a node during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowLog {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub run_id: Uuid,
    pub node_id: String,
    pub node_name: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

// ---------------------------------------------------------------------------
// AcmeAccount
// ---------------------------------------------------------------------------

/// An account registered with a certificate authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcmeAccount {
    pub id: Uuid,
    /// CA identifier, e.g. `letsencrypt`.
    pub ca: String,
    pub email: String,
    /// PKCS#8 PEM of the account key.
    pub private_key: String,
    /// Account object as returned by the authority.
    pub account: serde_json::Value,
    pub account_url: String,
    pub directory_url: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Certificate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateSource {
    Request,
    Upload,
}

/// An issued or uploaded certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    pub id: Uuid,
    pub source: CertificateSource,
    /// Subject alternative names joined by `;`.
    pub subject_alt_names: String,
    pub serial_number: String,
    /// Full PEM chain, leaf first.
    pub certificate: String,
    pub private_key: String,
    pub issuer_org: String,
    pub issuer_certificate: String,
    pub key_algorithm: String,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    #[serde(default)]
    pub acme_account_url: Option<String>,
    #[serde(default)]
    pub acme_cert_url: Option<String>,
    /// ARI identifier (`base64url(AKI).base64url(serial)`).
    #[serde(default)]
    pub ari_cert_id: Option<String>,
    #[serde(default)]
    pub is_renewed: bool,
    #[serde(default)]
    pub is_revoked: bool,
    pub workflow_id: Uuid,
    pub run_id: Uuid,
    pub node_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Certificate {
    pub fn domains(&self) -> Vec<&str> {
        self.subject_alt_names
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Whole days until `valid_to`, negative once expired.
    pub fn days_left(&self, now: DateTime<Utc>) -> i64 {
        (self.valid_to - now).num_days()
    }
}

/// Bulk-delete filter for certificates.
#[derive(Debug, Clone, Default)]
pub struct CertificateFilter {
    pub expired_before: Option<DateTime<Utc>>,
}

impl CertificateFilter {
    pub fn matches(&self, certificate: &Certificate) -> bool {
        match self.expired_before {
            Some(before) => certificate.valid_to < before,
            None => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// A named settings document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub name: String,
    pub content: serde_json::Value,
}

/// Settings name of the retention policy document.
pub const PERSISTENCE_SETTINGS: &str = "persistence";

/// Retention policy; zero disables the corresponding cleanup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceSettings {
    #[serde(default)]
    pub workflow_runs_max_days_retention: u32,
    #[serde(default)]
    pub expired_certificates_max_days_retention: u32,
}
