//! Run dispatcher.
//!
//! `WorkflowDispatcher` owns the pending queue and the processing map:
//! 1. `start` queues a run and schedules a scan.
//! 2. A scan (`try_next`) promotes at most one queued run, skipping runs
//!    whose workflow is already processing and stopping at the concurrency
//!    limit.
//! 3. Every promoted run executes on its own task (`try_execute`), which
//!    drives one `WorkflowEngine` invocation, records the terminal status,
//!    frees its slot and schedules the next scan.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use db::models::{LogLevel, RunStatus, WorkflowLog};
use db::repository::WorkflowRunRepository;
use db::{DbError, Repositories};
use engine::{validate_graph, Hooks, NodeRegistry, WorkflowEngine, WorkflowExecution};

use crate::DispatchError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum number of runs processing at once.
    pub max_concurrency: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct QueuedRun {
    run_id: Uuid,
    workflow_id: Uuid,
}

#[derive(Debug)]
struct ProcessingRun {
    workflow_id: Uuid,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct DispatcherState {
    booted: bool,
    shut_down: bool,
    pending: VecDeque<QueuedRun>,
    processing: HashMap<Uuid, ProcessingRun>,
}

impl DispatcherState {
    fn ensure_running(&self) -> Result<(), DispatchError> {
        if !self.booted {
            Err(DispatchError::NotBooted)
        } else if self.shut_down {
            Err(DispatchError::AlreadyShutdown)
        } else {
            Ok(())
        }
    }
}

/// Snapshot returned by [`WorkflowDispatcher::statistics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatcherStatistics {
    pub concurrency: usize,
    pub pending_run_ids: Vec<Uuid>,
    pub processing_run_ids: Vec<Uuid>,
}

// ---------------------------------------------------------------------------
// WorkflowDispatcher
// ---------------------------------------------------------------------------

struct Inner {
    repos: Repositories,
    registry: NodeRegistry,
    concurrency: usize,
    state: RwLock<DispatcherState>,
}

/// Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct WorkflowDispatcher {
    inner: Arc<Inner>,
}

impl WorkflowDispatcher {
    pub fn new(repos: Repositories, registry: NodeRegistry, config: DispatcherConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                repos,
                registry,
                concurrency: config.max_concurrency.max(1),
                state: RwLock::new(DispatcherState::default()),
            }),
        }
    }

    /// One-time startup recovery: runs and workflows left pending or
    /// processing by a previous process are marked canceled.
    #[instrument(skip(self))]
    pub async fn bootup(&self) -> Result<(), DispatchError> {
        {
            let mut state = self.inner.state.write().await;
            if state.booted {
                return Err(DispatchError::AlreadyBooted);
            }
            state.booted = true;
        }

        let repos = &self.inner.repos;
        let active = [RunStatus::Pending, RunStatus::Processing];
        let now = Utc::now();

        let stale_runs = repos.runs.list_by_status(&active).await?;
        for mut run in stale_runs {
            warn!(run_id = %run.id, status = %run.status, "canceling run interrupted by restart");
            run.status = RunStatus::Canceled;
            run.ended_at = Some(now);
            run.error = Some("interrupted by server restart".into());
            repos.runs.save_with_cascading(&run).await?;
        }

        let stale_workflows = repos.workflows.list_by_last_run_status(&active).await?;
        for mut workflow in stale_workflows {
            workflow.last_run_status = Some(RunStatus::Canceled);
            workflow.updated_at = now;
            repos.workflows.save(&workflow).await?;
        }

        info!(concurrency = self.inner.concurrency, "dispatcher booted");
        Ok(())
    }

    /// Cancel every processing run and drop the queue.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), DispatchError> {
        let mut state = self.inner.state.write().await;
        if !state.booted {
            return Err(DispatchError::NotBooted);
        }
        if state.shut_down {
            return Err(DispatchError::AlreadyShutdown);
        }
        state.shut_down = true;

        for (run_id, processing) in state.processing.drain() {
            debug!(%run_id, "canceling on shutdown");
            processing.cancel.cancel();
        }
        state.pending.clear();
        info!("dispatcher shut down");
        Ok(())
    }

    /// Queue a pending run.
    #[instrument(skip(self))]
    pub async fn start(&self, run_id: Uuid) -> Result<(), DispatchError> {
        self.inner.state.read().await.ensure_running()?;
        let run = self.inner.repos.runs.get_by_id(run_id).await?;

        {
            let mut state = self.inner.state.write().await;
            state.ensure_running()?;
            if state.processing.contains_key(&run_id) {
                return Err(DispatchError::AlreadyProcessing(run_id));
            }
            if state.pending.iter().any(|q| q.run_id == run_id) {
                return Err(DispatchError::AlreadyQueued(run_id));
            }
            state.pending.push_back(QueuedRun {
                run_id,
                workflow_id: run.workflow_id,
            });
        }

        info!(workflow_id = %run.workflow_id, "run queued");
        tokio::spawn(self.try_next());
        Ok(())
    }

    /// Mark a run canceled, stopping it if it is processing.
    #[instrument(skip(self))]
    pub async fn cancel(&self, run_id: Uuid) -> Result<(), DispatchError> {
        let repos = &self.inner.repos;
        let mut run = repos.runs.get_by_id(run_id).await?;
        if run.status.is_terminal() {
            return Err(DispatchError::AlreadyTerminal {
                run_id,
                status: run.status,
            });
        }

        run.status = RunStatus::Canceled;
        run.ended_at = Some(Utc::now());
        repos.runs.save_with_cascading(&run).await?;

        {
            let mut state = self.inner.state.write().await;
            if let Some(processing) = state.processing.remove(&run_id) {
                processing.cancel.cancel();
                info!("processing run canceled");
            } else {
                state.pending.retain(|q| q.run_id != run_id);
                info!("queued run canceled");
            }
        }

        tokio::spawn(self.try_next());
        Ok(())
    }

    pub async fn statistics(&self) -> DispatcherStatistics {
        let state = self.inner.state.read().await;
        DispatcherStatistics {
            concurrency: self.inner.concurrency,
            pending_run_ids: state.pending.iter().map(|q| q.run_id).collect(),
            processing_run_ids: state.processing.keys().copied().collect(),
        }
    }

    // -----------------------------------------------------------------------
    // Internal: queue scan
    // -----------------------------------------------------------------------

    /// Promote at most one queued run.
    fn try_next(&self) -> BoxFuture<'static, ()> {
        let this = self.clone();
        Box::pin(async move {
            let promoted = {
                let mut state = this.inner.state.write().await;
                if state.ensure_running().is_err() {
                    return;
                }

                let busy: HashSet<Uuid> =
                    state.processing.values().map(|p| p.workflow_id).collect();
                let mut chosen = None;
                for (index, queued) in state.pending.iter().enumerate() {
                    if state.processing.len() >= this.inner.concurrency {
                        debug!(run_id = %queued.run_id, "concurrency limit reached, run stays queued");
                        break;
                    }
                    if busy.contains(&queued.workflow_id) {
                        warn!(
                            run_id = %queued.run_id,
                            workflow_id = %queued.workflow_id,
                            "workflow already has a processing run, run stays queued"
                        );
                        continue;
                    }
                    chosen = Some(index);
                    break;
                }

                chosen.and_then(|index| state.pending.remove(index)).map(|queued| {
                    let cancel = CancellationToken::new();
                    state.processing.insert(
                        queued.run_id,
                        ProcessingRun {
                            workflow_id: queued.workflow_id,
                            cancel: cancel.clone(),
                        },
                    );
                    (queued.run_id, cancel)
                })
            };

            if let Some((run_id, cancel)) = promoted {
                tokio::spawn(this.try_execute(run_id, cancel));
            }
        })
    }

    // -----------------------------------------------------------------------
    // Internal: execution task
    // -----------------------------------------------------------------------

    async fn try_execute(self, run_id: Uuid, cancel: CancellationToken) {
        let result = AssertUnwindSafe(self.execute(run_id, cancel)).catch_unwind().await;

        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(err)) => {
                error!(%run_id, error = %err, "run execution failed");
                Some(err.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    %run_id,
                    panic = %message,
                    backtrace = %std::backtrace::Backtrace::force_capture(),
                    "run execution panicked"
                );
                Some(format!("panic: {message}"))
            }
        };
        if let Some(message) = failure {
            let runs = self.inner.repos.runs.as_ref();
            if let Err(err) = finish(runs, run_id, RunStatus::Failed, Some(message)).await {
                error!(%run_id, error = %err, "could not record run failure");
            }
        }

        self.inner.state.write().await.processing.remove(&run_id);
        self.try_next().await;
    }

    #[instrument(skip(self, cancel))]
    async fn execute(&self, run_id: Uuid, cancel: CancellationToken) -> Result<(), DispatchError> {
        let repos = &self.inner.repos;

        let mut run = repos.runs.get_by_id(run_id).await?;
        if run.status != RunStatus::Pending {
            info!(status = %run.status, "run is no longer pending, not executing");
            return Ok(());
        }
        run.status = RunStatus::Processing;
        run.started_at = Some(Utc::now());
        let run = repos.runs.save_with_cascading(&run).await?;

        let workflow = repos.workflows.get_by_id(run.workflow_id).await?;
        validate_graph(&run.graph)?;

        let engine = WorkflowEngine::new(self.inner.registry.clone(), repos.outputs.clone())
            .with_hooks(self.run_hooks(run_id));
        let execution = WorkflowExecution {
            workflow_id: workflow.id,
            workflow_name: workflow.name,
            run_id,
            trigger: run.trigger,
            graph: run.graph,
        };

        // The outcome is recorded by the hooks.
        if let Err(err) = engine.invoke(execution, cancel).await {
            debug!(error = %err, "engine returned an error");
        }
        Ok(())
    }

    /// Hooks persisting node logs and the run's terminal status.
    fn run_hooks(&self, run_id: Uuid) -> Hooks {
        let repos = &self.inner.repos;
        let mut hooks = Hooks::new();

        let logs = repos.logs.clone();
        hooks.on_node_logging(move |event| {
            let logs = logs.clone();
            async move {
                for record in event.records {
                    let log = WorkflowLog {
                        id: Uuid::new_v4(),
                        workflow_id: event.node.run.workflow_id,
                        run_id: event.node.run.run_id,
                        node_id: event.node.node_id.clone(),
                        node_name: event.node.node_name.clone(),
                        timestamp: record.timestamp,
                        level: record.level,
                        message: record.message,
                        data: record.data,
                    };
                    logs.save(&log).await?;
                }
                Ok::<(), anyhow::Error>(())
            }
        });

        let logs = repos.logs.clone();
        hooks.on_node_error(move |event| {
            let logs = logs.clone();
            async move {
                let log = WorkflowLog {
                    id: Uuid::new_v4(),
                    workflow_id: event.node.run.workflow_id,
                    run_id: event.node.run.run_id,
                    node_id: event.node.node_id,
                    node_name: event.node.node_name,
                    timestamp: Utc::now(),
                    level: LogLevel::Error,
                    message: event.error,
                    data: serde_json::Value::Null,
                };
                logs.save(&log).await?;
                Ok::<(), anyhow::Error>(())
            }
        });

        let runs = repos.runs.clone();
        hooks.on_end(move |_| {
            let runs = runs.clone();
            async move {
                finish(runs.as_ref(), run_id, RunStatus::Succeeded, None).await?;
                Ok::<(), anyhow::Error>(())
            }
        });

        let runs = repos.runs.clone();
        hooks.on_error(move |event| {
            let runs = runs.clone();
            async move {
                let status = if event.cancelled {
                    RunStatus::Canceled
                } else {
                    RunStatus::Failed
                };
                finish(runs.as_ref(), run_id, status, Some(event.error)).await?;
                Ok::<(), anyhow::Error>(())
            }
        });

        hooks
    }
}

/// Record a terminal status unless the run already has one.
async fn finish(
    runs: &dyn WorkflowRunRepository,
    run_id: Uuid,
    status: RunStatus,
    error: Option<String>,
) -> Result<(), DbError> {
    let mut run = runs.get_by_id(run_id).await?;
    if run.status.is_terminal() {
        debug!(%run_id, status = %run.status, "run already terminal");
        return Ok(());
    }
    run.status = status;
    run.ended_at = Some(Utc::now());
    run.error = error;
    runs.save_with_cascading(&run).await?;
    info!(%run_id, %status, "run finished");
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
