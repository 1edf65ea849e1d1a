//! Keeps cron jobs in step with scheduled workflows.

use tracing::{error, info};
use uuid::Uuid;

use db::models::{Workflow, WorkflowTrigger};
use db::Repositories;

use crate::{start_workflow_run, CronScheduler, DispatchError, WorkflowDispatcher};

pub fn job_id(workflow_id: Uuid) -> String {
    format!("workflow#{workflow_id}")
}

#[derive(Clone)]
pub struct WorkflowScheduler {
    scheduler: CronScheduler,
    repos: Repositories,
    dispatcher: WorkflowDispatcher,
}

impl WorkflowScheduler {
    pub fn new(scheduler: CronScheduler, repos: Repositories, dispatcher: WorkflowDispatcher) -> Self {
        Self {
            scheduler,
            repos,
            dispatcher,
        }
    }

    pub fn scheduler(&self) -> &CronScheduler {
        &self.scheduler
    }

    /// Register every enabled scheduled workflow.  A bad expression on one
    /// workflow is logged and does not stop the others.
    pub async fn register_all(&self) -> Result<usize, DispatchError> {
        let workflows = self.repos.workflows.list_enabled_scheduled().await?;
        let mut registered = 0;
        for workflow in &workflows {
            match self.sync_workflow(workflow) {
                Ok(()) => registered += 1,
                Err(err) => error!(workflow_id = %workflow.id, error = %err, "could not schedule workflow"),
            }
        }
        info!(registered, "scheduled workflows registered");
        Ok(registered)
    }

    /// Add, replace or remove the workflow's job to match its trigger.
    pub fn sync_workflow(&self, workflow: &Workflow) -> Result<(), DispatchError> {
        let id = job_id(workflow.id);
        let expression = match workflow.trigger_cron.as_deref() {
            Some(expression) if workflow.is_scheduled() => expression,
            _ => {
                self.scheduler.remove(&id);
                return Ok(());
            }
        };

        let repos = self.repos.clone();
        let dispatcher = self.dispatcher.clone();
        let workflow_id = workflow.id;
        self.scheduler.add(&id, expression, move || {
            let repos = repos.clone();
            let dispatcher = dispatcher.clone();
            async move {
                if let Err(err) =
                    start_workflow_run(&repos, &dispatcher, workflow_id, WorkflowTrigger::Scheduled).await
                {
                    error!(%workflow_id, error = %err, "scheduled run not started");
                }
            }
        })
    }

    pub fn remove_workflow(&self, workflow_id: Uuid) -> bool {
        self.scheduler.remove(&job_id(workflow_id))
    }
}
