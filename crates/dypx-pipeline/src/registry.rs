//! Registry of background workflow monitors.
//!
//! Every launched monitor runs as its own task with a cancellation token, so
//! shutdown can cancel and join outstanding polls instead of relying on
//! process exit.

use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::monitor::{MonitorOutcome, MonitorTarget, WorkflowMonitor};

struct MonitorTask {
    token: CancellationToken,
    handle: JoinHandle<MonitorOutcome>,
}

/// Tracks monitor tasks by workflow id.
#[derive(Default)]
pub struct MonitorRegistry {
    root: CancellationToken,
    tasks: Mutex<HashMap<i64, MonitorTask>>,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start monitoring `target` in the background.
    ///
    /// Returns the monitor's cancellation token. A workflow that is already
    /// monitored keeps its existing task.
    pub fn spawn(&self, monitor: WorkflowMonitor, target: MonitorTarget) -> CancellationToken {
        let workflow_id = target.handle.workflow_id;
        let mut tasks = self.lock();
        if let Some(task) = tasks.get(&workflow_id) {
            return task.token.clone();
        }

        let token = self.root.child_token();
        let task_token = token.clone();
        let handle = tokio::spawn(async move { monitor.watch(&target, &task_token).await });
        debug!(workflow_id, "Monitor spawned");

        tasks.insert(
            workflow_id,
            MonitorTask {
                token: token.clone(),
                handle,
            },
        );
        token
    }

    /// Cancel one monitor. Returns false if the workflow is not tracked.
    pub fn cancel(&self, workflow_id: i64) -> bool {
        match self.lock().get(&workflow_id) {
            Some(task) => {
                task.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Monitors tracked and not yet joined.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Monitors still polling.
    pub fn active(&self) -> usize {
        self.lock()
            .values()
            .filter(|t| !t.handle.is_finished())
            .count()
    }

    /// Wait for every tracked monitor to reach its verdict.
    ///
    /// Outcomes are returned in workflow-id order. A monitor task that
    /// panicked is logged and left out.
    pub async fn join_all(&self) -> Vec<MonitorOutcome> {
        let mut drained: Vec<(i64, MonitorTask)> = self.lock().drain().collect();
        drained.sort_by_key(|(id, _)| *id);

        let ids: Vec<i64> = drained.iter().map(|(id, _)| *id).collect();
        let results = join_all(drained.into_iter().map(|(_, task)| task.handle)).await;

        ids.into_iter()
            .zip(results)
            .filter_map(|(workflow_id, result)| match result {
                Ok(outcome) => Some(outcome),
                Err(err) => {
                    error!(workflow_id, error = %err, "Monitor task failed");
                    None
                }
            })
            .collect()
    }

    /// Cancel every monitor without waiting for it.
    ///
    /// Monitors spawned afterwards start out cancelled.
    pub fn cancel_all(&self) {
        info!(monitors = self.len(), "Cancelling workflow monitors");
        self.root.cancel();
    }

    /// Cancel every monitor, then join them.
    pub async fn shutdown(&self) -> Vec<MonitorOutcome> {
        self.cancel_all();
        self.join_all().await
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i64, MonitorTask>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
