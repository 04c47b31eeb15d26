//! Pipeline engine: the launch path and the blocking flow.
//!
//! `PipelineEngine` resolves a pipeline, applies overrides, creates the
//! workflow and either hands it to a background monitor ([`PipelineEngine::run`])
//! or blocks on one of its nodes ([`PipelineEngine::execute_and_wait`]).

use std::sync::Arc;
use std::time::Duration;

use dypx_client::{CubeClient, PluginInstanceSummary};
use dypx_config::DypxConfig;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{PipelineError, Result};
use crate::launcher::{WorkflowHandle, WorkflowLauncher};
use crate::monitor::{DEFAULT_POLL_INTERVAL, MonitorOutcome, MonitorTarget, WorkflowMonitor};
use crate::notify::{NotificationSettings, Notifier, PluginNotifier, SearchContext};
use crate::overrides::{OverrideMap, apply};
use crate::registry::MonitorRegistry;
use crate::template::TemplateResolver;
use crate::waiter::{DEFAULT_MAX_POLLS, DEFAULT_WAIT_POLL, NodeWaiter};

/// Configuration for the pipeline engine.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Interval between workflow status polls.
    pub monitor_poll_interval: Duration,
    /// Send a completion notice on success.
    pub notify_on_success: bool,
    /// Interval between node status polls.
    pub wait_poll_interval: Duration,
    /// Node poll budget; 0 polls without bound.
    pub wait_max_polls: u32,
    /// Notification plugin settings.
    pub notification: NotificationSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            monitor_poll_interval: DEFAULT_POLL_INTERVAL,
            notify_on_success: false,
            wait_poll_interval: DEFAULT_WAIT_POLL,
            wait_max_polls: DEFAULT_MAX_POLLS,
            notification: NotificationSettings::default(),
        }
    }
}

impl From<&DypxConfig> for PipelineConfig {
    fn from(config: &DypxConfig) -> Self {
        let monitor = config.monitor();
        let waiter = config.waiter();
        Self {
            monitor_poll_interval: Duration::from_secs(monitor.poll_interval_secs),
            notify_on_success: monitor.notify_on_success,
            wait_poll_interval: Duration::from_secs(waiter.poll_interval_secs),
            wait_max_polls: waiter.max_polls,
            notification: NotificationSettings::from(&config.notification()),
        }
    }
}

/// Input of the launch path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchRequest {
    pub pipeline: String,
    pub previous_instance_id: i64,
    pub overrides: OverrideMap,
    /// Carried into failure notifications.
    pub search: SearchContext,
    pub recipients: Option<String>,
    pub smtp_server: Option<String>,
}

/// Acknowledgement of the launch path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum LaunchStatus {
    #[serde(rename = "Pipeline running")]
    Running { workflow_id: i64 },
    #[serde(rename = "Failed")]
    Failed { error: String },
}

impl LaunchStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, LaunchStatus::Failed { .. })
    }

    /// The `status` label.
    pub fn label(&self) -> &'static str {
        match self {
            LaunchStatus::Running { .. } => "Pipeline running",
            LaunchStatus::Failed { .. } => "Failed",
        }
    }
}

/// Input of the blocking flow.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowRequest {
    pub pipeline: String,
    /// Instance to attach to; defaults to the prior flow's node.
    pub anchor: Option<i64>,
    /// Title of the node to block on.
    pub wait_for: String,
    pub overrides: OverrideMap,
    /// Flow this one continues from.
    pub prior: Option<FlowResult>,
}

/// Result of the blocking flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowResult {
    pub finished: bool,
    pub status: String,
    pub polls: u32,
    pub plid: Option<i64>,
    pub workflow: Vec<PluginInstanceSummary>,
    pub prior: Option<Box<FlowResult>>,
}

impl FlowResult {
    fn skipped(prior: FlowResult) -> Self {
        Self {
            finished: false,
            status: "skipped".to_string(),
            polls: 0,
            plid: None,
            workflow: Vec::new(),
            prior: Some(Box::new(prior)),
        }
    }
}

/// A scheduled workflow and its plugin instances.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledWorkflow {
    pub handle: WorkflowHandle,
    pub instances: Vec<PluginInstanceSummary>,
}

/// The orchestration engine.
pub struct PipelineEngine {
    client: CubeClient,
    config: PipelineConfig,
    resolver: TemplateResolver,
    launcher: WorkflowLauncher,
    monitor: WorkflowMonitor,
    waiter: NodeWaiter,
    registry: MonitorRegistry,
}

impl PipelineEngine {
    /// Engine that notifies through the notification plugin.
    pub fn new(client: CubeClient, config: PipelineConfig) -> Self {
        let notifier = PluginNotifier::new(client.clone(), config.notification.clone());
        Self::with_notifier(client, config, Arc::new(notifier))
    }

    /// Engine with a custom notifier.
    pub fn with_notifier(
        client: CubeClient,
        config: PipelineConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let monitor = WorkflowMonitor::new(client.clone())
            .with_poll_interval(config.monitor_poll_interval)
            .notify_on_success(config.notify_on_success)
            .with_notifier(notifier);
        let waiter = NodeWaiter::new(client.clone())
            .with_poll_interval(config.wait_poll_interval)
            .with_max_polls(config.wait_max_polls);

        Self {
            resolver: TemplateResolver::new(client.clone()),
            launcher: WorkflowLauncher::new(client.clone()),
            client,
            config,
            monitor,
            waiter,
            registry: MonitorRegistry::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn client(&self) -> &CubeClient {
        &self.client
    }

    pub fn registry(&self) -> &MonitorRegistry {
        &self.registry
    }

    /// Resolve, override and create a workflow.
    pub async fn launch(
        &self,
        pipeline: &str,
        previous_instance_id: i64,
        overrides: &OverrideMap,
    ) -> Result<WorkflowHandle> {
        let template = self.resolver.resolve(pipeline).await?;
        let nodes = apply(&template.nodes, overrides);
        self.launcher
            .launch(&template, previous_instance_id, &nodes)
            .await
    }

    /// Launch and monitor in the background. Never fails: errors become
    /// [`LaunchStatus::Failed`].
    pub async fn run(&self, request: LaunchRequest) -> LaunchStatus {
        let handle = match self
            .launch(
                &request.pipeline,
                request.previous_instance_id,
                &request.overrides,
            )
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                error!(pipeline = %request.pipeline, error = %err, "Running pipeline failed");
                return LaunchStatus::Failed {
                    error: err.to_string(),
                };
            }
        };

        self.registry.spawn(
            self.monitor.clone(),
            MonitorTarget {
                handle,
                search: request.search,
                recipients: request.recipients,
                smtp_server: request.smtp_server,
            },
        );
        info!(workflow_id = handle.workflow_id, "Workflow posted successfully");
        LaunchStatus::Running {
            workflow_id: handle.workflow_id,
        }
    }

    /// Launch, then list the new workflow's plugin instances.
    pub async fn schedule(
        &self,
        pipeline: &str,
        previous_instance_id: i64,
        overrides: &OverrideMap,
    ) -> Result<ScheduledWorkflow> {
        let handle = self.launch(pipeline, previous_instance_id, overrides).await?;
        let instances = self
            .client
            .workflows()
            .plugin_instances(handle.workflow_id)
            .await?;
        Ok(ScheduledWorkflow { handle, instances })
    }

    /// Launch a workflow and block until its `wait_for` node ends.
    ///
    /// If the prior flow did not finish, nothing is launched.
    pub async fn execute_and_wait(&self, request: FlowRequest) -> Result<FlowResult> {
        if let Some(prior) = &request.prior
            && !prior.finished
        {
            warn!(pipeline = %request.pipeline, "Prior flow did not finish; skipping");
            return Ok(FlowResult::skipped(prior.clone()));
        }

        let anchor = request
            .anchor
            .or_else(|| request.prior.as_ref().and_then(|p| p.plid))
            .ok_or_else(|| {
                PipelineError::NotFound(format!(
                    "anchor instance for pipeline '{}'",
                    request.pipeline
                ))
            })?;

        let scheduled = self
            .schedule(&request.pipeline, anchor, &request.overrides)
            .await?;
        let outcome = self
            .waiter
            .wait_for_node(&scheduled.instances, &request.wait_for)
            .await?;

        Ok(FlowResult {
            finished: outcome.finished,
            status: outcome.status,
            polls: outcome.polls,
            plid: outcome.plid,
            workflow: scheduled.instances,
            prior: request.prior.map(Box::new),
        })
    }

    /// Wait for every background monitor's verdict.
    pub async fn join_monitors(&self) -> Vec<MonitorOutcome> {
        self.registry.join_all().await
    }

    /// Cancel and join all background monitors.
    pub async fn shutdown(&self) -> Vec<MonitorOutcome> {
        self.registry.shutdown().await
    }
}
