//! Typed views over CUBE collection records.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Pipelines
// ─────────────────────────────────────────────────────────────────────────────

/// One default-parameter row of a pipeline, tagged with its owning piping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineParameterRow {
    /// Piping (node) that owns the parameter.
    pub plugin_piping_id: i64,
    /// Parent piping in the pipeline DAG.
    #[serde(default)]
    pub previous_plugin_piping_id: Option<i64>,
    /// Title of the owning piping.
    #[serde(default)]
    pub plugin_piping_title: String,
    /// Parameter name.
    pub param_name: String,
    /// Current default value (may be null).
    #[serde(default)]
    pub value: Value,
}

// ─────────────────────────────────────────────────────────────────────────────
// Workflows
// ─────────────────────────────────────────────────────────────────────────────

/// Aggregate per-state job counts of a workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    #[serde(default, rename = "finished_jobs")]
    pub finished: u64,
    #[serde(default, rename = "errored_jobs")]
    pub errored: u64,
    #[serde(default, rename = "cancelled_jobs")]
    pub cancelled: u64,
    #[serde(default, rename = "created_jobs")]
    pub created: u64,
    #[serde(default, rename = "waiting_jobs")]
    pub waiting: u64,
    #[serde(default, rename = "scheduled_jobs")]
    pub scheduled: u64,
    #[serde(default, rename = "started_jobs")]
    pub started: u64,
    #[serde(default, rename = "registering_jobs")]
    pub registering: u64,
}

impl JobCounters {
    /// Sum of every counter.
    pub fn total_observed(&self) -> u64 {
        self.finished
            + self.errored
            + self.cancelled
            + self.created
            + self.waiting
            + self.scheduled
            + self.started
            + self.registering
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin instances
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle status of a plugin instance.
///
/// Statuses outside the known set are kept verbatim as `Unknown` and treated
/// as still in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PluginInstanceStatus {
    Created,
    Waiting,
    Scheduled,
    Started,
    Registering,
    FinishedSuccessfully,
    FinishedWithError,
    Cancelled,
    Unknown(String),
}

impl PluginInstanceStatus {
    /// Wire representation.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "created",
            Self::Waiting => "waiting",
            Self::Scheduled => "scheduled",
            Self::Started => "started",
            Self::Registering => "registeringFiles",
            Self::FinishedSuccessfully => "finishedSuccessfully",
            Self::FinishedWithError => "finishedWithError",
            Self::Cancelled => "cancelled",
            Self::Unknown(s) => s,
        }
    }

    /// A status is terminal when it mentions "finished" or "cancelled".
    pub fn is_terminal(&self) -> bool {
        let s = self.as_str().to_ascii_lowercase();
        s.contains("finished") || s.contains("cancelled")
    }

    /// Only `finishedSuccessfully` counts as success.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::FinishedSuccessfully)
    }
}

impl Default for PluginInstanceStatus {
    fn default() -> Self {
        Self::Unknown("unknown".to_string())
    }
}

impl From<&str> for PluginInstanceStatus {
    fn from(s: &str) -> Self {
        match s {
            "created" => Self::Created,
            "waiting" => Self::Waiting,
            "scheduled" => Self::Scheduled,
            "started" => Self::Started,
            "registeringFiles" | "registering" => Self::Registering,
            "finishedSuccessfully" => Self::FinishedSuccessfully,
            "finishedWithError" => Self::FinishedWithError,
            "cancelled" => Self::Cancelled,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl From<String> for PluginInstanceStatus {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<PluginInstanceStatus> for String {
    fn from(status: PluginInstanceStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for PluginInstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of a plugin instance (one job of a workflow).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInstanceSummary {
    /// Plugin instance id.
    pub id: i64,
    /// Instance title (the piping title for workflow jobs).
    #[serde(default)]
    pub title: String,
    /// Current status.
    #[serde(default)]
    pub status: PluginInstanceStatus,
    /// Name of the plugin this instance runs.
    #[serde(default)]
    pub plugin_name: Option<String>,
    /// Parent instance.
    #[serde(default)]
    pub previous_id: Option<i64>,
    /// Feed the instance belongs to.
    #[serde(default)]
    pub feed_id: Option<i64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Feeds
// ─────────────────────────────────────────────────────────────────────────────

/// Feed details used in completion notices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedDetails {
    /// Feed name.
    #[serde(default)]
    pub name: String,
    /// Creation timestamp as reported by the backend.
    #[serde(default)]
    pub creation_date: String,
    /// Owner username.
    #[serde(default)]
    pub owner_username: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Instance
// ─────────────────────────────────────────────────────────────────────────────

/// Identity of the CUBE deployment, used as a health probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChrisInstance {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub job_execution_type: Option<String>,
}
