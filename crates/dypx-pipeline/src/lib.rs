//! Workflow orchestration for ChRIS pipelines.
//!
//! This crate turns a named pipeline into a running workflow on the CUBE
//! backend and tracks it to a terminal verdict:
//!
//! - [`TemplateResolver`] looks a pipeline up by name and groups its default
//!   parameters into [`NodeSpec`]s
//! - [`apply`] writes caller overrides into those nodes
//! - [`WorkflowLauncher`] creates the workflow below an anchor instance
//! - [`WorkflowMonitor`] polls job counters in the background until success,
//!   failure or tampering, notifying through a [`Notifier`]
//! - [`NodeWaiter`] blocks until one node of a workflow ends
//!
//! [`PipelineEngine`] ties these together and owns a [`MonitorRegistry`] so
//! background monitors can be joined or cancelled at shutdown.

pub mod engine;
pub mod error;
pub mod launcher;
pub mod monitor;
pub mod notify;
pub mod overrides;
pub mod registry;
pub mod template;
pub mod waiter;

#[cfg(test)]
mod testing;

pub use engine::{
    FlowRequest, FlowResult, LaunchRequest, LaunchStatus, PipelineConfig, PipelineEngine,
    ScheduledWorkflow,
};
pub use error::{PipelineError, Result};
pub use launcher::{WorkflowHandle, WorkflowLauncher};
pub use monitor::{MonitorOutcome, MonitorTarget, Verdict, WorkflowMonitor, classify};
pub use notify::{
    NotificationKind, NotificationRequest, NotificationSettings, Notifier, PluginNotifier,
    SearchContext,
};
pub use overrides::{OverrideMap, ParamUpdates, apply};
pub use registry::MonitorRegistry;
pub use template::{NodeSpec, ParameterDefault, PipelineTemplate, TemplateResolver, group_rows};
pub use waiter::{NodeWaiter, WaitOutcome};

// Re-export for consumers that need the cancellation token type.
pub use tokio_util::sync::CancellationToken;
