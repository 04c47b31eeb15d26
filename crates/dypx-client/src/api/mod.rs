//! API endpoint implementations.

mod feeds;
mod health;
mod pipelines;
mod plugins;
mod workflows;

pub use feeds::FeedsApi;
pub use health::HealthApi;
pub use pipelines::{PARAMETERS_PAGE_LIMIT, PIPINGS_PAGE_LIMIT, PipelinesApi};
pub use plugins::PluginsApi;
pub use workflows::{INSTANCES_PAGE_LIMIT, WorkflowsApi};
