//! Workflows API.

use crate::client::CubeClient;
use crate::collection::decode;
use crate::error::{Error, Result};
use crate::transport::Request;
use crate::types::{JobCounters, PluginInstanceSummary};

/// Page size when listing a workflow's plugin instances.
pub const INSTANCES_PAGE_LIMIT: u32 = 1000;

/// Workflows API client.
pub struct WorkflowsApi {
    client: CubeClient,
}

impl WorkflowsApi {
    pub(crate) fn new(client: CubeClient) -> Self {
        Self { client }
    }

    /// Aggregate job counters of a workflow.
    pub async fn status(&self, workflow_id: i64) -> Result<JobCounters> {
        let result = self
            .client
            .call(Request::get(format!("pipelines/workflows/{workflow_id}/")))
            .await?;
        let record = result.records().first().ok_or_else(|| {
            Error::Malformed(format!("workflow {workflow_id} returned no record"))
        })?;
        decode(record)
    }

    /// The plugin instances (jobs) of a workflow, in listing order.
    pub async fn plugin_instances(&self, workflow_id: i64) -> Result<Vec<PluginInstanceSummary>> {
        self.client
            .call(
                Request::get(format!("pipelines/workflows/{workflow_id}/plugininstances/"))
                    .query("limit", INSTANCES_PAGE_LIMIT),
            )
            .await?
            .decode_all()
    }
}
