//! Workflow creation.

use dypx_client::CubeClient;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::template::{NodeSpec, PipelineTemplate};

/// A launched workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowHandle {
    pub workflow_id: i64,
    /// Plugin instance the workflow is anchored to.
    pub previous_instance_id: i64,
    /// Fixed at launch; the success threshold for the monitor.
    pub expected_job_count: u64,
}

/// Posts workflow-create requests.
#[derive(Clone)]
pub struct WorkflowLauncher {
    client: CubeClient,
}

impl WorkflowLauncher {
    pub fn new(client: CubeClient) -> Self {
        Self { client }
    }

    /// Instantiate `template` below `previous_instance_id` with `nodes`.
    ///
    /// There is no idempotency key: if the create call is retried after an
    /// ambiguous failure the backend may hold two workflows.
    pub async fn launch(
        &self,
        template: &PipelineTemplate,
        previous_instance_id: i64,
        nodes: &[NodeSpec],
    ) -> Result<WorkflowHandle> {
        if template.pipeline_id <= 0 {
            return Err(PipelineError::NotFound(format!(
                "pipeline '{}' has no id",
                template.name
            )));
        }

        let nodes_info = serde_json::to_value(nodes)?;
        let workflow_id = self
            .client
            .pipelines()
            .create_workflow(template.pipeline_id, previous_instance_id, &nodes_info)
            .await?;

        let handle = WorkflowHandle {
            workflow_id,
            previous_instance_id,
            expected_job_count: template.expected_job_count() as u64,
        };
        info!(
            workflow_id,
            pipeline = %template.name,
            previous_instance_id,
            expected_jobs = handle.expected_job_count,
            "Workflow created"
        );
        Ok(handle)
    }
}
