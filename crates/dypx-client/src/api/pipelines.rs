//! Pipelines API.

use serde_json::{Value, json};

use crate::client::CubeClient;
use crate::error::{Error, Result};
use crate::transport::Request;
use crate::types::PipelineParameterRow;

/// Page size when counting a pipeline's pipings.
pub const PIPINGS_PAGE_LIMIT: u32 = 100;

/// Page size when listing a pipeline's default parameters.
pub const PARAMETERS_PAGE_LIMIT: u32 = 1000;

/// Pipelines API client.
pub struct PipelinesApi {
    client: CubeClient,
}

impl PipelinesApi {
    pub(crate) fn new(client: CubeClient) -> Self {
        Self { client }
    }

    /// Find the id of the first pipeline whose name matches `name`.
    pub async fn search(&self, name: &str) -> Result<Option<i64>> {
        let result = self
            .client
            .call(Request::get("pipelines/search/").query("name", name))
            .await?;
        Ok(result.first_id("id"))
    }

    /// Number of pipings (nodes) in a pipeline.
    pub async fn piping_count(&self, pipeline_id: i64) -> Result<usize> {
        let result = self
            .client
            .call(
                Request::get(format!("pipelines/{pipeline_id}/pipings/"))
                    .query("limit", PIPINGS_PAGE_LIMIT),
            )
            .await?;
        Ok(result.records().len())
    }

    /// Every default-parameter row of a pipeline.
    pub async fn default_parameters(&self, pipeline_id: i64) -> Result<Vec<PipelineParameterRow>> {
        self.client
            .call(
                Request::get(format!("pipelines/{pipeline_id}/parameters/"))
                    .query("limit", PARAMETERS_PAGE_LIMIT),
            )
            .await?
            .decode_all()
    }

    /// Create a workflow from a pipeline, anchored to `previous_instance_id`.
    ///
    /// `nodes_info` is sent as a JSON-encoded string, as the backend expects.
    pub async fn create_workflow(
        &self,
        pipeline_id: i64,
        previous_instance_id: i64,
        nodes_info: &Value,
    ) -> Result<i64> {
        let payload = json!({
            "previous_plugin_inst_id": previous_instance_id,
            "nodes_info": serde_json::to_string(nodes_info)?,
        });
        let result = self
            .client
            .call(Request::post(
                format!("pipelines/{pipeline_id}/workflows/"),
                payload,
            ))
            .await?;
        result
            .first_id("id")
            .ok_or_else(|| Error::Malformed("workflow id missing from response".to_string()))
    }
}
