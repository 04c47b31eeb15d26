//! Pipeline templates: resolving a pipeline name into its node graph.

use dypx_client::{CubeClient, PipelineParameterRow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

/// One `{name, default}` entry of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefault {
    pub name: String,
    pub default: Value,
}

/// One node (piping) of a pipeline template.
///
/// Serializes to the `nodes_info` entry shape the workflow-create endpoint
/// expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub piping_id: i64,
    pub previous_piping_id: Option<i64>,
    pub title: String,
    #[serde(rename = "plugin_parameter_defaults", default)]
    pub parameter_defaults: Vec<ParameterDefault>,
}

impl NodeSpec {
    /// Current default of `name`, if the node has that parameter.
    pub fn default_of(&self, name: &str) -> Option<&Value> {
        self.parameter_defaults
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.default)
    }
}

/// A pipeline resolved for one launch.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineTemplate {
    pub pipeline_id: i64,
    pub name: String,
    /// Number of pipings reported by the backend.
    pub piping_count: usize,
    pub nodes: Vec<NodeSpec>,
}

impl PipelineTemplate {
    /// Jobs a successful workflow of this template finishes.
    pub fn expected_job_count(&self) -> usize {
        self.piping_count
    }
}

/// Group flat parameter rows into nodes, by `plugin_piping_id`.
///
/// Nodes appear in the order their first row appears; every row contributes
/// exactly one `{name, default}` entry, null defaults included.
pub fn group_rows(rows: Vec<PipelineParameterRow>) -> Vec<NodeSpec> {
    let mut nodes: Vec<NodeSpec> = Vec::new();
    for row in rows {
        let entry = ParameterDefault {
            name: row.param_name,
            default: row.value,
        };
        match nodes.iter_mut().find(|n| n.piping_id == row.plugin_piping_id) {
            Some(node) => node.parameter_defaults.push(entry),
            None => nodes.push(NodeSpec {
                piping_id: row.plugin_piping_id,
                previous_piping_id: row.previous_plugin_piping_id,
                title: row.plugin_piping_title,
                parameter_defaults: vec![entry],
            }),
        }
    }
    nodes
}

/// Resolves pipeline names against the backend.
///
/// Templates are fetched fresh on every call.
#[derive(Clone)]
pub struct TemplateResolver {
    client: CubeClient,
}

impl TemplateResolver {
    pub fn new(client: CubeClient) -> Self {
        Self { client }
    }

    /// Look up `pipeline_name` and build its template.
    pub async fn resolve(&self, pipeline_name: &str) -> Result<PipelineTemplate> {
        let pipelines = self.client.pipelines();

        let pipeline_id = pipelines
            .search(pipeline_name)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("pipeline '{pipeline_name}'")))?;
        debug!(pipeline = pipeline_name, pipeline_id, "Pipeline found");

        let piping_count = pipelines.piping_count(pipeline_id).await?;
        if piping_count == 0 {
            return Err(PipelineError::InvalidTemplate(format!(
                "pipeline '{pipeline_name}' has no pipings"
            )));
        }

        let rows = pipelines.default_parameters(pipeline_id).await?;
        let nodes = group_rows(rows);

        info!(
            pipeline = pipeline_name,
            pipeline_id,
            pipings = piping_count,
            nodes = nodes.len(),
            "Resolved pipeline template"
        );

        Ok(PipelineTemplate {
            pipeline_id,
            name: pipeline_name.to_string(),
            piping_count,
            nodes,
        })
    }
}
