//! Plugins API.

use serde_json::Value;

use crate::client::CubeClient;
use crate::collection::decode;
use crate::error::{Error, Result};
use crate::transport::Request;
use crate::types::PluginInstanceSummary;

/// Plugins API client.
pub struct PluginsApi {
    client: CubeClient,
}

impl PluginsApi {
    pub(crate) fn new(client: CubeClient) -> Self {
        Self { client }
    }

    /// Find a plugin id by name and version.
    pub async fn search(&self, name: &str, version: &str) -> Result<Option<i64>> {
        let result = self
            .client
            .call(
                Request::get("plugins/search/")
                    .query("name", name)
                    .query("version", version),
            )
            .await?;
        Ok(result.first_id("id"))
    }

    /// Schedule a new instance of a plugin and return its id.
    pub async fn create_instance(&self, plugin_id: i64, params: &Value) -> Result<i64> {
        let result = self
            .client
            .call(Request::post(
                format!("plugins/{plugin_id}/instances/"),
                params.clone(),
            ))
            .await?;
        result
            .first_id("id")
            .ok_or_else(|| Error::Malformed("plugin instance could not be scheduled".to_string()))
    }

    /// Fetch one plugin instance.
    pub async fn instance(&self, instance_id: i64) -> Result<PluginInstanceSummary> {
        let result = self
            .client
            .call(Request::get(format!("plugins/instances/{instance_id}/")))
            .await?;
        let record = result.records().first().ok_or_else(|| {
            Error::Malformed(format!("plugin instance {instance_id} returned no record"))
        })?;
        decode(record)
    }
}
