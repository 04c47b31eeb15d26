//! Health API.

use crate::client::CubeClient;
use crate::collection::decode;
use crate::error::{Error, Result};
use crate::transport::Request;
use crate::types::ChrisInstance;

/// Health API client.
pub struct HealthApi {
    client: CubeClient,
}

impl HealthApi {
    pub(crate) fn new(client: CubeClient) -> Self {
        Self { client }
    }

    /// Fetch the CUBE instance descriptor.
    pub async fn check(&self) -> Result<ChrisInstance> {
        let result = self.client.call(Request::get("chrisinstance/1/")).await?;
        let record = result
            .records()
            .first()
            .ok_or_else(|| Error::Malformed("empty chrisinstance response".to_string()))?;
        decode(record)
    }

    /// Simple connectivity check - returns true if the backend answers.
    pub async fn is_healthy(&self) -> bool {
        self.check().await.is_ok()
    }
}
