//! Feeds API.

use crate::client::CubeClient;
use crate::collection::decode;
use crate::error::{Error, Result};
use crate::transport::Request;
use crate::types::FeedDetails;

/// Feeds API client.
pub struct FeedsApi {
    client: CubeClient,
}

impl FeedsApi {
    pub(crate) fn new(client: CubeClient) -> Self {
        Self { client }
    }

    /// Fetch a feed's details. Feeds live directly under the API root.
    pub async fn get(&self, feed_id: i64) -> Result<FeedDetails> {
        let result = self.client.call(Request::get(format!("{feed_id}/"))).await?;
        let record = result
            .records()
            .first()
            .ok_or_else(|| Error::Malformed(format!("feed {feed_id} returned no record")))?;
        decode(record)
    }
}
