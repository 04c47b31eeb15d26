//! Client for the pfdcm PACS bridge.
//!
//! Only reachability is checked here; the PACS nodes of a pipeline talk to
//! pfdcm themselves.

use std::time::Duration;

use url::Url;

use crate::collection::ParsedResult;
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::transport::{DEFAULT_TIMEOUT, HttpCore, Request};

/// Unauthenticated pfdcm client rooted at its API version, e.g.
/// `http://localhost:4005/api/v1/`.
#[derive(Debug, Clone)]
pub struct PfdcmClient {
    core: HttpCore,
    retry: RetryPolicy,
}

impl PfdcmClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            core: HttpCore::new(base_url, DEFAULT_TIMEOUT, None)?,
            retry: RetryPolicy::default(),
        })
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.core = HttpCore::new(self.core.base_url().as_str(), timeout, None)?;
        Ok(self)
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn base_url(&self) -> &Url {
        self.core.base_url()
    }

    /// `GET hello/`, the service's liveness endpoint.
    pub async fn hello(&self) -> Result<ParsedResult> {
        let request = Request::get("hello/");
        self.retry
            .run("pfdcm hello", || self.core.send(&request, None))
            .await
    }

    pub async fn is_healthy(&self) -> bool {
        self.hello().await.is_ok()
    }
}
