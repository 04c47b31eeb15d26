//! Main client implementation.

use std::sync::Arc;
use std::time::Duration;

use crate::api::{FeedsApi, HealthApi, PipelinesApi, PluginsApi, WorkflowsApi};
use crate::collection::ParsedResult;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::transport::{
    DEFAULT_TIMEOUT, HttpCore, Request, RetryingTransport, SessionTransport, TokenTransport,
    Transport, TransportKind,
};

/// CUBE API client.
///
/// Cheap to clone; clones share one transport. Every call goes through the
/// transport the client was built with, which normally includes a retry
/// policy.
///
/// # Example
///
/// ```no_run
/// use dypx_client::CubeClient;
///
/// # async fn example() -> dypx_client::Result<()> {
/// let client = CubeClient::builder()
///     .base_url("http://localhost:8000/api/v1/")
///     .token("secret")
///     .build()?;
///
/// let id = client.pipelines().search("pacs-pull").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CubeClient {
    transport: Arc<dyn Transport>,
}

impl CubeClient {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Create a client over an existing transport.
    pub fn from_transport(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    // ─────────────────────────────────────────────────────────────────────────
    // API accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Access the pipelines API.
    pub fn pipelines(&self) -> PipelinesApi {
        PipelinesApi::new(self.clone())
    }

    /// Access the workflows API.
    pub fn workflows(&self) -> WorkflowsApi {
        WorkflowsApi::new(self.clone())
    }

    /// Access the plugins API.
    pub fn plugins(&self) -> PluginsApi {
        PluginsApi::new(self.clone())
    }

    /// Access the feeds API.
    pub fn feeds(&self) -> FeedsApi {
        FeedsApi::new(self.clone())
    }

    /// Access the health API.
    pub fn health(&self) -> HealthApi {
        HealthApi::new(self.clone())
    }

    /// Execute a raw request.
    pub async fn call(&self, request: Request) -> Result<ParsedResult> {
        self.transport.call(&request).await
    }
}

/// Builder for creating a CubeClient.
#[derive(Debug)]
pub struct ClientBuilder {
    base_url: Option<String>,
    kind: TransportKind,
    token: Option<String>,
    username: Option<String>,
    password: Option<String>,
    timeout: Duration,
    user_agent: Option<String>,
    retry: RetryPolicy,
}

impl ClientBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            base_url: None,
            kind: TransportKind::Token,
            token: None,
            username: None,
            password: None,
            timeout: DEFAULT_TIMEOUT,
            user_agent: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Set the API root (e.g. `http://localhost:8000/api/v1/`).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Select the transport backend.
    pub fn transport(mut self, kind: TransportKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the API token (token transport).
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set login credentials (session transport).
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Set the retry policy.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<CubeClient> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::Config("base_url is required".to_string()))?;
        let core = HttpCore::new(&base_url, self.timeout, self.user_agent)?;

        let transport: Arc<dyn Transport> = match self.kind {
            TransportKind::Token => {
                let token = self.token.unwrap_or_default();
                Arc::new(RetryingTransport::new(
                    TokenTransport::new(core, &token)?,
                    self.retry,
                ))
            }
            TransportKind::Session => {
                let username = self.username.unwrap_or_default();
                let password = self.password.unwrap_or_default();
                Arc::new(RetryingTransport::new(
                    SessionTransport::new(core, &username, &password)?,
                    self.retry,
                ))
            }
        };

        Ok(CubeClient { transport })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_base_url() {
        let result = ClientBuilder::new().token("t").build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_requires_token_for_token_transport() {
        let result = ClientBuilder::new()
            .base_url("http://localhost:8000/api/v1/")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_selects_transport() {
        let client = ClientBuilder::new()
            .base_url("http://localhost:8000/api/v1/")
            .token("t")
            .build()
            .unwrap();
        assert_eq!(client.transport().name(), "token");

        let client = ClientBuilder::new()
            .base_url("http://localhost:8000/api/v1/")
            .transport(TransportKind::Session)
            .credentials("chris", "chris1234")
            .build()
            .unwrap();
        assert_eq!(client.transport().name(), "session");
    }

    #[test]
    fn test_builder_rejects_bad_url() {
        let result = ClientBuilder::new().base_url("not a url").token("t").build();
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }
}
