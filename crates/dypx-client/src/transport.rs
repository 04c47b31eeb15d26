//! Transport backends.
//!
//! Every backend call goes through a [`Transport`]. Two interchangeable
//! implementations exist:
//!
//! - [`TokenTransport`]: a pre-issued API token sent on every request.
//! - [`SessionTransport`]: username/password exchanged for a token on first
//!   use, refreshed once when the backend rejects it.
//!
//! [`RetryingTransport`] composes a [`RetryPolicy`] around either one.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::RwLock;
use url::Url;

pub use reqwest::Method;

use crate::collection::{ParsedResult, parse_body};
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Endpoint used by [`SessionTransport`] to obtain a token.
const AUTH_TOKEN_PATH: &str = "auth-token/";

/// Longest response body echoed back in an [`Error::Api`] message.
const MAX_ERROR_BODY: usize = 512;

/// A single backend request.
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method.
    pub method: Method,
    /// Endpoint path relative to the API root (e.g. `pipelines/search/`).
    pub path: String,
    /// Query string pairs.
    pub query: Vec<(String, String)>,
    /// Optional JSON payload.
    pub body: Option<Value>,
}

impl Request {
    /// Create a request.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// A GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// A POST request with a JSON payload.
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    /// Append a query pair.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Attach a JSON payload.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Short label used in logs.
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// Capability to execute backend requests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute a request and decode its body.
    async fn call(&self, request: &Request) -> Result<ParsedResult>;

    /// Name of this transport, for logs.
    fn name(&self) -> &str;
}

/// Which transport backend to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Pre-issued API token.
    #[default]
    Token,
    /// Username/password session.
    Session,
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "token" => Ok(TransportKind::Token),
            "session" => Ok(TransportKind::Session),
            other => Err(Error::Config(format!("unknown transport kind '{other}'"))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared HTTP plumbing
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP state shared by both backends.
#[derive(Debug, Clone)]
pub struct HttpCore {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpCore {
    /// Build the HTTP client for an API root such as
    /// `http://localhost:8000/api/v1/`.
    pub fn new(base_url: &str, timeout: Duration, user_agent: Option<String>) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.collection+json, application/json"),
        );

        let user_agent =
            user_agent.unwrap_or_else(|| format!("dypx-client/{}", env!("CARGO_PKG_VERSION")));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(user_agent)
            .build()?;

        Ok(Self {
            http,
            base_url,
            timeout,
        })
    }

    /// The API root.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build a URL for an endpoint path.
    pub fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(Error::from)
    }

    /// Send one attempt of `request`.
    pub(crate) async fn send(
        &self,
        request: &Request,
        auth: Option<&HeaderValue>,
    ) -> Result<ParsedResult> {
        let url = self.url(&request.path)?;
        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .timeout(self.timeout);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(auth) = auth {
            builder = builder.header(AUTHORIZATION, auth.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return parse_body(&body);
        }

        let mut message = body.trim().to_string();
        if message.is_empty() {
            message = status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string();
        }
        message.truncate(floor_char_boundary(&message, MAX_ERROR_BODY));

        Err(match status.as_u16() {
            401 => Error::Auth(message),
            404 => Error::NotFound(request.path.clone()),
            code => Error::Api {
                status: code,
                message,
            },
        })
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}

fn token_header(token: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(&format!("Token {token}"))
        .map_err(|_| Error::Config("Invalid auth token".to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Token transport
// ─────────────────────────────────────────────────────────────────────────────

/// Transport authenticating every request with a fixed API token.
#[derive(Debug, Clone)]
pub struct TokenTransport {
    core: HttpCore,
    auth: HeaderValue,
}

impl TokenTransport {
    /// Create a token transport.
    pub fn new(core: HttpCore, token: &str) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(Error::Config("API token is required".to_string()));
        }
        Ok(Self {
            core,
            auth: token_header(token.trim())?,
        })
    }
}

#[async_trait]
impl Transport for TokenTransport {
    async fn call(&self, request: &Request) -> Result<ParsedResult> {
        self.core.send(request, Some(&self.auth)).await
    }

    fn name(&self) -> &str {
        "token"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session transport
// ─────────────────────────────────────────────────────────────────────────────

/// Transport that logs in with username/password and caches the token.
pub struct SessionTransport {
    core: HttpCore,
    username: String,
    password: String,
    token: RwLock<Option<HeaderValue>>,
}

impl SessionTransport {
    /// Create a session transport. No request is made until the first call.
    pub fn new(core: HttpCore, username: &str, password: &str) -> Result<Self> {
        if username.is_empty() {
            return Err(Error::Config("username is required".to_string()));
        }
        Ok(Self {
            core,
            username: username.to_string(),
            password: password.to_string(),
            token: RwLock::new(None),
        })
    }

    async fn authorization(&self) -> Result<HeaderValue> {
        if let Some(token) = self.token.read().await.as_ref() {
            return Ok(token.clone());
        }

        let mut slot = self.token.write().await;
        if let Some(token) = slot.as_ref() {
            return Ok(token.clone());
        }

        tracing::debug!(username = %self.username, "Requesting session token");
        let login = Request::post(
            AUTH_TOKEN_PATH,
            json!({ "username": self.username, "password": self.password }),
        );
        let parsed = self.core.send(&login, None).await?;
        let token = parsed
            .first_value("token")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Auth("no token in auth-token response".to_string()))?;
        let header = token_header(token)?;
        *slot = Some(header.clone());
        Ok(header)
    }

    async fn invalidate(&self) {
        self.token.write().await.take();
    }
}

#[async_trait]
impl Transport for SessionTransport {
    async fn call(&self, request: &Request) -> Result<ParsedResult> {
        let auth = self.authorization().await?;
        match self.core.send(request, Some(&auth)).await {
            Err(Error::Auth(reason)) => {
                tracing::debug!(%reason, "Session token rejected, logging in again");
                self.invalidate().await;
                let auth = self.authorization().await?;
                self.core.send(request, Some(&auth)).await
            }
            other => other,
        }
    }

    fn name(&self) -> &str {
        "session"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry wrapper
// ─────────────────────────────────────────────────────────────────────────────

/// Wraps a transport with a [`RetryPolicy`].
pub struct RetryingTransport<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: Transport> RetryingTransport<T> {
    /// Wrap `inner` with `policy`.
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The retry policy in effect.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The wrapped transport.
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for RetryingTransport<T> {
    async fn call(&self, request: &Request) -> Result<ParsedResult> {
        let label = request.label();
        self.policy
            .run(&label, || self.inner.call(request))
            .await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
