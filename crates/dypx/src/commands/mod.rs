//! CLI command handlers.

pub mod launch;
pub mod run;
pub mod status;
pub mod wait;

use std::time::Duration;

use anyhow::{Context as _, Result};
use dypx_client::{CubeClient, PfdcmClient, RetryPolicy, TransportKind};
use dypx_config::DypxConfig;
use dypx_pipeline::{MonitorOutcome, PipelineConfig, PipelineEngine};
use serde_json::Value;
use tracing::warn;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Merged configuration with CLI overrides applied.
    pub config: DypxConfig,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Build a backend client from `[backend]` and `[retry]`.
    pub fn client(&self) -> Result<CubeClient> {
        let backend = self.config.backend();
        let kind: TransportKind = backend.transport.parse()?;

        let mut builder = CubeClient::builder()
            .base_url(&backend.url)
            .transport(kind)
            .timeout(Duration::from_secs(backend.timeout_secs))
            .retry(self.retry_policy());
        builder = match kind {
            TransportKind::Token => builder.token(&backend.token),
            TransportKind::Session => builder.credentials(&backend.username, &backend.password),
        };
        builder
            .build()
            .with_context(|| format!("Failed to create client for {}", backend.url))
    }

    /// Retry policy from `[retry]`.
    pub fn retry_policy(&self) -> RetryPolicy {
        let retry = self.config.retry();
        RetryPolicy::new(retry.max_attempts).with_backoff(
            Duration::from_secs(retry.multiplier_secs),
            Duration::from_secs(retry.min_delay_secs),
            Duration::from_secs(retry.max_delay_secs),
        )
    }

    /// Build a pfdcm client sharing the backend timeout and retry policy.
    pub fn pfdcm(&self, url: &str) -> Result<PfdcmClient> {
        let timeout = Duration::from_secs(self.config.backend().timeout_secs);
        Ok(PfdcmClient::new(url)
            .and_then(|c| c.with_timeout(timeout))
            .with_context(|| format!("Failed to create pfdcm client for {url}"))?
            .with_retry(self.retry_policy()))
    }

    /// Build the pipeline engine.
    pub fn engine(&self) -> Result<PipelineEngine> {
        Ok(PipelineEngine::new(
            self.client()?,
            PipelineConfig::from(&self.config),
        ))
    }
}

/// Join the engine's monitors; Ctrl-C cancels the ones still polling.
pub async fn await_monitors(engine: &PipelineEngine) -> Vec<MonitorOutcome> {
    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling workflow monitors");
            engine.registry().cancel_all();
        }
        std::future::pending::<()>().await
    };

    tokio::select! {
        outcomes = engine.join_monitors() => outcomes,
        () = interrupt => Vec::new(),
    }
}

/// Split `title:name=value` into its parts.
pub fn parse_param(raw: &str) -> Result<(String, String, String), String> {
    let (title, assignment) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected 'title:name=value', got '{raw}'"))?;
    let (name, value) = assignment
        .split_once('=')
        .ok_or_else(|| format!("expected 'title:name=value', got '{raw}'"))?;
    if title.is_empty() || name.is_empty() {
        return Err(format!("title and name must be non-empty in '{raw}'"));
    }
    Ok((title.to_string(), name.to_string(), value.to_string()))
}

/// Parameter values that read as a JSON scalar keep that type.
pub fn param_value(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Bool(_) | Value::Number(_) | Value::Null)) => value,
        _ => Value::String(raw.to_string()),
    }
}
