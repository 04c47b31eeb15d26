//! HTTP client SDK for the ChRIS (CUBE) processing backend.
//!
//! This crate provides a typed client for the parts of the CUBE API that the
//! workflow engine drives: pipeline lookup, workflow creation and status,
//! plugin instances and feeds.
//!
//! # Example
//!
//! ```no_run
//! use dypx_client::{CubeClient, Result, RetryPolicy};
//!
//! # async fn example() -> Result<()> {
//! let client = CubeClient::builder()
//!     .base_url("http://localhost:8000/api/v1/")
//!     .token("secret")
//!     .retry(RetryPolicy::default())
//!     .build()?;
//!
//! if let Some(pipeline_id) = client.pipelines().search("pacs-pull").await? {
//!     let nodes = client.pipelines().piping_count(pipeline_id).await?;
//!     println!("pipeline {pipeline_id} has {nodes} nodes");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Transports
//!
//! All requests go through a [`Transport`]. [`TokenTransport`] sends a fixed
//! API token; [`SessionTransport`] logs in with username/password. Either is
//! wrapped in a [`RetryingTransport`] that retries transient failures with
//! exponential backoff.

pub mod api;
pub mod client;
pub mod collection;
pub mod error;
pub mod pfdcm;
pub mod retry;
pub mod transport;
pub mod types;

pub use client::{ClientBuilder, CubeClient};
pub use collection::{ParsedResult, Record, parse_body};
pub use error::{Error, Result};
pub use pfdcm::PfdcmClient;
pub use retry::{RetryPolicy, RetryPredicate};
pub use transport::{
    HttpCore, Method, Request, RetryingTransport, SessionTransport, TokenTransport, Transport,
    TransportKind,
};
pub use types::*;
