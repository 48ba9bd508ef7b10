//! # studysync client
//!
//! Remote client for the studysync events API.
//!
//! This crate provides:
//! - [`RemoteApi`], the seam the sync engine talks to
//! - [`ApiClient`], which applies the bearer credential, enforces request
//!   timeouts and retries transient failures
//! - [`HttpClient`], an abstraction over the actual HTTP stack with a
//!   blocking `reqwest` implementation in [`ReqwestClient`]
//! - [`ClientError`], which classifies failures so callers can tell
//!   transient problems from fatal ones
//!
//! ## Retry policy
//!
//! Timeouts, connection failures, 5xx responses and 429 responses are
//! retried up to [`RetryConfig::max_retries`] times. 401, 403, 404 and other
//! 4xx responses fail immediately.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod api;
mod config;
mod error;
mod http;

pub use api::{ApiClient, RemoteApi};
pub use config::{ApiKey, ClientConfig, RetryConfig, DEFAULT_BASE_URL};
pub use error::{ClientError, ClientResult};
pub use http::{HttpClient, HttpRequest, HttpResponse, ReqwestClient};
