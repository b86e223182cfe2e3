//! # Data Retrieval Module
//!
//! Generic HTTP retrieval used by the upstream telemetry sources.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: A generic HTTP `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`, featuring automatic retries with exponential
//!   backoff on transient failures (timeouts, 5xx, 429).

#![forbid(unsafe_code)]

/// Generic HTTP API client with retry middleware for resilient network requests.
pub mod ky_http;

pub use ky_http::{ApiClient, ApiResponse};
