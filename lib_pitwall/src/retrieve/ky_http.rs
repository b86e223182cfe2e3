//! # HTTP Retrieval Utilities
//!
//! This module provides an asynchronous API client wrapper around `reqwest`.
//! It includes middleware support for exponential backoff retries and
//! standardized JSON response handling.

use reqwest::{header::HeaderMap, Method};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

/// A standardized container for API responses.
///
/// This struct wraps the deserialized data along with metadata about the
/// HTTP transaction, such as status codes and headers.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The successfully deserialized response body, if any.
    pub data: Option<T>,
    /// The raw error body returned by the server if the request failed.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    /// The headers returned by the server.
    pub headers: HeaderMap,
}

/// A flexible asynchronous HTTP client.
///
/// Built on top of `reqwest_middleware`, it handles base URLs, query strings
/// and automatic retries.
pub struct ApiClient {
    /// The underlying middleware-enabled client.
    inner: ClientWithMiddleware,
    /// The base URL to which all relative paths are joined.
    base_url: Url,
}

impl ApiClient {
    /// Creates a new `ApiClient` with a retry policy of `max_retries` attempts.
    ///
    /// # Errors
    /// Fails if `base_url` is not an absolute URL or the client cannot be built.
    pub fn new(base_url: &str, timeout: Duration, max_retries: u32) -> anyhow::Result<Self> {
        // A trailing slash makes `join` append instead of replacing the last segment.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let url = Url::parse(&normalized)?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Pitwall/0.1")
            .build()?;
        let client = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner: client,
            base_url: url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs a request and decodes a JSON body on success.
    ///
    /// Non-2xx answers are not errors: they come back with `success = false`
    /// and the raw body in `error_body`.
    ///
    /// # Errors
    /// Returns an `anyhow::Error` if URL joining, network execution or JSON
    /// decoding of a successful response fails.
    pub async fn request<T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
    ) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
    {
        let mut full_url = self.base_url.join(path)?;
        if !query.is_empty() {
            full_url.query_pairs_mut().extend_pairs(query);
        }

        let response: reqwest::Response = self.inner.request(method, full_url).send().await?;
        let status = response.status();
        let resp_headers = response.headers().clone();

        if status.is_success() {
            let data = response.json::<T>().await?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers: resp_headers,
            })
        } else {
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
                headers: resp_headers,
            })
        }
    }

    /// Shorthand for a `GET` with query parameters.
    pub async fn get_json<T>(&self, path: &str, query: &[(&str, &str)]) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
    {
        self.request(Method::GET, path, query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_a_trailing_slash() {
        let client = ApiClient::new("https://api.openf1.org/v1", Duration::from_secs(5), 0).unwrap();
        assert_eq!(client.base_url().join("laps").unwrap().as_str(), "https://api.openf1.org/v1/laps");
    }

    #[test]
    fn relative_base_url_is_rejected() {
        assert!(ApiClient::new("api.openf1.org/v1", Duration::from_secs(5), 0).is_err());
    }
}
