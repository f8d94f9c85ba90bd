//! External content fetcher
//!
//! This module handles the HTTP side of icon ingestion:
//! - Building the HTTP client with a proper user agent
//! - A redirect policy that leaves HTTP 308 to the pipeline
//! - Classifying response codes and transport errors

use crate::config::UserAgentConfig;
use crate::storage::ByteStream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{redirect::Policy, Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Redirect hops the HTTP client follows on its own (301/302/303/307)
pub const MAX_TRANSPORT_REDIRECTS: usize = 10;

/// Response of a single GET request
pub struct FetchResponse {
    /// HTTP status code
    pub status: u16,

    /// Raw `Location` header value, if any
    pub location: Option<String>,

    /// Response body
    pub body: ByteStream,
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

/// Transport-level failure of a request
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Transport error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("Invalid request for {url}: {message}")]
    Invalid { url: String, message: String },
}

impl FetchError {
    /// Returns true if another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport { .. })
    }
}

/// Classification of a response status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    /// HTTP 308, followed by the pipeline itself
    ManualRedirect,
    Terminal,
    Retryable,
}

/// Classifies a status code
///
/// | Condition | Classification |
/// |-----------|----------------|
/// | 2xx | Success |
/// | 404 | Terminal |
/// | other 4xx, 301, 302 | Terminal |
/// | 308 | ManualRedirect |
/// | 5xx or other non-success | Retryable |
///
/// 301 and 302 only reach the pipeline when the client gave up following a
/// redirect chain that was too long.
pub fn classify_status(status: u16) -> ResponseClass {
    match status {
        200..=299 => ResponseClass::Success,
        308 => ResponseClass::ManualRedirect,
        301 | 302 => ResponseClass::Terminal,
        400..=499 => ResponseClass::Terminal,
        _ => ResponseClass::Retryable,
    }
}

/// Performs GET requests against external hosts
///
/// Implementations must not follow HTTP 308 on their own.
#[async_trait]
pub trait ExternalFetcher: Send + Sync {
    async fn get(&self, url: &Url) -> Result<FetchResponse, FetchError>;
}

/// Builds an HTTP client for external icon hosts
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `timeout` - Overall request timeout
pub fn build_http_client(config: &UserAgentConfig, timeout: Duration) -> Result<Client, reqwest::Error> {
    // Format: Name/Version (+ContactURL)
    let user_agent = format!("{}/{} (+{})", config.name, config.version, config.contact_url);

    let policy = Policy::custom(|attempt| {
        if attempt.status() == StatusCode::PERMANENT_REDIRECT
            || attempt.previous().len() >= MAX_TRANSPORT_REDIRECTS
        {
            attempt.stop()
        } else {
            attempt.follow()
        }
    });

    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .redirect(policy)
        .gzip(true)
        .brotli(true)
        .build()
}

/// `reqwest`-based fetcher
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExternalFetcher for HttpFetcher {
    async fn get(&self, url: &Url) -> Result<FetchResponse, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify_error(url, e))?;

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)))
            .boxed();

        Ok(FetchResponse {
            status,
            location,
            body,
        })
    }
}

fn classify_error(url: &Url, e: reqwest::Error) -> FetchError {
    let url = url.to_string();
    if e.is_timeout() {
        FetchError::Timeout { url }
    } else if e.is_builder() || e.is_redirect() {
        FetchError::Invalid {
            url,
            message: e.to_string(),
        }
    } else {
        FetchError::Transport {
            url,
            message: e.to_string(),
        }
    }
}
