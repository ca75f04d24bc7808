//! Page fetching
//!
//! The orchestrator sees fetching only through the `Fetcher` trait. A run
//! opens one `FetchSession` before its first page and closes it after its
//! last, so stateful backends (a browser process, a cookie jar) live exactly
//! as long as the run.
//!
//! `HttpFetcher` is the plain HTTP implementation. It has no renderer, so
//! every `WaitStrategy` behaves like `Load`.

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, redirect::Policy, Client};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors for a single fetch; never fatal to a run
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP status {status}")]
    Http { status: u16 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Not an HTML page (content type '{0}')")]
    NotHtml(String),

    #[error("Fetch session error: {0}")]
    Session(String),
}

/// When a fetched page counts as loaded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaitStrategy {
    /// The `load` event
    #[default]
    Load,
    /// The `DOMContentLoaded` event
    DomContentLoaded,
    /// No network activity for a short while
    NetworkIdle,
}

impl fmt::Display for WaitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Load => "load",
            Self::DomContentLoaded => "dom-content-loaded",
            Self::NetworkIdle => "network-idle",
        };
        write!(f, "{}", name)
    }
}

/// Source of fetch sessions
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Opens a session for one crawl run
    async fn open_session(&self) -> Result<Box<dyn FetchSession>, FetchError>;
}

/// A fetch session owned by a single run
#[async_trait]
pub trait FetchSession: Send {
    /// Fetches the HTML at `url`
    async fn fetch(&mut self, url: &Url, wait: WaitStrategy) -> Result<String, FetchError>;

    /// Releases the session's resources
    async fn close(&mut self);
}

/// reqwest based fetcher
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Builds an HTTP fetcher
    ///
    /// # Arguments
    ///
    /// * `user_agent` - User agent sent with every request
    /// * `timeout` - Whole-request timeout
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .redirect(Policy::limited(10))
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn open_session(&self) -> Result<Box<dyn FetchSession>, FetchError> {
        Ok(Box::new(HttpSession {
            client: self.client.clone(),
            timeout: self.timeout,
        }))
    }
}

struct HttpSession {
    client: Client,
    timeout: Duration,
}

impl HttpSession {
    fn classify(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else if let Some(status) = error.status() {
            FetchError::Http {
                status: status.as_u16(),
            }
        } else {
            FetchError::Network(error.to_string())
        }
    }
}

#[async_trait]
impl FetchSession for HttpSession {
    async fn fetch(&mut self, url: &Url, _wait: WaitStrategy) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
            });
        }

        // A missing Content-Type is given the benefit of the doubt
        if let Some(content_type) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            let lower = content_type.to_ascii_lowercase();
            if !lower.contains("text/html") && !lower.contains("application/xhtml+xml") {
                return Err(FetchError::NotHtml(content_type.to_string()));
            }
        }

        response.text().await.map_err(|e| self.classify(e))
    }

    async fn close(&mut self) {}
}
