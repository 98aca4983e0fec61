//! HTTP adapter for the directory/send endpoint.
//!
//! One form-encoded POST per request; rate-limit headers are lifted into
//! [`ApiResponse`] for the governor.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER, USER_AGENT};
use tokio::sync::Mutex;
use tracing::debug;

use tgq_core::{
    errors::Error,
    ports::{ApiRequest, ApiResponse, DirectoryTransport},
    Result,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct HttpTransport {
    pub api_url: String,
    timeout: Duration,
    http: Mutex<Option<reqwest::Client>>,
}

impl HttpTransport {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            timeout: DEFAULT_TIMEOUT,
            http: Mutex::new(None),
        }
    }

    /// Per-request timeout. A timed-out request surfaces as a transport error.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pooled client, (re)built on first use after construction or `close()`.
    async fn client(&self) -> Result<reqwest::Client> {
        let mut guard = self.http.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::Transport(format!("http client build error: {e}")))?;
        debug!(api_url = %self.api_url, "opened http client");
        *guard = Some(client.clone());
        Ok(client)
    }
}

#[async_trait]
impl DirectoryTransport for HttpTransport {
    async fn post(&self, user_agent: &str, req: &ApiRequest) -> Result<ApiResponse> {
        let http = self.client().await?;

        let resp = http
            .post(&self.api_url)
            .header(USER_AGENT, user_agent)
            .form(&req.form)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("directory request error: {e}")))?;

        let status = resp.status().as_u16();
        let limits = RateLimitHeaders::from_headers(resp.headers());
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Transport(format!("directory body error: {e}")))?;

        Ok(ApiResponse {
            status,
            retry_after: limits.retry_after,
            ratelimit_remaining: limits.remaining,
            ratelimit_reset: limits.reset,
            body,
        })
    }

    async fn close(&self) {
        if self.http.lock().await.take().is_some() {
            debug!("closed http client");
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct RateLimitHeaders {
    retry_after: Option<u64>,
    remaining: Option<u32>,
    reset: Option<u64>,
}

impl RateLimitHeaders {
    fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            retry_after: header_u64(headers, RETRY_AFTER.as_str()),
            remaining: header_u64(headers, "ratelimit-remaining")
                .and_then(|v| u32::try_from(v).ok()),
            reset: header_u64(headers, "ratelimit-reset"),
        }
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}
