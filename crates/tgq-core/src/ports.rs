use async_trait::async_trait;

use crate::Result;

/// Form-encoded request to the directory API, fields kept in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApiRequest {
    pub form: Vec<(&'static str, String)>,
}

impl ApiRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.form.push((key, value.into()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// The parts of a directory response the core looks at.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    /// `Retry-After`, seconds. Only meaningful on 429.
    pub retry_after: Option<u64>,
    /// `RateLimit-Remaining`: requests left in the current window.
    pub ratelimit_remaining: Option<u32>,
    /// `RateLimit-Reset`: seconds until the window resets.
    pub ratelimit_reset: Option<u64>,
    pub body: String,
}

impl ApiResponse {
    pub const TOO_MANY_REQUESTS: u16 = 429;

    pub fn is_rate_limited(&self) -> bool {
        self.status == Self::TOO_MANY_REQUESTS
    }
}

/// Hexagonal port for the directory/send endpoint.
///
/// The HTTP adapter lives in `tgq-http`; tests use a scripted fake.
#[async_trait]
pub trait DirectoryTransport: Send + Sync {
    async fn post(&self, user_agent: &str, req: &ApiRequest) -> Result<ApiResponse>;

    /// Release pooled connections. The next `post` must transparently reopen.
    async fn close(&self);
}
