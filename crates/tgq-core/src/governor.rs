use std::{sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    config::SharedConfig,
    errors::Error,
    ports::{ApiRequest, ApiResponse, DirectoryTransport},
    Result,
};

/// Wraps every directory/send call with the service's rate-limit protocol.
///
/// - 429: wait exactly `Retry-After`, then reissue the identical request.
/// - anything else: if the remaining quota is at or below the low-water mark, wait
///   `reset / remaining` before handing the response back, to spread the next calls.
pub struct RateLimitGovernor {
    transport: Arc<dyn DirectoryTransport>,
    config: SharedConfig,
}

impl RateLimitGovernor {
    pub fn new(transport: Arc<dyn DirectoryTransport>, config: SharedConfig) -> Self {
        Self { transport, config }
    }

    pub fn transport(&self) -> &Arc<dyn DirectoryTransport> {
        &self.transport
    }

    /// Send `req` and pace the caller: [`send`](Self::send) followed by the
    /// proactive wait, if any.
    pub async fn execute(&self, req: &ApiRequest) -> Result<ApiResponse> {
        let resp = self.send(req).await?;
        if let Some(wait) = self.pacing(&resp) {
            sleep(wait).await;
        }
        Ok(resp)
    }

    /// Send `req`, waiting out and reissuing on every 429 until a real response.
    ///
    /// Does not apply the proactive wait; callers that need to act on the response
    /// before slowing down use [`pacing`](Self::pacing) themselves.
    pub async fn send(&self, req: &ApiRequest) -> Result<ApiResponse> {
        let mut retries = 0u32;
        loop {
            let cfg = self.config.snapshot();
            let user_agent = cfg
                .user_agent
                .as_ref()
                .map(ToString::to_string)
                .ok_or_else(|| Error::Config("please set a user agent".to_string()))?;
            let policy = cfg.rate_limit;

            let resp = self.transport.post(&user_agent, req).await?;
            if !resp.is_rate_limited() {
                return Ok(resp);
            }

            if let Some(max) = policy.max_retries {
                if retries >= max {
                    return Err(Error::RateLimited { attempts: retries });
                }
            }
            retries += 1;

            let wait = resp
                .retry_after
                .map(Duration::from_secs)
                .unwrap_or(policy.fallback_retry_after);
            warn!(
                query = describe(req),
                retry_after_secs = wait.as_secs(),
                "hit API rate limit, retrying"
            );
            sleep(wait).await;
        }
    }

    /// How long to hold off before the next request after `resp`.
    pub fn pacing(&self, resp: &ApiResponse) -> Option<Duration> {
        let low_water_mark = self.config.snapshot().rate_limit.low_water_mark;
        let wait = proactive_wait(resp, low_water_mark)?;
        info!(
            remaining = ?resp.ratelimit_remaining,
            wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
            "close to rate limit, slowing down"
        );
        Some(wait)
    }
}

/// Wait before the next request when the quota is nearly used up.
///
/// With nothing left the whole reset window is waited out.
pub fn proactive_wait(resp: &ApiResponse, low_water_mark: u32) -> Option<Duration> {
    let remaining = resp.ratelimit_remaining?;
    if remaining > low_water_mark {
        return None;
    }
    let reset = resp.ratelimit_reset?;
    if remaining == 0 {
        return Some(Duration::from_secs(reset));
    }
    Some(Duration::from_secs(reset) / remaining)
}

fn describe(req: &ApiRequest) -> &str {
    req.get("q").or_else(|| req.get("a")).unwrap_or("?")
}
