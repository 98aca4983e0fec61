use std::{
    env, fmt, fs, io,
    path::Path,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use tracing::warn;

use crate::{errors::Error, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DEFAULT_API_URL: &str = "https://www.nationstates.net/cgi-bin/api.cgi";

/// Hard floor for the pacing delay between two telegrams.
pub const MIN_DELAY: Duration = Duration::from_secs(30);
/// Below this the directory service only tolerates non-recruitment telegrams.
pub const RECRUITMENT_MIN_DELAY: Duration = Duration::from_secs(180);
/// Shortest accepted interval between two membership polls.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Identification sent as the `User-Agent` of every request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserAgent {
    pub operator: String,
    pub script_name: String,
    pub script_version: String,
}

impl UserAgent {
    pub fn new(
        operator: impl Into<String>,
        script_name: impl Into<String>,
        script_version: impl Into<String>,
    ) -> Self {
        Self {
            operator: operator.into(),
            script_name: script_name.into(),
            script_version: script_version.into(),
        }
    }
}

impl fmt::Display for UserAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tgq v{VERSION} used by nation={} in script={} v{}",
            self.operator, self.script_name, self.script_version
        )
    }
}

/// How the governor reacts to rate-limit signals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Remaining quota at or below which requests are proactively spread out.
    pub low_water_mark: u32,
    /// Give up after this many consecutive 429s. `None` retries forever.
    pub max_retries: Option<u32>,
    /// Wait used when a 429 carries no usable `Retry-After`.
    pub fallback_retry_after: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            low_water_mark: 7,
            max_retries: None,
            fallback_retry_after: Duration::from_secs(30),
        }
    }
}

/// Process-wide client configuration.
///
/// Survives `stop()`/`start()` cycles; only the facade mutates it.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub client_key: Option<String>,
    pub user_agent: Option<UserAgent>,
    delay: Duration,
    /// Interval between two membership polls of a dynamic campaign.
    pub poll_interval: Duration,
    /// How long the scheduler parks when the queue is empty before re-checking.
    pub idle_interval: Duration,
    pub api_url: String,
    pub rate_limit: RateLimitPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_key: None,
            user_agent: None,
            delay: Duration::from_secs(185),
            poll_interval: Duration::from_secs(60),
            idle_interval: Duration::from_secs(1),
            api_url: DEFAULT_API_URL.to_string(),
            rate_limit: RateLimitPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(client_key: impl Into<String>, user_agent: UserAgent) -> Self {
        Self {
            client_key: Some(client_key.into()),
            user_agent: Some(user_agent),
            ..Self::default()
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Set the pacing delay in seconds.
    ///
    /// Values under 180 s are accepted, but then the caller must not use them for
    /// recruitment telegrams.
    pub fn set_delay(&mut self, seconds: u64) -> Result<()> {
        let delay = Duration::from_secs(seconds);
        if delay < MIN_DELAY {
            return Err(Error::Config(format!(
                "delay can't be less than {} seconds (got {seconds})",
                MIN_DELAY.as_secs()
            )));
        }
        if delay < RECRUITMENT_MIN_DELAY {
            warn!(
                seconds,
                "delay below {}s: do not use it for recruitment telegrams",
                RECRUITMENT_MIN_DELAY.as_secs()
            );
        }
        self.delay = delay;
        Ok(())
    }

    pub fn with_delay(mut self, seconds: u64) -> Result<Self> {
        self.set_delay(seconds)?;
        Ok(self)
    }

    /// Set how often dynamic campaigns re-fetch membership. Zero is rejected.
    pub fn set_poll_interval(&mut self, seconds: u64) -> Result<()> {
        let interval = Duration::from_secs(seconds);
        if interval < MIN_POLL_INTERVAL {
            return Err(Error::Config(format!(
                "poll interval must be at least {} second(s) (got {seconds})",
                MIN_POLL_INTERVAL.as_secs()
            )));
        }
        self.poll_interval = interval;
        Ok(())
    }

    /// Credentials and identification required before anything is sent.
    pub fn ensure_ready(&self) -> Result<()> {
        if self.client_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            return Err(Error::Config("no client key provided".to_string()));
        }
        if self.user_agent.is_none() {
            return Err(Error::Config("please set a user agent".to_string()));
        }
        Ok(())
    }

    /// Load from `TGQ_*` environment variables (and `./.env` if present).
    pub fn from_env() -> Result<Self> {
        Self::from_env_file(Path::new(".env"))
    }

    /// Like [`ClientConfig::from_env`], reading the dotenv file at `dotenv`.
    ///
    /// Variables already in the environment are never overridden by the file.
    pub fn from_env_file(dotenv: &Path) -> Result<Self> {
        load_dotenv_if_present(dotenv);

        let mut cfg = Self {
            client_key: env_str("TGQ_CLIENT_KEY").and_then(non_empty),
            ..Self::default()
        };

        if let Some(operator) = env_str("TGQ_OPERATOR").and_then(non_empty) {
            cfg.user_agent = Some(UserAgent::new(
                operator,
                env_str("TGQ_SCRIPT_NAME").unwrap_or_else(|| "tgq".to_string()),
                env_str("TGQ_SCRIPT_VERSION").unwrap_or_else(|| VERSION.to_string()),
            ));
        }

        if let Some(delay) = env_u64("TGQ_DELAY_SECS")? {
            cfg.set_delay(delay)?;
        }
        if let Some(secs) = env_u64("TGQ_POLL_INTERVAL_SECS")? {
            cfg.set_poll_interval(secs)?;
        }
        if let Some(url) = env_str("TGQ_API_URL").and_then(non_empty) {
            cfg.api_url = url;
        }
        if let Some(max) = env_u64("TGQ_MAX_RATE_LIMIT_RETRIES")? {
            let max = u32::try_from(max).map_err(|_| {
                Error::Config(format!("TGQ_MAX_RATE_LIMIT_RETRIES out of range: {max}"))
            })?;
            cfg.rate_limit.max_retries = Some(max);
        }

        Ok(cfg)
    }
}

/// Configuration handle shared by the facade, scheduler, and governor.
///
/// Readers take a snapshot per iteration so re-configuration applies on the next
/// request without restarting anything.
#[derive(Clone, Debug, Default)]
pub struct SharedConfig(Arc<RwLock<ClientConfig>>);

impl SharedConfig {
    pub fn new(cfg: ClientConfig) -> Self {
        Self(Arc::new(RwLock::new(cfg)))
    }

    pub fn snapshot(&self) -> ClientConfig {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn update<T>(&self, f: impl FnOnce(&mut ClientConfig) -> T) -> T {
        let mut guard = self.0.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    let Some(raw) = env_str(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(Some)
        .map_err(|_| Error::Config(format!("{key} must be a whole number, got {raw:?}")))
}

/// Export `KEY=value` lines from `path` into the process environment.
///
/// Returns how many variables were set. A missing file is not an error; lines that
/// are not assignments are skipped with a warning naming the line number.
fn load_dotenv_if_present(path: &Path) -> usize {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read dotenv file");
            return 0;
        }
    };

    let mut exported = 0usize;
    for (idx, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let Some((key, value)) = line
            .split_once('=')
            .map(|(k, v)| (k.trim(), v.trim()))
            .filter(|(k, _)| !k.is_empty())
        else {
            warn!(path = %path.display(), line = idx + 1, "skipping malformed dotenv line");
            continue;
        };
        if env::var_os(key).is_some() {
            continue;
        }

        env::set_var(key, unquote(value));
        exported += 1;
    }
    exported
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .iter()
        .find_map(|q| {
            value
                .strip_prefix(*q)
                .and_then(|v| v.strip_suffix(*q))
        })
        .unwrap_or(value)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
