/// Core error type for the telegram queue.
///
/// Adapter crates map their transport failures into this type so the scheduler and
/// campaigns can treat every failure the same way (log it, move on, or surface it to
/// the caller for configuration problems).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected directory response: {0}")]
    Protocol(String),

    #[error("still rate limited after {attempts} retries")]
    RateLimited { attempts: u32 },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
