//! Error taxonomy (spec.md §7). `serve` maps each variant to an HTTP status
//! and an OpenAI-shaped error body; streaming responses never surface these
//! as a status code once the first byte is written — they convert to an
//! inline error chunk instead.

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("upstream companion unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("timed out waiting for a response")]
    ResponseTimeout,
    #[error("session is dead")]
    SessionDead,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

pub type BridgeResult<T> = Result<T, BridgeError>;
