use std::io;

#[derive(Debug, thiserror::Error)]
pub enum KoorError {
    #[error("{0}")]
    Usage(String),

    #[error("{0}")]
    ValidationFailed(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl KoorError {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, KoorError>;
