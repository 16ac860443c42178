use std::time::Duration;

/// Status code the mirrored service puts in every successful JSON body.
pub const SUCCESS_CODE: i64 = 200;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("upstream returned code {code}")]
    Upstream { code: i64 },
    #[error("malformed response: {0}")]
    Decode(String),
    /// Every endpoint in every tier failed; this is the only failure callers see.
    #[error("no API endpoint reachable ({attempts} attempts failed)")]
    Unreachable { attempts: usize },
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::Decode(e.to_string())
    }
}
