#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("benchmark cancelled")]
    Cancelled,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid endpoint '{line}': {reason}")]
    InvalidEndpoint { line: String, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BenchError {
    pub fn invalid_endpoint(line: impl Into<String>, reason: impl Into<String>) -> Self {
        BenchError::InvalidEndpoint {
            line: line.into(),
            reason: reason.into(),
        }
    }
}
