use thiserror::Error;

/// Errors produced by the lookup pipeline.
///
/// `Clone` is required: a single upstream failure is delivered to the primary
/// caller and to every follower of the same request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FolioError {
    #[error("Lookup queue is full (capacity {capacity}), try again later")]
    ResourceExhausted { capacity: usize },

    #[error("Upstream API error: {0}")]
    Upstream(String),

    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parsing error: {0}")]
    Parsing(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl FolioError {
    /// Whether the caller should retry later rather than treat this as a hard failure.
    pub fn is_busy(&self) -> bool {
        matches!(self, FolioError::ResourceExhausted { .. })
    }
}

impl From<reqwest::Error> for FolioError {
    fn from(err: reqwest::Error) -> Self {
        FolioError::Upstream(err.to_string())
    }
}

impl From<serde_json::Error> for FolioError {
    fn from(err: serde_json::Error) -> Self {
        FolioError::Parsing(err.to_string())
    }
}

impl From<std::io::Error> for FolioError {
    fn from(err: std::io::Error) -> Self {
        FolioError::Cache(err.to_string())
    }
}
