use thiserror::Error;

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Rate limited: {retry_after:?}")]
    RateLimit { retry_after: Option<u64> },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Object not found")]
    NotFound,

    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl DirectoryError {
    /// Network, throttling and 5xx failures; everything else is a permanent answer.
    pub fn is_transient(&self) -> bool {
        match self {
            DirectoryError::Network(_) => true,
            DirectoryError::Server { status, .. } if *status >= 500 => true,
            DirectoryError::RateLimit { .. } => true,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DirectoryError::NotFound)
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            DirectoryError::RateLimit { retry_after } => *retry_after,
            _ => None,
        }
    }

    pub(crate) fn blank_id(what: &str) -> Self {
        DirectoryError::Validation(format!("{} ID cannot be empty", what))
    }
}

pub type Result<T> = std::result::Result<T, DirectoryError>;
