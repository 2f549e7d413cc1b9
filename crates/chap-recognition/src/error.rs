//! Recognition error types.

use thiserror::Error;

pub type RecognitionResult<T> = Result<T, RecognitionError>;

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Gemini API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("No content in Gemini response")]
    EmptyResponse,

    #[error("Failed to parse recognition result: {0}")]
    Parse(String),

    #[error("All models failed, last error: {0}")]
    AllModelsFailed(Box<RecognitionError>),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RecognitionError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Transient failures worth trying on the next model.
    pub fn is_retryable(&self) -> bool {
        match self {
            RecognitionError::Api { status, .. } => *status == 429 || *status >= 500 || *status == 404,
            RecognitionError::Network(_)
            | RecognitionError::EmptyResponse
            | RecognitionError::Parse(_) => true,
            _ => false,
        }
    }
}
