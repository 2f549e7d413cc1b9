//! Character recognition for detected round starts.
//!
//! A [`Recognizer`] takes the selected frame of a detection and returns the
//! characters on both sides, normalized through [`CharacterAliases`].

pub mod aliases;
pub mod error;
pub mod gemini;
pub mod metrics;

use async_trait::async_trait;
use chap_models::PlayerLabels;
use image::RgbImage;

pub use aliases::CharacterAliases;
pub use error::{RecognitionError, RecognitionResult};
pub use gemini::{GeminiConfig, GeminiRecognizer, DEFAULT_MODEL, RECOGNITION_PROMPT};

/// Recognized labels for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recognition {
    /// Canonical names
    pub labels: PlayerLabels,
    /// Names exactly as the model returned them
    pub raw: PlayerLabels,
}

#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, frame: &RgbImage) -> RecognitionResult<Recognition>;
}
