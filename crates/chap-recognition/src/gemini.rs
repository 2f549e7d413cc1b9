//! Gemini-backed character recognizer.
//!
//! The cropped name-plate frame is sent inline as PNG together with a fixed
//! prompt asking for `{"1p": ..., "2p": ...}`. Models are tried in order
//! until one answers with parseable JSON.

use std::io::Cursor;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chap_models::PlayerLabels;
use image::{ImageOutputFormat, RgbImage};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aliases::CharacterAliases;
use crate::error::{RecognitionError, RecognitionResult};
use crate::{Recognition, Recognizer};

/// Default primary model.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";

/// Models tried after the primary one fails.
pub const DEFAULT_FALLBACK_MODELS: [&str; 2] = ["gemini-2.0-flash", "gemini-1.5-flash"];

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Prompt sent with every frame.
pub const RECOGNITION_PROMPT: &str = concat!(
    "この画像はストリートファイター6のラウンド開始画面です。",
    "左側のキャラクターを1p、右側のキャラクターを2pとし、",
    "それぞれのキャラクター名をJSONで返してください。",
    r#"例: {"1p": "Ryu", "2p": "Ken"}"#
);

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    /// Tried in order
    pub models: Vec<String>,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        let mut models = vec![DEFAULT_MODEL.to_string()];
        models.extend(DEFAULT_FALLBACK_MODELS.iter().map(|m| m.to_string()));
        Self {
            api_key: String::new(),
            models,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl GeminiConfig {
    /// `GEMINI_API_KEY` (required), `GEMINI_MODEL`, `GEMINI_FALLBACK_MODELS`
    /// (comma separated, empty for none), `GEMINI_BASE_URL`,
    /// `GEMINI_TIMEOUT_SECS`.
    pub fn from_env() -> RecognitionResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| RecognitionError::config("GEMINI_API_KEY must be set"))?;

        let defaults = Self::default();
        let primary = std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let fallbacks: Vec<String> = match std::env::var("GEMINI_FALLBACK_MODELS") {
            Ok(list) => list
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(String::from)
                .collect(),
            Err(_) => DEFAULT_FALLBACK_MODELS.iter().map(|m| m.to_string()).collect(),
        };

        let mut models = vec![primary];
        for model in fallbacks {
            if !models.contains(&model) {
                models.push(model);
            }
        }

        Ok(Self {
            api_key,
            models,
            base_url: std::env::var("GEMINI_BASE_URL").unwrap_or(defaults.base_url),
            timeout: std::env::var("GEMINI_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        })
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum Part {
    Text(String),
    InlineData(InlineData),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: &'static str,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

// =============================================================================
// Recognizer
// =============================================================================

pub struct GeminiRecognizer {
    config: GeminiConfig,
    client: Client,
    aliases: CharacterAliases,
}

impl GeminiRecognizer {
    pub fn new(config: GeminiConfig, aliases: CharacterAliases) -> RecognitionResult<Self> {
        if config.models.is_empty() {
            return Err(RecognitionError::config("At least one Gemini model is required"));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("chap-recognition/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            config,
            client,
            aliases,
        })
    }

    pub fn from_env(aliases: CharacterAliases) -> RecognitionResult<Self> {
        Self::new(GeminiConfig::from_env()?, aliases)
    }

    pub fn models(&self) -> &[String] {
        &self.config.models
    }

    async fn call_model(&self, model: &str, image_b64: &str) -> RecognitionResult<PlayerLabels> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model
        );
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text(RECOGNITION_PROMPT.to_string()),
                    Part::InlineData(InlineData {
                        mime_type: "image/png",
                        data: image_b64.to_string(),
                    }),
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
            },
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RecognitionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateResponse = response.json().await?;
        let text = body
            .candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
            .find_map(|p| p.text.as_deref())
            .ok_or(RecognitionError::EmptyResponse)?;

        parse_labels(text)
    }
}

#[async_trait]
impl Recognizer for GeminiRecognizer {
    async fn recognize(&self, frame: &RgbImage) -> RecognitionResult<Recognition> {
        let image_b64 = encode_png_base64(frame)?;
        let mut last_error = None;

        for model in &self.config.models {
            let started = Instant::now();
            match self.call_model(model, &image_b64).await {
                Ok(raw) => {
                    crate::metrics::record_call(model, "ok", started.elapsed());
                    let labels = PlayerLabels::new(
                        self.aliases.normalize(&raw.p1),
                        self.aliases.normalize(&raw.p2),
                    );
                    debug!(model = %model, raw_1p = %raw.p1, raw_2p = %raw.p2, "Recognized characters");
                    return Ok(Recognition { labels, raw });
                }
                Err(e) if e.is_retryable() => {
                    crate::metrics::record_call(model, "retry", started.elapsed());
                    warn!(model = %model, "Recognition failed, trying next model: {}", e);
                    last_error = Some(e);
                }
                Err(e) => {
                    crate::metrics::record_call(model, "error", started.elapsed());
                    return Err(e);
                }
            }
        }

        let last = last_error.unwrap_or(RecognitionError::EmptyResponse);
        info!("All Gemini models failed");
        Err(RecognitionError::AllModelsFailed(Box::new(last)))
    }
}

// =============================================================================
// Helpers
// =============================================================================

pub fn encode_png_base64(frame: &RgbImage) -> RecognitionResult<String> {
    let mut buf = Cursor::new(Vec::new());
    frame.write_to(&mut buf, ImageOutputFormat::Png)?;
    Ok(BASE64.encode(buf.into_inner()))
}

/// Remove a surrounding markdown code fence (```` ```json ... ``` ````).
pub fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}

/// Parse the model's `{"1p": ..., "2p": ...}` answer into raw labels.
///
/// Missing or non-string values become empty strings.
pub fn parse_labels(text: &str) -> RecognitionResult<PlayerLabels> {
    let value: serde_json::Value = serde_json::from_str(strip_code_fence(text))
        .map_err(|e| RecognitionError::parse(format!("{} in {:?}", e, text)))?;
    let object = value
        .as_object()
        .ok_or_else(|| RecognitionError::parse(format!("expected a JSON object, got {}", value)))?;
    let label = |key: &str| {
        object
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };
    Ok(PlayerLabels::new(label("1p"), label("2p")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("  {} "), "{}");
    }

    #[test]
    fn test_parse_labels() {
        let labels = parse_labels(r#"{"1p": "リュウ", "2p": " Ken "}"#).unwrap();
        assert_eq!(labels.p1, "リュウ");
        assert_eq!(labels.p2, "Ken");

        let partial = parse_labels(r#"{"1p": "Ryu", "2p": null}"#).unwrap();
        assert_eq!(partial.p2, "");

        assert!(parse_labels("[1, 2]").is_err());
        assert!(parse_labels("Ryu vs Ken").is_err());
    }

    #[test]
    fn test_request_wire_format() {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text("hi".into()),
                    Part::InlineData(InlineData {
                        mime_type: "image/png",
                        data: "AAAA".into(),
                    }),
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(json["contents"][0]["parts"][1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
    }

    #[test]
    fn test_png_encoding_is_base64() {
        let frame = RgbImage::new(4, 2);
        let encoded = encode_png_base64(&frame).unwrap();
        let bytes = BASE64.decode(encoded).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        std::env::remove_var("GEMINI_API_KEY");
        assert!(GeminiConfig::from_env().is_err());

        std::env::set_var("GEMINI_API_KEY", "key");
        std::env::set_var("GEMINI_MODEL", "gemini-2.0-flash");
        std::env::remove_var("GEMINI_FALLBACK_MODELS");
        let config = GeminiConfig::from_env().unwrap();
        assert_eq!(config.models, vec!["gemini-2.0-flash", "gemini-1.5-flash"]);

        std::env::set_var("GEMINI_FALLBACK_MODELS", "");
        let config = GeminiConfig::from_env().unwrap();
        assert_eq!(config.models, vec!["gemini-2.0-flash"]);

        for key in ["GEMINI_API_KEY", "GEMINI_MODEL", "GEMINI_FALLBACK_MODELS"] {
            std::env::remove_var(key);
        }
    }
}
