//! Gemini recognizer against a mock generateContent endpoint.

use std::time::Duration;

use chap_recognition::{
    CharacterAliases, GeminiConfig, GeminiRecognizer, RecognitionError, Recognizer,
};
use image::RgbImage;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ALIASES: &str = r#"{
    "characters": {
        "ryu": {"canonical": "Ryu", "aliases": ["リュウ"]},
        "ken": {"canonical": "Ken", "aliases": ["ケン"]}
    }
}"#;

fn config(server: &MockServer, models: &[&str]) -> GeminiConfig {
    GeminiConfig {
        api_key: "test-key".to_string(),
        models: models.iter().map(|m| m.to_string()).collect(),
        base_url: server.uri(),
        timeout: Duration::from_secs(5),
    }
}

fn answer(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "candidates": [{"content": {"parts": [{"text": text}]}}]
    }))
}

fn frame() -> RgbImage {
    RgbImage::from_pixel(8, 4, image::Rgb([200, 10, 10]))
}

#[tokio::test]
async fn test_recognize_normalizes_aliases() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/primary:generateContent"))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(json!({
            "generationConfig": {"responseMimeType": "application/json"}
        })))
        .respond_with(answer("```json\n{\"1p\": \"リュウ\", \"2p\": \"Akuma\"}\n```"))
        .expect(1)
        .mount(&server)
        .await;

    let aliases = CharacterAliases::from_json(ALIASES).unwrap();
    let recognizer = GeminiRecognizer::new(config(&server, &["primary"]), aliases).unwrap();
    let result = recognizer.recognize(&frame()).await.unwrap();

    assert_eq!(result.labels.p1, "Ryu");
    assert_eq!(result.labels.p2, "Unknown");
    assert_eq!(result.raw.p1, "リュウ");
    assert_eq!(result.raw.p2, "Akuma");
}

#[tokio::test]
async fn test_falls_back_to_next_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/primary:generateContent"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/models/backup:generateContent"))
        .respond_with(answer(r#"{"1p": "ケン", "2p": "ryu"}"#))
        .expect(1)
        .mount(&server)
        .await;

    let aliases = CharacterAliases::from_json(ALIASES).unwrap();
    let recognizer =
        GeminiRecognizer::new(config(&server, &["primary", "backup"]), aliases).unwrap();
    let result = recognizer.recognize(&frame()).await.unwrap();

    assert_eq!(result.labels.p1, "Ken");
    assert_eq!(result.labels.p2, "Ryu");
}

#[tokio::test]
async fn test_client_error_stops_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/primary:generateContent"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/models/backup:generateContent"))
        .respond_with(answer(r#"{"1p": "Ryu", "2p": "Ken"}"#))
        .expect(0)
        .mount(&server)
        .await;

    let recognizer = GeminiRecognizer::new(
        config(&server, &["primary", "backup"]),
        CharacterAliases::passthrough(),
    )
    .unwrap();
    let err = recognizer.recognize(&frame()).await.unwrap_err();
    assert!(matches!(err, RecognitionError::Api { status: 400, .. }));
}

#[tokio::test]
async fn test_all_models_failing_reports_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(answer("not json at all"))
        .expect(2)
        .mount(&server)
        .await;

    let recognizer = GeminiRecognizer::new(
        config(&server, &["a", "b"]),
        CharacterAliases::passthrough(),
    )
    .unwrap();
    let err = recognizer.recognize(&frame()).await.unwrap_err();
    match err {
        RecognitionError::AllModelsFailed(last) => {
            assert!(matches!(*last, RecognitionError::Parse(_)))
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_empty_candidates_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
        .mount(&server)
        .await;

    let recognizer =
        GeminiRecognizer::new(config(&server, &["only"]), CharacterAliases::passthrough()).unwrap();
    let err = recognizer.recognize(&frame()).await.unwrap_err();
    assert!(matches!(err, RecognitionError::AllModelsFailed(_)));
}

#[test]
fn test_empty_model_list_is_rejected() {
    let config = GeminiConfig {
        models: vec![],
        ..GeminiConfig::default()
    };
    assert!(GeminiRecognizer::new(config, CharacterAliases::passthrough()).is_err());
}

#[tokio::test]
#[ignore = "requires GEMINI_API_KEY"]
async fn test_live_recognition_returns_labels() {
    let recognizer = GeminiRecognizer::from_env(CharacterAliases::passthrough())
        .expect("GEMINI_API_KEY must be set");
    let result = recognizer.recognize(&frame()).await;
    assert!(result.is_ok() || matches!(result, Err(RecognitionError::AllModelsFailed(_))));
}
