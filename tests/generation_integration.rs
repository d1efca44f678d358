//! Integration tests for the generation workflow.
//!
//! These tests prove that stub providers (implemented via the
//! [`GenerationProvider`] trait) flow through the real engine — quota gating,
//! retry, fence stripping, uniqueness — and through the actual HTTP server.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use adesua::config::Config;
use adesua::db;
use adesua::error::GenerationError;
use adesua::generator::{GenerationPrompt, GenerationProvider};
use adesua::migrate;
use adesua::models::DictionaryEntry;
use adesua::populate::GenerationEngine;
use adesua::server::run_server_with_provider;
use adesua::store;

// ─── Stub providers ─────────────────────────────────────────────────

/// Returns scripted responses in order; after the script runs out, returns
/// the fallback (if any) forever, otherwise a provider error.
struct ScriptedProvider {
    responses: Mutex<VecDeque<String>>,
    fallback: Option<String>,
}

impl ScriptedProvider {
    fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: None,
        }
    }

    fn with_fallback(responses: Vec<String>, fallback: &str) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: Some(fallback.to_string()),
        }
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _prompt: &GenerationPrompt) -> Result<String, GenerationError> {
        let next = self.responses.lock().unwrap().pop_front();
        match next.or_else(|| self.fallback.clone()) {
            Some(body) => Ok(body),
            None => Err(GenerationError::Provider {
                message: "script exhausted".to_string(),
            }),
        }
    }
}

/// Always reports quota exhaustion.
struct ThrottledProvider;

#[async_trait]
impl GenerationProvider for ThrottledProvider {
    fn model_name(&self) -> &str {
        "throttled"
    }

    async fn generate(&self, _prompt: &GenerationPrompt) -> Result<String, GenerationError> {
        Err(GenerationError::QuotaExceeded { retry_after: None })
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn entry_json(twi: &str, english: &str) -> String {
    json!({ "twi": twi, "english": english }).to_string()
}

fn vocab_exercise_json() -> String {
    json!({
        "title": "Everyday words",
        "questions": [
            {
                "prompt": "What does \"nsuo\" mean?",
                "options": ["water", "fire", "food", "house"],
                "answer": "water"
            }
        ]
    })
    .to_string()
}

fn test_config(tmp: &TempDir, port: u16) -> Config {
    let db_path = tmp.path().join("adesua.sqlite");
    let config_content = format!(
        r#"
[db]
path = "{}"

[generation]
free_tier_limit = 100
max_attempts = 2
initial_delay_ms = 1
max_delay_ms = 10
inter_call_delay_ms = 0

[content]
populate_count = 5
max_attempt_factor = 3

[server]
bind = "127.0.0.1:{}"
"#,
        db_path.display(),
        port
    );
    toml::from_str(&config_content).unwrap()
}

fn seed_entry(twi: &str, english: &str) -> DictionaryEntry {
    DictionaryEntry {
        id: uuid::Uuid::new_v4().to_string(),
        twi: twi.to_string(),
        english: english.to_string(),
        pronunciation: None,
        part_of_speech: None,
        example_twi: None,
        example_english: None,
        created_at: chrono::Utc::now(),
    }
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

// ─── Engine tests ───────────────────────────────────────────────────

/// Prove that a bulk run skips both stored headwords and in-run repeats:
/// persisted {aane, bayerɛ} plus the stream aane, nsuo, nsuo, aduane must
/// accept exactly [nsuo, aduane] in that order.
#[tokio::test]
async fn test_populate_skips_persisted_and_session_duplicates() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, 0);
    migrate::run_migrations(&cfg).await.unwrap();

    let pool = db::connect(&cfg).await.unwrap();
    store::insert_entries(
        &pool,
        &[seed_entry("aane", "yes"), seed_entry("bayerɛ", "yam")],
    )
    .await
    .unwrap();

    let provider = Arc::new(ScriptedProvider::new(vec![
        entry_json("aane", "yes"),
        entry_json("nsuo", "water"),
        entry_json("nsuo", "water"),
        entry_json("aduane", "food"),
    ]));
    let engine = GenerationEngine::new(&cfg, provider);

    let cancel = CancellationToken::new();
    let outcome = engine.populate_dictionary(&pool, 2, &cancel).await.unwrap();

    let accepted: Vec<&str> = outcome.accepted.iter().map(|e| e.twi.as_str()).collect();
    assert_eq!(accepted, vec!["nsuo", "aduane"]);
    assert_eq!(outcome.duplicates, 2, "aane and the second nsuo are skipped");
    assert_eq!(outcome.attempts, 4);

    assert_eq!(store::entry_count(&pool).await.unwrap(), 4);
}

/// Prove that a run whose stream dries up returns the partial batch instead
/// of erroring or looping forever: 7 requested, only 5 distinct available.
#[tokio::test]
async fn test_populate_returns_partial_batch() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, 0);
    migrate::run_migrations(&cfg).await.unwrap();
    let pool = db::connect(&cfg).await.unwrap();

    let provider = Arc::new(ScriptedProvider::with_fallback(
        vec![
            entry_json("nsuo", "water"),
            entry_json("aduane", "food"),
            entry_json("ɔdɔ", "love"),
            entry_json("fie", "home"),
            entry_json("kasa", "language"),
        ],
        &entry_json("kasa", "language"),
    ));
    let engine = GenerationEngine::new(&cfg, provider);

    let cancel = CancellationToken::new();
    let outcome = engine.populate_dictionary(&pool, 7, &cancel).await.unwrap();

    assert_eq!(outcome.accepted.len(), 5);
    // Attempt cap: max_attempt_factor (3) × count (7).
    assert_eq!(outcome.attempts, 21);
    assert_eq!(store::entry_count(&pool).await.unwrap(), 5);
}

/// Prove that unparseable payloads are skipped without counting toward the
/// requested total.
#[tokio::test]
async fn test_populate_skips_unparseable_payloads() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, 0);
    migrate::run_migrations(&cfg).await.unwrap();
    let pool = db::connect(&cfg).await.unwrap();

    let provider = Arc::new(ScriptedProvider::new(vec![
        "Sorry, I cannot produce JSON today.".to_string(),
        format!("```json\n{}\n```", entry_json("nsuo", "water")),
        entry_json("aduane", "food"),
    ]));
    let engine = GenerationEngine::new(&cfg, provider);

    let cancel = CancellationToken::new();
    let outcome = engine.populate_dictionary(&pool, 2, &cancel).await.unwrap();

    let accepted: Vec<&str> = outcome.accepted.iter().map(|e| e.twi.as_str()).collect();
    assert_eq!(accepted, vec!["nsuo", "aduane"]);
    assert_eq!(outcome.parse_failures, 1);
}

/// Prove that a total failure surfaces as a typed exhaustion error rather
/// than a partial success.
#[tokio::test]
async fn test_populate_surfaces_exhaustion() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, 0);
    migrate::run_migrations(&cfg).await.unwrap();
    let pool = db::connect(&cfg).await.unwrap();

    let engine = GenerationEngine::new(&cfg, Arc::new(ThrottledProvider));

    let cancel = CancellationToken::new();
    let err = engine
        .populate_dictionary(&pool, 3, &cancel)
        .await
        .unwrap_err();

    match err.downcast_ref::<GenerationError>() {
        Some(GenerationError::Exhausted { attempts, .. }) => assert_eq!(*attempts, 2),
        other => panic!("expected Exhausted, got {:?}", other),
    }
    assert_eq!(store::entry_count(&pool).await.unwrap(), 0);
}

/// Prove that a pre-cancelled token stops the run before any generation.
#[tokio::test]
async fn test_populate_honors_cancellation() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, 0);
    migrate::run_migrations(&cfg).await.unwrap();
    let pool = db::connect(&cfg).await.unwrap();

    let provider = Arc::new(ScriptedProvider::new(vec![entry_json("nsuo", "water")]));
    let engine = GenerationEngine::new(&cfg, provider);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = engine.populate_dictionary(&pool, 3, &cancel).await.unwrap();

    assert!(outcome.accepted.is_empty());
    assert_eq!(outcome.attempts, 0);
}

// ─── HTTP tests ─────────────────────────────────────────────────────

/// End-to-end: three vocabulary exercises generated for Beginner level via
/// the HTTP endpoint, then read back through the list endpoint.
#[tokio::test]
async fn test_vocabulary_endpoint_end_to_end() {
    let port = find_free_port();
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, port);
    migrate::run_migrations(&cfg).await.unwrap();

    let provider: Arc<dyn GenerationProvider> =
        Arc::new(ScriptedProvider::with_fallback(vec![], &vocab_exercise_json()));
    let cfg_clone = cfg.clone();
    let server_handle = tokio::spawn(async move {
        run_server_with_provider(&cfg_clone, provider).await.ok();
    });
    wait_for_server(port).await;

    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://127.0.0.1:{}/api/exercise/createVocabs", port))
        .json(&json!({"level": "Beginner", "count": 3}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["inserted"], 3);
    assert_eq!(body["data"][0]["kind"], "vocabulary");
    assert_eq!(body["data"][0]["content"]["questions"][0]["answer"], "water");

    // The store now holds 3 Beginner records.
    let resp = client
        .get(format!(
            "http://127.0.0.1:{}/api/exercises?level=Beginner&kind=vocabulary",
            port
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["count"], 3);
    for exercise in body["data"].as_array().unwrap() {
        assert_eq!(exercise["level"], "Beginner");
    }

    // Unknown level → 400 with the error envelope.
    let resp = client
        .post(format!("http://127.0.0.1:{}/api/exercise/createVocabs", port))
        .json(&json!({"level": "Expert"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("unknown level"));

    server_handle.abort();
}

/// The populate endpoint inserts unique entries and reports quota
/// diagnostics alongside the first inserted item.
#[tokio::test]
async fn test_populate_endpoint_reports_quota() {
    let port = find_free_port();
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, port);
    migrate::run_migrations(&cfg).await.unwrap();

    let provider: Arc<dyn GenerationProvider> = Arc::new(ScriptedProvider::new(vec![
        entry_json("nsuo", "water"),
        entry_json("aduane", "food"),
    ]));
    let cfg_clone = cfg.clone();
    let server_handle = tokio::spawn(async move {
        run_server_with_provider(&cfg_clone, provider).await.ok();
    });
    wait_for_server(port).await;

    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://127.0.0.1:{}/api/dictionary/populate", port))
        .json(&json!({"count": 2}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["inserted"], 2);
    assert_eq!(body["data"]["twi"], "nsuo");
    assert_eq!(body["quota_remaining"], 98, "two calls against a limit of 100");
    assert!(body["quota_reset_in_secs"].as_u64().unwrap() <= 60);

    // Search the new entries back out.
    let resp = client
        .get(format!("http://127.0.0.1:{}/api/dictionary?search=wat", port))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["count"], 1);
    assert_eq!(body["data"][0]["twi"], "nsuo");

    server_handle.abort();
}

/// Lesson generation strips code fences end-to-end and exposes the lesson
/// through the read endpoints.
#[tokio::test]
async fn test_lesson_endpoint_strips_fences() {
    let port = find_free_port();
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, port);
    migrate::run_migrations(&cfg).await.unwrap();

    let lesson_json = json!({
        "title": "Greetings in Twi",
        "summary": "How to greet at different times of day.",
        "sections": [
            { "heading": "Morning", "body": "Maakye — good morning." }
        ]
    })
    .to_string();
    let provider: Arc<dyn GenerationProvider> = Arc::new(ScriptedProvider::new(vec![format!(
        "```json\n{}\n```",
        lesson_json
    )]));
    let cfg_clone = cfg.clone();
    let server_handle = tokio::spawn(async move {
        run_server_with_provider(&cfg_clone, provider).await.ok();
    });
    wait_for_server(port).await;

    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://127.0.0.1:{}/api/lessons/generate", port))
        .json(&json!({"topic": "greetings", "level": "Beginner"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["lesson"]["title"], "Greetings in Twi");
    assert_eq!(body["lesson"]["level"], "Beginner");

    let id = body["lesson"]["id"].as_str().unwrap().to_string();
    let resp = client
        .get(format!("http://127.0.0.1:{}/api/lessons/{}", port, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["content"]["sections"][0]["heading"], "Morning");

    server_handle.abort();
}

/// A throttled provider surfaces 429 with quota diagnostics in the envelope.
#[tokio::test]
async fn test_exhausted_generation_returns_429_with_quota() {
    let port = find_free_port();
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, port);
    migrate::run_migrations(&cfg).await.unwrap();

    let provider: Arc<dyn GenerationProvider> = Arc::new(ThrottledProvider);
    let cfg_clone = cfg.clone();
    let server_handle = tokio::spawn(async move {
        run_server_with_provider(&cfg_clone, provider).await.ok();
    });
    wait_for_server(port).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://127.0.0.1:{}/api/lessons/generate", port))
        .json(&json!({"topic": "greetings", "level": "Beginner"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 429);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["quota_remaining"].is_number());
    assert!(body["quota_reset_in_secs"].is_number());

    server_handle.abort();
}
