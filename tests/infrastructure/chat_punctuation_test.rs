use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use skriva::application::ports::{PunctuationError, PunctuationRestorer};
use skriva::infrastructure::llm::ChatPunctuationRestorer;

struct MockLlm {
    base_url: String,
    shutdown: oneshot::Sender<()>,
    /// (api key, model) per attempt, in arrival order.
    attempts: Arc<Mutex<Vec<(String, String)>>>,
}

/// Chat-completions endpoint answering 429 until `succeed_from_attempt`
/// (1-based) is reached; `None` means quota errors forever.
async fn start_mock_llm(succeed_from_attempt: Option<usize>) -> MockLlm {
    let attempts: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let handler_attempts = Arc::clone(&attempts);

    let app = Router::new().route(
        "/chat/completions",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let attempts = Arc::clone(&handler_attempts);
            async move {
                let key = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .trim_start_matches("Bearer ")
                    .to_string();
                let model = body["model"].as_str().unwrap_or("").to_string();
                let attempt = {
                    let mut attempts = attempts.lock().unwrap();
                    attempts.push((key, model));
                    attempts.len()
                };
                match succeed_from_attempt {
                    Some(n) if attempt >= n => (
                        StatusCode::OK,
                        Json(json!({
                            "choices": [{"message": {"content": "Restored text."}}]
                        })),
                    ),
                    _ => (
                        StatusCode::TOO_MANY_REQUESTS,
                        Json(json!({
                            "error": {"code": "insufficient_quota", "message": "quota exceeded"}
                        })),
                    ),
                }
            }
        }),
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await
            .ok();
    });

    MockLlm {
        base_url,
        shutdown: shutdown_tx,
        attempts,
    }
}

fn restorer(base_url: &str, keys: &[&str], models: &[&str]) -> ChatPunctuationRestorer {
    ChatPunctuationRestorer::new(
        base_url,
        keys.iter().map(|k| k.to_string()).collect(),
        models.iter().map(|m| m.to_string()).collect(),
        Duration::from_secs(5),
        8000,
    )
}

fn no_progress() -> impl Fn(u32, u32) + Send + Sync {
    |_, _| {}
}

#[tokio::test]
async fn given_quota_errors_everywhere_when_restoring_then_every_key_model_pair_is_tried_once() {
    let mock = start_mock_llm(None).await;
    let restorer = restorer(&mock.base_url, &["k1", "k2"], &["m1", "m2"]);

    let progress = no_progress();
    let result = restorer.restore("hello world", None, &progress).await;

    assert!(matches!(result, Err(PunctuationError::QuotaExhausted(_))));

    let attempts = mock.attempts.lock().unwrap().clone();
    assert_eq!(attempts.len(), 4);
    // Keys rotate round-robin within each model before the next model.
    assert_eq!(
        attempts,
        vec![
            ("k1".to_string(), "m1".to_string()),
            ("k2".to_string(), "m1".to_string()),
            ("k1".to_string(), "m2".to_string()),
            ("k2".to_string(), "m2".to_string()),
        ]
    );
    mock.shutdown.send(()).ok();
}

#[tokio::test]
async fn given_second_key_has_quota_when_restoring_then_rotation_stops_at_first_success() {
    let mock = start_mock_llm(Some(2)).await;
    let restorer = restorer(&mock.base_url, &["k1", "k2"], &["m1", "m2"]);

    let progress = no_progress();
    let result = restorer.restore("hello world", None, &progress).await;

    assert_eq!(result.unwrap(), "Restored text.");

    let attempts = mock.attempts.lock().unwrap().clone();
    assert_eq!(
        attempts,
        vec![
            ("k1".to_string(), "m1".to_string()),
            ("k2".to_string(), "m1".to_string()),
        ]
    );
    mock.shutdown.send(()).ok();
}

#[tokio::test]
async fn given_long_text_when_restoring_then_sub_chunks_report_progress_in_order() {
    let mock = start_mock_llm(Some(1)).await;
    let restorer = ChatPunctuationRestorer::new(
        mock.base_url.as_str(),
        vec!["k1".to_string()],
        vec!["m1".to_string()],
        Duration::from_secs(5),
        10,
    );

    let seen: Arc<Mutex<Vec<(u32, u32)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let progress = move |current: u32, total: u32| {
        sink.lock().unwrap().push((current, total));
    };

    let result = restorer
        .restore("alpha beta gamma delta", None, &progress)
        .await
        .unwrap();

    assert_eq!(result, "Restored text. Restored text. Restored text.");
    assert_eq!(*seen.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
    mock.shutdown.send(()).ok();
}
