use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use supportbot_core::Matcher;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    matcher: Arc<Matcher>,
    request_timeout: Duration,
    /// One inference at a time. Held by the blocking task until it finishes,
    /// even after its request has timed out.
    inference: Arc<Semaphore>,
}

impl AppState {
    pub fn new(matcher: Arc<Matcher>, request_timeout: Duration) -> Self {
        Self {
            matcher,
            request_timeout,
            inference: Arc::new(Semaphore::new(1)),
        }
    }
}

/// `msg` may be missing or null; both mean an empty question.
#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    msg: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatResponse {
    answer: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

// The body is parsed as JSON regardless of Content-Type.
async fn chat(State(state): State<AppState>, body: Bytes) -> Response {
    let request: ChatRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(err) => {
            warn!(error = %err, "rejected chat payload");
            return error_response(StatusCode::BAD_REQUEST, format!("invalid JSON body: {err}"));
        }
    };
    let msg = request.msg.unwrap_or_default();

    let matcher = state.matcher.clone();
    let inference = state.inference.clone();
    let work = async move {
        // A request that expires while queued is dropped here and never
        // reaches the model.
        let permit = inference
            .acquire_owned()
            .await
            .map_err(|e| e.to_string())?;
        // Inference is CPU-bound; keep it off the async workers.
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            matcher.answer(&msg)
        })
        .await
        .map_err(|e| e.to_string())
    };

    match tokio::time::timeout(state.request_timeout, work).await {
        Ok(Ok(Ok(answer))) => Json(ChatResponse { answer }).into_response(),
        Ok(Ok(Err(err))) => {
            warn!(error = %err, "chat request failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
        Ok(Err(internal)) => {
            warn!(error = %internal, "chat worker failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
        Err(_) => {
            warn!(
                timeout_ms = state.request_timeout.as_millis() as u64,
                "chat request timed out"
            );
            error_response(StatusCode::GATEWAY_TIMEOUT, "request timed out")
        }
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "entries": state.matcher.knowledge_base().len(),
    }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn serve<F>(addr: SocketAddr, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!("Starting HTTP API on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("http server error")
}

pub async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use supportbot_core::{
        sample_corpus, EmbeddingProvider, FaqEntry, HashEmbeddingProvider, KnowledgeBase,
        MatcherConfig, DEFAULT_FALLBACK_TEXT,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    /// Fails on "boom", sleeps on "slow", otherwise a fixed vector. Counts
    /// how many "slow" embeddings actually ran.
    #[derive(Default)]
    struct ScriptedProvider {
        slow_calls: Arc<AtomicUsize>,
    }

    impl EmbeddingProvider for ScriptedProvider {
        fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            match text {
                "boom" => anyhow::bail!("model crashed"),
                "slow" => {
                    self.slow_calls.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(300));
                    Ok(vec![1.0, 0.0])
                }
                _ => Ok(vec![1.0, 0.0]),
            }
        }
    }

    fn sample_state() -> AppState {
        let embedder: Box<dyn EmbeddingProvider> = Box::new(HashEmbeddingProvider::new(128));
        let kb = KnowledgeBase::build(sample_corpus(), &embedder).unwrap();
        let matcher = Matcher::new(Arc::new(kb), embedder, MatcherConfig::default()).unwrap();
        AppState::new(Arc::new(matcher), Duration::from_secs(5))
    }

    fn scripted_state(timeout: Duration) -> AppState {
        scripted_state_with(ScriptedProvider::default(), timeout)
    }

    fn scripted_state_with(provider: ScriptedProvider, timeout: Duration) -> AppState {
        let embedder: Box<dyn EmbeddingProvider> = Box::new(provider);
        let kb = KnowledgeBase::build(vec![FaqEntry::new("q", "a")], &embedder).unwrap();
        let matcher = Matcher::new(Arc::new(kb), embedder, MatcherConfig::default()).unwrap();
        AppState::new(Arc::new(matcher), timeout)
    }

    async fn post_chat(state: AppState, body: &'static str) -> (StatusCode, serde_json::Value) {
        let response = router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/chat")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn chat_returns_matching_answer() {
        let (status, json) =
            post_chat(sample_state(), r#"{"msg":"How long is the warranty?"}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert!(json["answer"].as_str().unwrap().contains("12-month warranty"));
    }

    #[tokio::test]
    async fn chat_without_msg_answers_empty_question() {
        let (status, json) = post_chat(sample_state(), "{}").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["answer"], DEFAULT_FALLBACK_TEXT);
    }

    #[tokio::test]
    async fn chat_rejects_invalid_json() {
        let (status, json) = post_chat(sample_state(), "not json").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("invalid JSON"));
    }

    #[tokio::test]
    async fn embedding_failure_is_server_error() {
        let (status, json) =
            post_chat(scripted_state(Duration::from_secs(5)), r#"{"msg":"boom"}"#).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["error"].as_str().unwrap().contains("model crashed"));
    }

    #[tokio::test]
    async fn slow_embedding_times_out() {
        let (status, _) =
            post_chat(scripted_state(Duration::from_millis(20)), r#"{"msg":"slow"}"#).await;

        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn requests_expiring_in_queue_skip_inference() {
        let provider = ScriptedProvider::default();
        let slow_calls = provider.slow_calls.clone();
        let state = scripted_state_with(provider, Duration::from_millis(50));

        let (first, _) = post_chat(state.clone(), r#"{"msg":"slow"}"#).await;
        let (second, _) = post_chat(state.clone(), r#"{"msg":"slow"}"#).await;
        assert_eq!(first, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(second, StatusCode::GATEWAY_TIMEOUT);

        // Let the first inference finish and release the model.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(slow_calls.load(Ordering::SeqCst), 1);

        let (status, json) = post_chat(state, r#"{"msg":"fast"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["answer"], "a");
    }

    #[tokio::test]
    async fn health_reports_entry_count() {
        let response = router(sample_state())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["entries"], 6);
    }
}
