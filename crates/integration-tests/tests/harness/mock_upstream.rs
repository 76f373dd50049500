//! Mock OpenAI-compatible upstream for integration tests
//!
//! Always answers `chat/completions` with an SSE stream: one chunk per
//! configured word, a usage chunk, then `[DONE]`.

use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing,
};
use futures_util::stream;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// Prompt tokens reported in every usage chunk
pub const PROMPT_TOKENS: u64 = 10;

/// Mock upstream that returns predictable streams
pub struct MockUpstream {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

struct MockState {
    completion_count: AtomicU32,
    /// Number of requests to fail with 500 before succeeding
    fail_count: AtomicU32,
    words: Vec<String>,
    /// Pause before each chunk
    chunk_delay: Duration,
}

impl MockUpstream {
    /// Start a mock that streams `"Hello from mock"`
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_inner(0, &["Hello", " from", " mock"], Duration::ZERO).await
    }

    /// Start a mock that fails the first `n` requests with 500
    pub async fn start_failing(n: u32) -> anyhow::Result<Self> {
        Self::start_inner(n, &["Hello", " from", " mock"], Duration::ZERO).await
    }

    /// Start a mock that streams `n` words with a pause before each
    pub async fn start_slow(n: usize, chunk_delay: Duration) -> anyhow::Result<Self> {
        let words: Vec<&str> = std::iter::repeat_n(" word", n).collect();
        Self::start_inner(0, &words, chunk_delay).await
    }

    async fn start_inner(fail_count: u32, words: &[&str], chunk_delay: Duration) -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            completion_count: AtomicU32::new(0),
            fail_count: AtomicU32::new(fail_count),
            words: words.iter().map(|w| (*w).to_owned()).collect(),
            chunk_delay,
        });

        let app = Router::new()
            .route("/v1/chat/completions", routing::post(handle_chat_completions))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Base URL for configuring the mock as a channel
    ///
    /// Includes `/v1` since the upstream client appends `/chat/completions`
    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    /// Number of completion requests received
    pub fn completion_count(&self) -> u32 {
        self.state.completion_count.load(Ordering::Relaxed)
    }

    /// Completion tokens reported for a full stream
    pub fn completion_tokens(&self) -> u64 {
        self.state.words.len() as u64
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn handle_chat_completions(State(state): State<Arc<MockState>>, Json(request): Json<Value>) -> Response {
    state.completion_count.fetch_add(1, Ordering::Relaxed);

    let remaining = state.fail_count.load(Ordering::Relaxed);
    if remaining > 0 {
        state.fail_count.fetch_sub(1, Ordering::Relaxed);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": {
                    "message": "mock server intentional failure",
                    "type": "server_error"
                }
            })),
        )
            .into_response();
    }

    assert_eq!(request["stream"], true, "gateway always streams from upstream");

    let mut frames: Vec<String> = state
        .words
        .iter()
        .map(|word| sse(&json!({"choices": [{"index": 0, "delta": {"content": word}}]})))
        .collect();
    frames.push(sse(&json!({
        "choices": [],
        "usage": {
            "prompt_tokens": PROMPT_TOKENS,
            "completion_tokens": state.words.len(),
        }
    })));
    frames.push("data: [DONE]\n\n".to_owned());

    let delay = state.chunk_delay;
    let body = stream::unfold(frames.into_iter(), move |mut frames| async move {
        let frame = frames.next()?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Some((Ok::<_, Infallible>(frame), frames))
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(body))
        .unwrap()
}

fn sse(value: &Value) -> String {
    format!("data: {value}\n\n")
}
