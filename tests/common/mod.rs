//! Shared test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc};

use stagebot::voice::{RecognitionEngine, Synthesizer};
use stagebot::{RecognitionError, Result};

/// Completion path served by [`MockApi`]
pub const COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// How the mock endpoint answers
#[derive(Clone)]
pub enum MockReply {
    /// Whole JSON completion with this content
    Json(String),
    /// Streamed completion, one frame per delta, then `[DONE]`
    Stream(Vec<String>),
    /// Raw event-stream body
    Raw(String),
    /// Error status with a body
    Status(u16, String),
}

#[derive(Clone)]
struct MockState {
    reply: MockReply,
    requests: Arc<Mutex<Vec<Value>>>,
}

/// Local OpenAI-compatible completion endpoint
pub struct MockApi {
    pub url: String,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl MockApi {
    /// Bind to an ephemeral port and serve `reply` for every request
    pub async fn start(reply: MockReply) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = MockState {
            reply,
            requests: Arc::clone(&requests),
        };

        let app = Router::new()
            .route(COMPLETIONS_PATH, post(complete))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock api");
        let addr = listener.local_addr().expect("no local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock api failed");
        });

        Self {
            url: format!("http://{addr}{COMPLETIONS_PATH}"),
            requests,
        }
    }

    /// Number of requests received
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Bodies of all requests received
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }
}

async fn complete(State(state): State<MockState>, Json(body): Json<Value>) -> Response {
    state.requests.lock().unwrap().push(body);

    match state.reply {
        MockReply::Json(content) => Json(json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        }))
        .into_response(),
        MockReply::Stream(deltas) => {
            let mut body = String::new();
            for delta in deltas {
                let frame = json!({"choices": [{"delta": {"content": delta}}]});
                body.push_str(&format!("data: {frame}\n\n"));
            }
            body.push_str("data: [DONE]\n\n");
            event_stream(body)
        }
        MockReply::Raw(body) => event_stream(body),
        MockReply::Status(code, body) => (
            StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body,
        )
            .into_response(),
    }
}

fn event_stream(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

/// Recognition engine fed from the test through a channel
pub struct FakeEngine {
    heard: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    sessions: AtomicUsize,
}

/// Handle for speaking into a [`FakeEngine`]
#[derive(Clone)]
pub struct Microphone(mpsc::UnboundedSender<String>);

impl Microphone {
    pub fn say(&self, text: &str) {
        self.0.send(text.to_string()).expect("engine dropped");
    }
}

impl FakeEngine {
    pub fn new() -> (Arc<Self>, Microphone) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            heard: tokio::sync::Mutex::new(rx),
            sessions: AtomicUsize::new(0),
        });
        (engine, Microphone(tx))
    }

    /// Sessions started so far
    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecognitionEngine for FakeEngine {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn recognize(
        &self,
        _language: &str,
    ) -> std::result::Result<Option<String>, RecognitionError> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        let mut heard = self.heard.lock().await;
        match heard.recv().await {
            Some(text) => Ok(Some(text)),
            None => std::future::pending().await,
        }
    }
}

/// Synthesizer that records what it was asked to say
///
/// While holding, each unit keeps "playing" until `stop()` is called.
#[derive(Default)]
pub struct RecordingSynthesizer {
    spoken: Mutex<Vec<String>>,
    stops: AtomicUsize,
    holding: AtomicBool,
    cancel: Notify,
}

impl RecordingSynthesizer {
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Make every following unit play until stopped
    pub fn hold_units(&self) {
        self.holding.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Synthesizer for RecordingSynthesizer {
    async fn speak(&self, text: &str) -> Result<()> {
        let cancelled = self.cancel.notified();
        tokio::pin!(cancelled);
        cancelled.as_mut().enable();

        self.spoken.lock().unwrap().push(text.to_string());
        if self.holding.load(Ordering::SeqCst) {
            cancelled.await;
        } else {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.cancel.notify_waiters();
    }

    fn set_language(&self, _language: &str) {}
}

/// Poll `condition` until it holds or a few seconds pass
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..150 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
