//! Chat-completion client
//!
//! Sends one utterance plus a stage instruction to an OpenAI-compatible
//! endpoint and returns the reply, either whole or as incremental chunks.

mod policy;
mod stream;

pub use policy::{StreamingPolicy, probe_streaming};
pub use stream::{StreamDecoder, StreamEvent};

use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::{Error, Result};

/// Connection parameters taken from [`Settings`]
#[derive(Clone)]
struct ApiParams {
    api_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Client for the completion endpoint
#[derive(Clone)]
pub struct CompletionClient {
    http: reqwest::Client,
    params: ApiParams,
    supports_streaming: bool,
}

impl std::fmt::Debug for CompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionClient")
            .field("api_url", &self.params.api_url)
            .field("model", &self.params.model)
            .field("supports_streaming", &self.supports_streaming)
            .finish_non_exhaustive()
    }
}

impl CompletionClient {
    /// Create a client configured from settings
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        let mut client = Self {
            http: reqwest::Client::new(),
            params: ApiParams {
                api_url: String::new(),
                api_key: String::new(),
                model: String::new(),
                temperature: settings.temperature,
                max_tokens: None,
            },
            supports_streaming: false,
        };
        client.configure(settings);
        client
    }

    /// Apply new settings and re-probe streaming support
    ///
    /// Returns the new streaming capability.
    pub fn configure(&mut self, settings: &Settings) -> bool {
        self.params = ApiParams {
            api_url: settings.api_url.clone(),
            api_key: settings.api_key.clone(),
            model: settings.model_or_default().to_string(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        };

        self.supports_streaming = probe_streaming(
            &settings.api_url,
            &settings.api_key,
            &settings.known_streaming_hosts,
            settings.streaming_policy,
        );

        tracing::debug!(
            api_url = %self.params.api_url,
            model = %self.params.model,
            supports_streaming = self.supports_streaming,
            "completion client configured"
        );

        self.supports_streaming
    }

    /// Whether streamed requests should be used
    #[must_use]
    pub const fn supports_streaming(&self) -> bool {
        self.supports_streaming
    }

    /// Request a whole response
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` without a credential, `Error::Http` on
    /// transport failure and `Error::Network` on a non-success status
    pub async fn send_request(&self, utterance: &str, instruction: &str) -> Result<String> {
        let response = self.post(utterance, instruction, false).await?;

        let body = response.text().await?;
        tracing::debug!(body = %body, "completion response");

        let parsed: ChatResponse = serde_json::from_str(&body)?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        tracing::info!(kind = "output", chars = content.chars().count(), "completion received");
        Ok(content)
    }

    /// Request a streamed response
    ///
    /// `on_chunk(delta, accumulated)` runs once per non-empty delta, in
    /// arrival order. The returned text is the concatenation of all deltas.
    /// A malformed frame cancels the transfer and the text accumulated so far
    /// is returned.
    ///
    /// # Errors
    ///
    /// Same as [`send_request`](Self::send_request), plus `Error::Http` when
    /// the transfer fails mid-stream
    pub async fn send_streaming_request<F>(
        &self,
        utterance: &str,
        instruction: &str,
        mut on_chunk: F,
    ) -> Result<String>
    where
        F: FnMut(&str, &str) + Send,
    {
        let response = self.post(utterance, instruction, true).await?;

        let mut body = response.bytes_stream();
        let mut decoder = StreamDecoder::new();
        let mut accumulated = String::new();

        'read: loop {
            let (events, ended) = match body.next().await {
                Some(bytes) => (decoder.push(&bytes?), false),
                None => (decoder.finish(), true),
            };

            for event in events {
                match event {
                    StreamEvent::Delta(delta) => {
                        accumulated.push_str(&delta);
                        tracing::debug!(chunk = %delta, "stream chunk");
                        on_chunk(&delta, &accumulated);
                    }
                    StreamEvent::Done => break 'read,
                    StreamEvent::Malformed(reason) => {
                        let err = Error::MalformedChunk(reason);
                        tracing::warn!(
                            error = %err,
                            chars = accumulated.chars().count(),
                            "cancelling stream"
                        );
                        break 'read;
                    }
                }
            }

            if ended {
                break;
            }
        }

        // Dropping the body here cancels any remaining transfer
        drop(body);

        tracing::info!(
            kind = "output",
            chars = accumulated.chars().count(),
            "streamed completion received"
        );
        Ok(accumulated)
    }

    /// Send the request and check the status
    async fn post(&self, utterance: &str, instruction: &str, stream: bool) -> Result<reqwest::Response> {
        if self.params.api_key.is_empty() {
            return Err(Error::Config("API key is not configured".to_string()));
        }

        let request = ChatRequest {
            model: &self.params.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: instruction,
                },
                ChatMessage {
                    role: "user",
                    content: utterance,
                },
            ],
            temperature: self.params.temperature,
            max_tokens: self.params.max_tokens,
            stream,
        };

        tracing::debug!(
            api_url = %self.params.api_url,
            model = %self.params.model,
            stream,
            "sending completion request"
        );

        let response = self
            .http
            .post(&self.params.api_url)
            .bearer_auth(&self.params.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "completion request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "completion API error");
            return Err(Error::Network {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}
