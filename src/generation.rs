//! Generation providers.
//!
//! The [`Generator`] trait has two entry points:
//!
//! - [`stream`](Generator::stream): incremental text for answers. Returns
//!   once the provider has accepted the request, so a failure to start is
//!   reported before any output exists.
//! - [`complete`](Generator::complete): a short single-shot completion,
//!   used for conversation titles.
//!
//! Implementations:
//!
//! - [`OpenAiCompatible`]: `POST {url}/chat/completions`, SSE when streaming.
//! - [`EchoGenerator`]: offline provider that replies with the latest user
//!   message, one word per increment.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use candor_core::models::ChatMessage;
use candor_core::prompt::latest_user_message;

use crate::config::GenerationConfig;

/// A stream of text increments. An `Err` item ends the stream.
pub type TextStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait Generator: Send + Sync {
    /// Provider identifier used in logs.
    fn name(&self) -> &str;

    /// Start an incremental completion over `messages`.
    async fn stream(&self, messages: &[ChatMessage]) -> Result<TextStream>;

    /// Single-shot completion bounded to `max_tokens`.
    async fn complete(&self, messages: &[ChatMessage], max_tokens: u32) -> Result<String>;
}

/// Build the provider selected by `config.provider`.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "echo" => Ok(Arc::new(EchoGenerator)),
        "openai" => {
            let api_key = std::env::var(&config.api_key_env).ok();
            if api_key.is_none() {
                tracing::warn!(
                    env = %config.api_key_env,
                    "no generation API key set; sending unauthenticated requests"
                );
            }
            Ok(Arc::new(OpenAiCompatible::new(config, api_key)?))
        }
        other => bail!("Unknown generation provider: {}", other),
    }
}

// ============ OpenAI-compatible ============

pub struct OpenAiCompatible {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: Option<f32>,
    timeout: Duration,
    api_key: Option<String>,
}

impl OpenAiCompatible {
    /// `api_key` is `None` for keyless local endpoints.
    pub fn new(config: &GenerationConfig, api_key: Option<String>) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("generation.model required for OpenAI provider"))?;
        let timeout = Duration::from_secs(config.timeout_secs);

        // No overall request timeout: a streamed body may legitimately run
        // longer than `timeout`. Start-up and idle gaps are bounded instead.
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .context("failed to build generation HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.url.trim_end_matches('/')),
            model,
            temperature: config.temperature,
            timeout,
            api_key,
        })
    }

    fn body(&self, messages: &[ChatMessage], stream: bool, max_tokens: Option<u32>) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });
        if let Some(t) = self.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(n) = max_tokens {
            body["max_tokens"] = serde_json::json!(n);
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let mut req = self.client.post(&self.endpoint).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = tokio::time::timeout(self.timeout, req.send())
            .await
            .map_err(|_| anyhow!("generation request timed out after {:?}", self.timeout))??;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("generation API error {}: {}", status, text);
        }
        Ok(response)
    }
}

#[async_trait]
impl Generator for OpenAiCompatible {
    fn name(&self) -> &str {
        &self.model
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<TextStream> {
        let response = self.send(&self.body(messages, true, None)).await?;
        Ok(sse_text_stream(response.bytes_stream()))
    }

    async fn complete(&self, messages: &[ChatMessage], max_tokens: u32) -> Result<String> {
        let body = self.body(messages, false, Some(max_tokens));
        let response = self.send(&body).await?;
        let json: Value = tokio::time::timeout(self.timeout, response.json())
            .await
            .map_err(|_| anyhow!("generation response timed out after {:?}", self.timeout))??;

        json.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("generation response missing choices[0].message.content"))
    }
}

/// One decoded server-sent event relevant to chat completions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Data(String),
    Done,
}

/// Incremental `text/event-stream` line decoder.
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// sequences split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed `chunk` and return every complete `data:` event it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = std::str::from_utf8(&line).context("invalid UTF-8 in event stream")?;
            let line = line.trim_end_matches(['\r', '\n']);

            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim_start();
            if payload == "[DONE]" {
                events.push(SseEvent::Done);
            } else if !payload.is_empty() {
                events.push(SseEvent::Data(payload.to_string()));
            }
        }

        Ok(events)
    }
}

/// Extract `choices[0].delta.content` from one streamed chunk.
fn delta_content(payload: &str) -> Result<Option<String>> {
    let json: Value = serde_json::from_str(payload).context("invalid JSON in event stream")?;
    if let Some(err) = json.get("error") {
        bail!("generation stream error: {}", err);
    }
    Ok(json
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string))
}

struct SseState<B, E> {
    bytes: BoxStream<'static, std::result::Result<B, E>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    done: bool,
}

/// Turn a chat-completions SSE byte stream into text increments.
pub fn sse_text_stream<S, B, E>(bytes: S) -> TextStream
where
    S: futures::Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<anyhow::Error> + Send + 'static,
{
    let state = SseState {
        bytes: bytes.boxed(),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(text) = st.pending.pop_front() {
                return Some((Ok(text), st));
            }
            if st.done {
                return None;
            }

            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = match st.decoder.push(chunk.as_ref()) {
                        Ok(events) => events,
                        Err(e) => {
                            st.done = true;
                            return Some((Err(e), st));
                        }
                    };
                    for event in events {
                        match event {
                            SseEvent::Done => {
                                st.done = true;
                                break;
                            }
                            SseEvent::Data(payload) => match delta_content(&payload) {
                                Ok(Some(text)) => st.pending.push_back(text),
                                Ok(None) => {}
                                Err(e) => {
                                    st.done = true;
                                    st.pending.clear();
                                    return Some((Err(e), st));
                                }
                            },
                        }
                    }
                }
                Some(Err(e)) => {
                    st.done = true;
                    st.pending.clear();
                    return Some((Err(e.into()), st));
                }
                None => st.done = true,
            }
        }
    })
    .boxed()
}

// ============ Echo ============

/// Replies with the latest user message. Needs no network.
pub struct EchoGenerator;

#[async_trait]
impl Generator for EchoGenerator {
    fn name(&self) -> &str {
        "echo"
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<TextStream> {
        let text = latest_user_message(messages)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let mut increments: Vec<Result<String>> = Vec::new();
        for (i, word) in text.split_whitespace().enumerate() {
            let piece = if i == 0 {
                word.to_string()
            } else {
                format!(" {}", word)
            };
            increments.push(Ok(piece));
        }
        Ok(stream::iter(increments).boxed())
    }

    async fn complete(&self, messages: &[ChatMessage], _max_tokens: u32) -> Result<String> {
        Ok(latest_user_message(messages)
            .map(|m| m.content.clone())
            .unwrap_or_default())
    }
}
