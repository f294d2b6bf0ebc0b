use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::models::ChatMessage;

pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One streaming completion request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Sent as the leading `system` message
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

impl GenerationRequest {
    fn into_wire_messages(self) -> Vec<StreamMessage> {
        std::iter::once(StreamMessage {
            role: "system".to_string(),
            content: self.system,
        })
        .chain(self.messages.into_iter().map(|m| StreamMessage {
            role: m.role,
            content: m.content,
        }))
        .collect()
    }
}

/// The external text-generation collaborator.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Open a completion stream yielding content deltas.
    async fn stream(&self, request: GenerationRequest) -> Result<TextStream>;
}

/// Drain a completion stream into one string.
pub async fn collect_text(mut stream: TextStream) -> Result<String> {
    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        text.push_str(&chunk?);
    }
    Ok(text)
}

/// Streaming chat completions from Ollama or an OpenAI-compatible API.
#[derive(Clone)]
pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(client: reqwest::Client, config: LlmConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn stream(&self, request: GenerationRequest) -> Result<TextStream> {
        match self.config.provider.as_str() {
            "ollama" => stream_ollama(&self.client, &self.config, request).await,
            "openai" => stream_openai(&self.client, &self.config, request).await,
            other => anyhow::bail!("Unsupported LLM provider for chat: {other}"),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct StreamMessage {
    role: String,
    content: String,
}

// ─── Ollama streaming ────────────────────────────────────

#[derive(Serialize)]
struct OllamaStreamRequest {
    model: String,
    messages: Vec<StreamMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaStreamChunk {
    message: StreamMessage,
    done: bool,
}

async fn stream_ollama(
    client: &reqwest::Client,
    config: &LlmConfig,
    request: GenerationRequest,
) -> Result<TextStream> {
    let url = format!("{}/api/chat", config.base_url);

    let req = OllamaStreamRequest {
        model: config.chat_model.clone(),
        options: OllamaOptions {
            temperature: request.temperature,
        },
        messages: request.into_wire_messages(),
        stream: true,
    };

    let resp = client
        .post(&url)
        .timeout(Duration::from_secs(300))
        .json(&req)
        .send()
        .await
        .context("Failed to connect to Ollama for chat streaming")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Ollama chat API returned {status}: {body}");
    }

    let stream = stream_lines(resp.bytes_stream()).filter_map(|line_result| async move {
        match line_result {
            Ok(line) => parse_ollama_line(&line),
            Err(e) => Some(Err(e)),
        }
    });

    Ok(Box::pin(stream))
}

/// Parse a single Ollama NDJSON line: `None` for blanks, empty deltas and the done marker.
fn parse_ollama_line(line: &str) -> Option<Result<String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_str::<OllamaStreamChunk>(line) {
        Ok(chunk) if chunk.done || chunk.message.content.is_empty() => None,
        Ok(chunk) => Some(Ok(chunk.message.content)),
        Err(e) => Some(Err(anyhow::anyhow!("Failed to parse Ollama chunk: {e}"))),
    }
}

// ─── OpenAI streaming ────────────────────────────────────

#[derive(Serialize)]
struct OpenAiStreamRequest {
    model: String,
    messages: Vec<StreamMessage>,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
}

#[derive(Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
}

async fn stream_openai(
    client: &reqwest::Client,
    config: &LlmConfig,
    request: GenerationRequest,
) -> Result<TextStream> {
    let url = format!("{}/v1/chat/completions", config.base_url);

    let req = OpenAiStreamRequest {
        model: config.chat_model.clone(),
        temperature: request.temperature,
        messages: request.into_wire_messages(),
        stream: true,
    };

    let resp = client
        .post(&url)
        .timeout(Duration::from_secs(300))
        .header(
            "Authorization",
            format!("Bearer {}", config.api_key.as_deref().unwrap_or("")),
        )
        .json(&req)
        .send()
        .await
        .context("Failed to connect to OpenAI for chat streaming")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("OpenAI chat API returned {status}: {body}");
    }

    let stream = stream_lines(resp.bytes_stream()).filter_map(|line_result| async move {
        match line_result {
            Ok(line) => parse_openai_line(&line),
            Err(e) => Some(Err(e)),
        }
    });

    Ok(Box::pin(stream))
}

/// Parse a single OpenAI SSE line: `None` for non-data lines, `[DONE]` and role-only deltas.
fn parse_openai_line(line: &str) -> Option<Result<String>> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<OpenAiStreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|content| !content.is_empty())
            .map(Ok),
        Err(e) => Some(Err(anyhow::anyhow!("Failed to parse OpenAI chunk: {e}"))),
    }
}

// ─── Line buffering ──────────────────────────────────────

/// Convert a byte stream into a stream of complete lines.
///
/// Bytes are buffered until a newline so multi-byte characters split across
/// network chunks decode intact.
fn stream_lines(
    byte_stream: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> impl Stream<Item = Result<String>> + Send {
    futures_util::stream::unfold(
        (Box::pin(byte_stream), Vec::<u8>::new()),
        |(mut stream, mut buffer)| async move {
            loop {
                if let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                    let rest = buffer.split_off(newline_pos + 1);
                    let line = String::from_utf8_lossy(&buffer[..newline_pos]).into_owned();
                    buffer = rest;
                    if !line.trim().is_empty() {
                        return Some((Ok(line), (stream, buffer)));
                    }
                    continue;
                }

                match stream.next().await {
                    Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
                    Some(Err(e)) => {
                        return Some((
                            Err(anyhow::anyhow!("Stream read error: {e}")),
                            (stream, buffer),
                        ));
                    }
                    None => {
                        if buffer.iter().any(|b| !b.is_ascii_whitespace()) {
                            let remaining = String::from_utf8_lossy(&buffer).into_owned();
                            buffer.clear();
                            return Some((Ok(remaining), (stream, buffer)));
                        }
                        return None;
                    }
                }
            }
        },
    )
}
