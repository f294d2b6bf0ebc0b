use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::StreamExt;

use crate::llm::answer::answer_request_from_messages;
use crate::llm::sanitize_for_prompt;
use crate::models::{ChatMessage, ChatRequest, ErrorBody};
use crate::state::AppState;

const MAX_CHAT_MESSAGE_LEN: usize = 4000;
const MAX_HISTORY_MESSAGES: usize = 20;

/// POST /api/chat - Stream a raw answer (thinking segment included) as plain text.
pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, (StatusCode, Json<ErrorBody>)> {
    let messages = validate_and_sanitize_history(req.messages);
    if !messages.iter().any(|m| m.role == "user") {
        return Err(error(StatusCode::BAD_REQUEST, "A user message is required"));
    }

    // Held for the lifetime of the response stream.
    let permit = state
        .chat_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| error(StatusCode::SERVICE_UNAVAILABLE, "Chat service at capacity"))?;

    let request = answer_request_from_messages(
        messages,
        &req.search_results,
        state.config.llm.answer_temperature,
    );

    let llm_stream = state.llm.stream(request).await.map_err(|e| {
        tracing::warn!("Chat proxy failed to open stream: {e:#}");
        error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "There was an error processing your request",
        )
    })?;

    let idle_timeout = Duration::from_secs(state.config.chat_idle_timeout_secs);

    let body_stream = futures_util::stream::unfold(
        Some(llm_stream),
        move |llm_stream| async move {
            let mut llm_stream = llm_stream?;
            match tokio::time::timeout(idle_timeout, llm_stream.next()).await {
                Ok(Some(Ok(content))) => {
                    Some((Ok(bytes::Bytes::from(content)), Some(llm_stream)))
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!("Chat proxy stream error: {e:#}");
                    Some((Err(std::io::Error::other(e.to_string())), None))
                }
                Ok(None) => None,
                Err(_) => Some((
                    Err(std::io::Error::other("LLM response timed out (idle)")),
                    None,
                )),
            }
        },
    )
    .map(move |chunk| {
        let _permit = &permit;
        chunk
    });

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(body_stream),
    )
        .into_response())
}

fn error(status: StatusCode, message: &str) -> (StatusCode, Json<ErrorBody>) {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
            details: None,
        }),
    )
}

fn validate_and_sanitize_history(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let kept: Vec<ChatMessage> = messages
        .into_iter()
        .filter(|m| m.role == "user" || m.role == "assistant")
        .map(|m| ChatMessage {
            role: m.role,
            content: sanitize_for_prompt(&truncate_to_char_boundary(
                &m.content,
                MAX_CHAT_MESSAGE_LEN,
            )),
        })
        .collect();
    let skip = kept.len().saturating_sub(MAX_HISTORY_MESSAGES);
    kept.into_iter().skip(skip).collect()
}

fn truncate_to_char_boundary(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    s.char_indices()
        .take_while(|(i, c)| i + c.len_utf8() <= max_len)
        .map(|(_, c)| c)
        .collect()
}
