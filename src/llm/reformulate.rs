use crate::llm::chat_stream::{collect_text, GenerationRequest, TextGenerator};
use crate::llm::history_messages;
use crate::models::{ChatMessage, ConversationTurn};

const REFORMULATE_SYSTEM_PROMPT: &str = "You rewrite follow-up questions into standalone web search queries.\n\
     Use the conversation so far to resolve pronouns and implicit references.\n\
     Output ONLY the reformulated search query on a single line.\n\
     No explanations, no quotes, no markup, no prefixes such as \"Query:\".";

const QUOTE_CHARS: &[char] = &['"', '\'', '`', '\u{201C}', '\u{201D}', '\u{2018}', '\u{2019}'];

/// Rewrite a follow-up question into a standalone search query.
///
/// Never fails: generator errors and empty output fall back to `question`.
pub async fn reformulate(
    generator: &dyn TextGenerator,
    prior: &[ConversationTurn],
    question: &str,
    temperature: f32,
) -> String {
    let request = build_reformulation_request(prior, question, temperature);

    let raw = match generator.stream(request).await {
        Ok(stream) => collect_text(stream).await,
        Err(e) => Err(e),
    };

    match raw {
        Ok(raw) => {
            let query = normalize_query(&raw);
            if query.is_empty() {
                tracing::warn!("Reformulation produced no usable query, using the question as-is");
                question.to_string()
            } else {
                tracing::info!("Reformulated {question:?} as {query:?}");
                query
            }
        }
        Err(e) => {
            tracing::warn!("Query reformulation failed: {e:#}");
            question.to_string()
        }
    }
}

fn build_reformulation_request(
    prior: &[ConversationTurn],
    question: &str,
    temperature: f32,
) -> GenerationRequest {
    let mut messages = history_messages(prior);
    messages.push(ChatMessage::new(
        "user",
        format!(
            "Reformulate this follow-up question into a standalone search query: \"{question}\""
        ),
    ));
    GenerationRequest {
        system: REFORMULATE_SYSTEM_PROMPT.to_string(),
        messages,
        temperature,
    }
}

/// Strip markup, line-edge quotes and newlines from raw model output.
pub fn normalize_query(raw: &str) -> String {
    strip_markup(raw)
        .lines()
        .map(|line| line.trim().trim_matches(QUOTE_CHARS).trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Remove `<...>` spans. An unterminated `<` is kept as text.
fn strip_markup(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        match rest[open..].find('>') {
            Some(close) => rest = &rest[open + close + 1..],
            None => {
                out.push_str(&rest[open..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}
