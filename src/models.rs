use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A single web search result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    /// Snippet text
    #[serde(default)]
    pub content: String,
    /// Relevance, higher is better
    #[serde(default)]
    pub score: f64,
    #[serde(
        default,
        deserialize_with = "deserialize_published_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub published_date: Option<DateTime<Utc>>,
}

fn deserialize_published_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_published_date))
}

/// Parse the date formats search providers hand back. Unknown formats yield `None`.
pub fn parse_published_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One side of a completed exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub role: Role,
    pub raw_text: String,
    /// Sources the assistant answered from (always empty for user turns)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SearchResult>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            raw_text: text.into(),
            sources: Vec::new(),
        }
    }

    pub fn assistant(text: impl Into<String>, sources: Vec<SearchResult>) -> Self {
        Self {
            role: Role::Assistant,
            raw_text: text.into(),
            sources,
        }
    }
}

/// A message as sent to the text-generation API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

impl From<&ConversationTurn> for ChatMessage {
    fn from(turn: &ConversationTurn) -> Self {
        Self::new(turn.role.as_str(), turn.raw_text.clone())
    }
}

/// Search request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
}

/// Search response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
}

/// Error body returned by the HTTP surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Raw chat request: full message list plus the sources to ground on
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default, rename = "searchResults")]
    pub search_results: Vec<SearchResult>,
}

/// Ask request driving the in-process session
#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    pub question: String,
}
