//! Incremental parser for the `<think>…</think>` answer preamble.
//!
//! The answer stream may open with a thinking segment wrapped in `<think>` /
//! `</think>`. [`ThinkScanner`] consumes fragments as they arrive and keeps
//! only a short carry of a possibly-split tag, so each push costs
//! O(fragment) rather than a rescan of the whole buffer.
//!
//! Only the first tag pair is honoured; anything after `</think>` is answer
//! text, even if it contains further tags.

use serde::{Deserialize, Serialize};

pub const OPEN_TAG: &str = "<think>";
pub const CLOSE_TAG: &str = "</think>";

/// Which segment the in-progress answer is producing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Thinking,
    Answering,
}

/// Thinking/answer split of an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ParsedAssistantContent {
    pub thinking: Option<String>,
    pub answer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ScanState {
    #[default]
    BeforeThink,
    InThink,
    AfterThink,
}

#[derive(Debug, Clone, Default)]
pub struct ThinkScanner {
    state: ScanState,
    /// Text seen before `<think>` (answer text when no tag ever opens)
    before: String,
    thinking: String,
    after: String,
    /// Tail that may be the start of the tag we are waiting for
    carry: String,
}

impl ThinkScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next fragment of the stream.
    pub fn push(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        let mut pending = std::mem::take(&mut self.carry);
        pending.push_str(fragment);

        loop {
            match self.state {
                ScanState::AfterThink => {
                    self.after.push_str(&pending);
                    return;
                }
                ScanState::BeforeThink | ScanState::InThink => {
                    let tag = self.awaited_tag();
                    if let Some(pos) = pending.find(tag) {
                        self.segment_mut().push_str(&pending[..pos]);
                        pending = pending[pos + tag.len()..].to_string();
                        self.state = match self.state {
                            ScanState::BeforeThink => ScanState::InThink,
                            _ => ScanState::AfterThink,
                        };
                        continue;
                    }
                    let keep = partial_tag_suffix(&pending, tag);
                    let split = pending.len() - keep;
                    self.segment_mut().push_str(&pending[..split]);
                    self.carry = pending[split..].to_string();
                    return;
                }
            }
        }
    }

    /// End of stream: a dangling partial tag is plain text.
    pub fn finish(&mut self) {
        let carry = std::mem::take(&mut self.carry);
        self.segment_mut().push_str(&carry);
    }

    /// Whether the closing tag has been consumed.
    pub fn is_closed(&self) -> bool {
        self.state == ScanState::AfterThink
    }

    pub fn phase(&self) -> Phase {
        if self.state == ScanState::AfterThink || !self.before.trim().is_empty() {
            Phase::Answering
        } else {
            Phase::Thinking
        }
    }

    /// Current thinking/answer split.
    ///
    /// While nothing but whitespace and a strict prefix of `<think>` has
    /// arrived, the answer is held back as empty.
    pub fn content(&self) -> ParsedAssistantContent {
        match self.state {
            ScanState::BeforeThink => {
                let answer = if self.before.trim().is_empty() {
                    String::new()
                } else {
                    format!("{}{}", self.before, self.carry).trim().to_string()
                };
                ParsedAssistantContent {
                    thinking: None,
                    answer,
                }
            }
            ScanState::InThink => ParsedAssistantContent {
                thinking: Some(format!("{}{}", self.thinking, self.carry).trim().to_string()),
                answer: String::new(),
            },
            ScanState::AfterThink => ParsedAssistantContent {
                thinking: Some(self.thinking.trim().to_string()),
                answer: format!("{}{}", self.before, self.after).trim().to_string(),
            },
        }
    }

    fn awaited_tag(&self) -> &'static str {
        match self.state {
            ScanState::BeforeThink => OPEN_TAG,
            _ => CLOSE_TAG,
        }
    }

    fn segment_mut(&mut self) -> &mut String {
        match self.state {
            ScanState::BeforeThink => &mut self.before,
            ScanState::InThink => &mut self.thinking,
            ScanState::AfterThink => &mut self.after,
        }
    }
}

/// Split a complete assistant message into thinking and answer.
pub fn parse_assistant_content(raw: &str) -> ParsedAssistantContent {
    let mut scanner = ThinkScanner::new();
    scanner.push(raw);
    scanner.finish();
    scanner.content()
}

/// Length of the longest suffix of `text` that is a proper prefix of `tag`.
fn partial_tag_suffix(text: &str, tag: &str) -> usize {
    let max = (tag.len() - 1).min(text.len());
    (1..=max)
        .rev()
        .find(|&n| text.is_char_boundary(text.len() - n) && tag.starts_with(&text[text.len() - n..]))
        .unwrap_or(0)
}
