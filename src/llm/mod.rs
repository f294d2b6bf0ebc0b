pub mod answer;
pub mod chat_stream;
pub mod reformulate;

use crate::models::{ChatMessage, ConversationTurn, Role};
use crate::thinking::parse_assistant_content;

/// Prior turns as API messages. Assistant turns contribute only their answer
/// segment; the thinking trace is not replayed to the model. Assistant turns
/// with no answer (superseded before any answer text) are left out.
pub fn history_messages(prior: &[ConversationTurn]) -> Vec<ChatMessage> {
    prior
        .iter()
        .filter_map(|turn| match turn.role {
            Role::User => Some(ChatMessage::from(turn)),
            Role::Assistant => {
                let answer = parse_assistant_content(&turn.raw_text).answer;
                (!answer.is_empty()).then(|| ChatMessage::new(Role::Assistant.as_str(), answer))
            }
        })
        .collect()
}

/// Remove chat-template control tokens (`<|im_start|>` and friends) so
/// untrusted text cannot open a new role block.
pub fn sanitize_for_prompt(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<|") {
        match rest[start + 2..].find("|>") {
            Some(end) => {
                out.push_str(&rest[..start]);
                rest = &rest[start + 2 + end + 2..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}
