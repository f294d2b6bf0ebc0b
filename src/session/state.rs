use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ConversationTurn, Role, SearchResult};
use crate::thinking::{parse_assistant_content, Phase, ThinkScanner};

/// Shown in place of the answer when the answer stream fails.
pub const CHAT_ERROR_MESSAGE: &str = "Sorry, there was an error processing your request.";

/// Identifies one submitted question and everything produced for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(Uuid);

impl TurnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Everything that can change session state.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    TurnSubmitted { turn: TurnId, question: String },
    QueryResolved { turn: TurnId, query: String },
    SearchStarted { turn: TurnId },
    SearchResultArrived { turn: TurnId, result: SearchResult },
    SearchCompleted { turn: TurnId },
    SearchFailed { turn: TurnId, error: String },
    ChatChunkArrived { turn: TurnId, text: String },
    ChatCompleted { turn: TurnId, sources: Vec<SearchResult> },
    ChatFailed { turn: TurnId, error: String },
}

impl SessionEvent {
    pub fn turn(&self) -> TurnId {
        match self {
            SessionEvent::TurnSubmitted { turn, .. }
            | SessionEvent::QueryResolved { turn, .. }
            | SessionEvent::SearchStarted { turn }
            | SessionEvent::SearchResultArrived { turn, .. }
            | SessionEvent::SearchCompleted { turn }
            | SessionEvent::SearchFailed { turn, .. }
            | SessionEvent::ChatChunkArrived { turn, .. }
            | SessionEvent::ChatCompleted { turn, .. }
            | SessionEvent::ChatFailed { turn, .. } => *turn,
        }
    }
}

#[derive(Debug, Default)]
struct PendingAnswer {
    raw: String,
    scanner: ThinkScanner,
}

/// Conversation plus the buffers of the turn being streamed.
///
/// Mutated only through [`SessionState::apply`].
#[derive(Debug, Default)]
pub struct SessionState {
    turns: Vec<ConversationTurn>,
    /// Rendered form of `turns`, built once when each turn is frozen
    turn_views: Vec<TurnView>,
    current_turn: Option<TurnId>,
    query: Option<String>,
    current_sources: Vec<SearchResult>,
    /// Sources still belong to the previous turn
    sources_stale: bool,
    search_in_flight: bool,
    search_error: Option<String>,
    phase: Phase,
    pending: Option<PendingAnswer>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Returns `false` when it was ignored because it
    /// belongs to a superseded turn or arrived after its turn finished.
    pub fn apply(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::TurnSubmitted { turn, question } => self.submit(turn, question),
            stale if self.current_turn != Some(stale.turn()) => {
                tracing::debug!("Discarding event for superseded turn {}", stale.turn());
                return false;
            }
            SessionEvent::QueryResolved { query, .. } => {
                self.query = Some(query);
            }
            SessionEvent::SearchStarted { .. } => {
                self.search_in_flight = true;
                self.search_error = None;
            }
            SessionEvent::SearchResultArrived { result, .. } => {
                if self.sources_stale {
                    self.current_sources.clear();
                    self.sources_stale = false;
                }
                self.current_sources.push(result);
            }
            SessionEvent::SearchCompleted { .. } => {
                self.search_in_flight = false;
                if self.sources_stale {
                    self.current_sources.clear();
                    self.sources_stale = false;
                }
            }
            SessionEvent::SearchFailed { error, .. } => {
                self.search_in_flight = false;
                self.search_error = Some(error);
            }
            SessionEvent::ChatChunkArrived { text, .. } => {
                let Some(pending) = self.pending.as_mut() else {
                    return false;
                };
                pending.raw.push_str(&text);
                pending.scanner.push(&text);
                self.phase = pending.scanner.phase();
            }
            SessionEvent::ChatCompleted { sources, .. } => {
                let Some(pending) = self.pending.take() else {
                    return false;
                };
                self.freeze_answer(pending, sources);
                self.phase = Phase::Answering;
            }
            SessionEvent::ChatFailed { error, .. } => {
                if self.pending.take().is_none() {
                    return false;
                }
                tracing::warn!("Answer stream failed: {error}");
                self.push_turn(ConversationTurn::assistant(CHAT_ERROR_MESSAGE, Vec::new()));
                self.phase = Phase::Answering;
            }
        }
        true
    }

    fn submit(&mut self, turn: TurnId, question: String) {
        // An unfinished answer is frozen as-is so roles keep alternating.
        if let Some(pending) = self.pending.take() {
            let sources = if self.sources_stale {
                Vec::new()
            } else {
                self.current_sources.clone()
            };
            self.freeze_answer(pending, sources);
        }
        self.push_turn(ConversationTurn::user(question));
        self.current_turn = Some(turn);
        self.query = None;
        self.sources_stale = true;
        self.search_in_flight = false;
        self.search_error = None;
        self.phase = Phase::Thinking;
        self.pending = Some(PendingAnswer::default());
    }

    fn push_turn(&mut self, turn: ConversationTurn) {
        self.turn_views.push(TurnView::from(&turn));
        self.turns.push(turn);
    }

    /// Freeze a streamed answer, reusing the scanner's segments.
    fn freeze_answer(&mut self, pending: PendingAnswer, sources: Vec<SearchResult>) {
        let PendingAnswer { raw, mut scanner } = pending;
        scanner.finish();
        let parsed = scanner.content();
        self.turn_views.push(TurnView {
            role: Role::Assistant,
            content: parsed.answer,
            thinking: parsed.thinking,
            sources: sources.clone(),
        });
        self.turns.push(ConversationTurn::assistant(raw, sources));
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Turns before the current question.
    pub fn prior_turns(&self) -> &[ConversationTurn] {
        match self.turns.last() {
            Some(last) if self.current_turn.is_some() && last.role == Role::User => {
                &self.turns[..self.turns.len() - 1]
            }
            _ => &self.turns,
        }
    }

    pub fn current_turn(&self) -> Option<TurnId> {
        self.current_turn
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn current_sources(&self) -> &[SearchResult] {
        &self.current_sources
    }

    pub fn search_in_flight(&self) -> bool {
        self.search_in_flight
    }

    pub fn search_error(&self) -> Option<&str> {
        self.search_error.as_deref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether an answer is still being streamed.
    pub fn is_streaming(&self) -> bool {
        self.pending.is_some()
    }

    /// Raw text received so far for the in-progress answer.
    pub fn pending_raw(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.raw.as_str())
    }

    /// Serializable snapshot for renderers.
    pub fn view(&self, session_id: Uuid) -> SessionView {
        let live = self.pending.as_ref().map(|p| p.scanner.content());
        SessionView {
            session_id,
            turn_id: self.current_turn,
            turns: self.turn_views.clone(),
            sources: self.current_sources.clone(),
            search_in_flight: self.search_in_flight,
            search_error: self.search_error.clone(),
            query: self.query.clone(),
            phase: self.phase,
            thinking: live.as_ref().and_then(|c| c.thinking.clone()),
            answer: live.map(|c| c.answer).unwrap_or_default(),
            streaming: self.pending.is_some(),
            complete: self.current_turn.is_some()
                && self.pending.is_none()
                && !self.search_in_flight,
        }
    }
}

/// A completed turn as a renderer sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnView {
    pub role: Role,
    /// The question, or the answer segment of an assistant reply
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SearchResult>,
}

impl From<&ConversationTurn> for TurnView {
    fn from(turn: &ConversationTurn) -> Self {
        match turn.role {
            Role::User => Self {
                role: Role::User,
                content: turn.raw_text.clone(),
                thinking: None,
                sources: Vec::new(),
            },
            Role::Assistant => {
                let parsed = parse_assistant_content(&turn.raw_text);
                Self {
                    role: Role::Assistant,
                    content: parsed.answer,
                    thinking: parsed.thinking,
                    sources: turn.sources.clone(),
                }
            }
        }
    }
}

/// Snapshot of the whole session, published after every accepted event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionView {
    pub session_id: Uuid,
    pub turn_id: Option<TurnId>,
    pub turns: Vec<TurnView>,
    pub sources: Vec<SearchResult>,
    pub search_in_flight: bool,
    pub search_error: Option<String>,
    pub query: Option<String>,
    pub phase: Phase,
    pub thinking: Option<String>,
    pub answer: String,
    pub streaming: bool,
    pub complete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(title: &str, score: f64) -> SearchResult {
        SearchResult {
            title: title.into(),
            url: format!("https://example.com/{title}"),
            content: String::new(),
            score,
            published_date: None,
        }
    }

    fn submitted(state: &mut SessionState, question: &str) -> TurnId {
        let turn = TurnId::new();
        assert!(state.apply(SessionEvent::TurnSubmitted {
            turn,
            question: question.into(),
        }));
        turn
    }

    fn finish_turn(state: &mut SessionState, turn: TurnId, sources: &[SearchResult], answer: &str) {
        state.apply(SessionEvent::SearchStarted { turn });
        for s in sources {
            state.apply(SessionEvent::SearchResultArrived {
                turn,
                result: s.clone(),
            });
        }
        state.apply(SessionEvent::SearchCompleted { turn });
        state.apply(SessionEvent::ChatChunkArrived {
            turn,
            text: answer.into(),
        });
        state.apply(SessionEvent::ChatCompleted {
            turn,
            sources: sources.to_vec(),
        });
    }

    #[test]
    fn test_submit_appends_user_turn_and_resets_phase() {
        let mut state = SessionState::new();
        let turn = submitted(&mut state, "capital of France");
        assert_eq!(state.turns().len(), 1);
        assert_eq!(state.turns()[0].role, Role::User);
        assert_eq!(state.current_turn(), Some(turn));
        assert_eq!(state.phase(), Phase::Thinking);
        assert!(state.is_streaming());
        assert!(state.prior_turns().is_empty());
    }

    #[test]
    fn test_sources_preserved_until_new_results_arrive() {
        let mut state = SessionState::new();
        let first = submitted(&mut state, "q1");
        finish_turn(&mut state, first, &[source("old", 0.9)], "a1");

        let second = submitted(&mut state, "q2");
        state.apply(SessionEvent::SearchStarted { turn: second });
        assert_eq!(state.current_sources().len(), 1);
        assert_eq!(state.current_sources()[0].title, "old");

        state.apply(SessionEvent::SearchResultArrived {
            turn: second,
            result: source("new", 0.8),
        });
        assert_eq!(state.current_sources().len(), 1);
        assert_eq!(state.current_sources()[0].title, "new");

        state.apply(SessionEvent::SearchResultArrived {
            turn: second,
            result: source("newer", 0.7),
        });
        let titles: Vec<&str> = state.current_sources().iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, ["new", "newer"]);
    }

    #[test]
    fn test_search_failure_leaves_sources_untouched() {
        let mut state = SessionState::new();
        let first = submitted(&mut state, "q1");
        finish_turn(&mut state, first, &[source("kept", 0.9)], "a1");
        let before = state.current_sources().to_vec();

        let second = submitted(&mut state, "q2");
        state.apply(SessionEvent::SearchStarted { turn: second });
        assert!(state.search_in_flight());
        state.apply(SessionEvent::SearchFailed {
            turn: second,
            error: "rate limited".into(),
        });

        assert_eq!(state.current_sources(), before.as_slice());
        assert_eq!(state.search_error(), Some("rate limited"));
        assert!(!state.search_in_flight());
    }

    #[test]
    fn test_search_failure_mid_turn_keeps_accumulated() {
        let mut state = SessionState::new();
        let turn = submitted(&mut state, "q");
        state.apply(SessionEvent::SearchResultArrived {
            turn,
            result: source("a", 0.5),
        });
        state.apply(SessionEvent::SearchFailed {
            turn,
            error: "boom".into(),
        });
        assert_eq!(state.current_sources().len(), 1);
    }

    #[test]
    fn test_empty_search_clears_previous_sources() {
        let mut state = SessionState::new();
        let first = submitted(&mut state, "q1");
        finish_turn(&mut state, first, &[source("old", 0.9)], "a1");

        let second = submitted(&mut state, "q2");
        state.apply(SessionEvent::SearchStarted { turn: second });
        state.apply(SessionEvent::SearchCompleted { turn: second });
        assert!(state.current_sources().is_empty());
    }

    #[test]
    fn test_chunks_drive_phase_and_segments() {
        let mut state = SessionState::new();
        let turn = submitted(&mut state, "q");

        state.apply(SessionEvent::ChatChunkArrived {
            turn,
            text: "<th".into(),
        });
        assert_eq!(state.phase(), Phase::Thinking);
        state.apply(SessionEvent::ChatChunkArrived {
            turn,
            text: "ink>Eval".into(),
        });
        assert_eq!(state.phase(), Phase::Thinking);
        state.apply(SessionEvent::ChatChunkArrived {
            turn,
            text: "uating sources</think>## Overview\n...".into(),
        });
        assert_eq!(state.phase(), Phase::Answering);

        let view = state.view(Uuid::nil());
        assert_eq!(view.thinking.as_deref(), Some("Evaluating sources"));
        assert_eq!(view.answer, "## Overview\n...");
        assert_eq!(
            state.pending_raw(),
            Some("<think>Evaluating sources</think>## Overview\n...")
        );
    }

    #[test]
    fn test_chat_completed_freezes_turn_with_sources() {
        let mut state = SessionState::new();
        let turn = submitted(&mut state, "q");
        finish_turn(&mut state, turn, &[source("s", 0.4)], "<think>t</think>answer");

        assert!(!state.is_streaming());
        assert_eq!(state.turns().len(), 2);
        let frozen = &state.turns()[1];
        assert_eq!(frozen.role, Role::Assistant);
        assert_eq!(frozen.raw_text, "<think>t</think>answer");
        assert_eq!(frozen.sources.len(), 1);

        // Late chunk after completion is ignored.
        assert!(!state.apply(SessionEvent::ChatChunkArrived {
            turn,
            text: "more".into(),
        }));
        assert_eq!(state.turns()[1].raw_text, "<think>t</think>answer");

        let view = state.view(Uuid::nil());
        assert!(view.complete);
        assert_eq!(view.turns[1].content, "answer");
        assert_eq!(view.turns[1].thinking.as_deref(), Some("t"));
    }

    #[test]
    fn test_chat_failure_becomes_apology_turn() {
        let mut state = SessionState::new();
        let first = submitted(&mut state, "q1");
        finish_turn(&mut state, first, &[source("s", 0.4)], "a1");

        let second = submitted(&mut state, "q2");
        state.apply(SessionEvent::ChatChunkArrived {
            turn: second,
            text: "<think>half".into(),
        });
        assert!(state.apply(SessionEvent::ChatFailed {
            turn: second,
            error: "connection reset".into(),
        }));

        assert_eq!(state.turns().len(), 4);
        assert_eq!(state.turns()[3].raw_text, CHAT_ERROR_MESSAGE);
        // Earlier turns are intact.
        assert_eq!(state.turns()[1].raw_text, "a1");
        assert_eq!(state.turns()[1].sources.len(), 1);
    }

    #[test]
    fn test_stale_turn_events_are_discarded() {
        let mut state = SessionState::new();
        let old = submitted(&mut state, "first");
        state.apply(SessionEvent::ChatChunkArrived {
            turn: old,
            text: "<think>old".into(),
        });

        let new = submitted(&mut state, "second");
        assert!(!state.apply(SessionEvent::ChatChunkArrived {
            turn: old,
            text: " late".into(),
        }));
        assert!(!state.apply(SessionEvent::SearchResultArrived {
            turn: old,
            result: source("late", 1.0),
        }));
        assert!(!state.apply(SessionEvent::ChatCompleted {
            turn: old,
            sources: vec![],
        }));

        assert_eq!(state.current_turn(), Some(new));
        assert_eq!(state.pending_raw(), Some(""));
        assert_eq!(state.phase(), Phase::Thinking);
        let view = state.view(Uuid::nil());
        assert_eq!(view.answer, "");
        assert!(view.thinking.is_none());
    }

    #[test]
    fn test_superseded_answer_is_frozen_before_new_question() {
        let mut state = SessionState::new();
        let old = submitted(&mut state, "first");
        state.apply(SessionEvent::ChatChunkArrived {
            turn: old,
            text: "partial".into(),
        });
        submitted(&mut state, "second");

        let roles: Vec<Role> = state.turns().iter().map(|t| t.role).collect();
        assert_eq!(roles, [Role::User, Role::Assistant, Role::User]);
        assert_eq!(state.turns()[1].raw_text, "partial");
        assert_eq!(state.prior_turns().len(), 2);
    }

    #[test]
    fn test_view_reports_in_progress_turn() {
        let mut state = SessionState::new();
        let turn = submitted(&mut state, "q");
        state.apply(SessionEvent::QueryResolved {
            turn,
            query: "better q".into(),
        });
        state.apply(SessionEvent::SearchStarted { turn });

        let view = state.view(Uuid::nil());
        assert_eq!(view.turn_id, Some(turn));
        assert_eq!(view.query.as_deref(), Some("better q"));
        assert!(view.search_in_flight);
        assert!(view.streaming);
        assert!(!view.complete);
    }

    #[test]
    fn test_frozen_turn_views_match_one_shot_parse() {
        let mut state = SessionState::new();
        let first = submitted(&mut state, "first");
        for text in ["<thi", "nk>weigh sources</th", "ink>\n\nParis [1]."] {
            state.apply(SessionEvent::ChatChunkArrived {
                turn: first,
                text: text.into(),
            });
        }
        state.apply(SessionEvent::ChatCompleted {
            turn: first,
            sources: vec![source("a", 0.4)],
        });

        // Superseded while holding back a partial opening tag.
        let second = submitted(&mut state, "second");
        state.apply(SessionEvent::ChatChunkArrived {
            turn: second,
            text: "<thi".into(),
        });
        let third = submitted(&mut state, "third");
        state.apply(SessionEvent::ChatFailed {
            turn: third,
            error: "boom".into(),
        });

        let view = state.view(Uuid::nil());
        let reparsed: Vec<TurnView> = state.turns().iter().map(TurnView::from).collect();
        assert_eq!(view.turns, reparsed);
        assert_eq!(view.turns[1].thinking.as_deref(), Some("weigh sources"));
        assert_eq!(view.turns[1].content, "Paris [1].");
        assert_eq!(view.turns[3].content, "<thi");
        assert_eq!(view.turns[5].content, CHAT_ERROR_MESSAGE);
    }
}
