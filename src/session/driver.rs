use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{ChatStart, Config};
use crate::llm::answer::stream_answer;
use crate::llm::chat_stream::TextGenerator;
use crate::llm::reformulate::reformulate;
use crate::models::{ConversationTurn, SearchResult};
use crate::search::client::{SearchClient, SearchOutcome, SearchStatus};
use crate::session::state::{SessionEvent, SessionState, SessionView, TurnId};

/// Knobs that shape one turn.
#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub chat_start: ChatStart,
    pub answer_temperature: f32,
    pub reformulate_temperature: f32,
    pub idle_timeout: Duration,
}

impl TurnSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chat_start: config.chat_start,
            answer_temperature: config.llm.answer_temperature,
            reformulate_temperature: config.llm.reformulate_temperature,
            idle_timeout: Duration::from_secs(config.chat_idle_timeout_secs),
        }
    }
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// One chat session: owns the state, runs turns, publishes snapshots.
pub struct ChatSession {
    id: Uuid,
    state: RwLock<SessionState>,
    updates: watch::Sender<SessionView>,
    search: SearchClient,
    generator: Arc<dyn TextGenerator>,
    settings: TurnSettings,
    active: Mutex<Option<JoinHandle<()>>>,
}

impl ChatSession {
    pub fn new(
        search: SearchClient,
        generator: Arc<dyn TextGenerator>,
        settings: TurnSettings,
    ) -> Self {
        let id = Uuid::new_v4();
        let state = SessionState::new();
        let (updates, _) = watch::channel(state.view(id));
        tracing::info!("Session {id} created");
        Self {
            id,
            state: RwLock::new(state),
            updates,
            search,
            generator,
            settings,
            active: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Latest published snapshot.
    pub fn view(&self) -> SessionView {
        self.updates.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.updates.subscribe()
    }

    pub fn search_status(&self) -> SearchStatus {
        self.search.status()
    }

    /// Submit a question and run its turn in the background.
    ///
    /// Any turn still running is aborted, which drops its open streams.
    pub fn submit(self: &Arc<Self>, question: impl Into<String>) -> TurnId {
        let question = question.into();
        let mut active = self.active.lock();

        let (turn, prior) = self.begin_turn(&question);
        let session = Arc::clone(self);
        let handle = tokio::spawn(async move {
            session.run_turn(turn, question, prior).await;
        });

        if let Some(previous) = active.replace(handle) {
            if !previous.is_finished() {
                tracing::info!("Aborting superseded turn");
                previous.abort();
            }
        }
        turn
    }

    /// Abort the running turn, if any.
    pub fn shutdown(&self) {
        if let Some(handle) = self.active.lock().take() {
            handle.abort();
        }
    }

    /// Record the question and return its turn id with the turns before it.
    pub fn begin_turn(&self, question: &str) -> (TurnId, Vec<ConversationTurn>) {
        let turn = TurnId::new();
        let prior = {
            let mut state = self.state.write();
            state.apply(SessionEvent::TurnSubmitted {
                turn,
                question: question.to_string(),
            });
            self.updates.send_replace(state.view(self.id));
            state.prior_turns().to_vec()
        };
        tracing::info!("Turn {turn} submitted ({} prior turns)", prior.len());
        (turn, prior)
    }

    /// Reformulate, search, then stream the answer, in that order.
    pub async fn run_turn(&self, turn: TurnId, question: String, prior: Vec<ConversationTurn>) {
        let query = if prior.is_empty() {
            question.clone()
        } else {
            reformulate(
                self.generator.as_ref(),
                &prior,
                &question,
                self.settings.reformulate_temperature,
            )
            .await
        };

        if !self.dispatch(SessionEvent::QueryResolved {
            turn,
            query: query.clone(),
        }) {
            return;
        }
        self.dispatch(SessionEvent::SearchStarted { turn });

        let outcome = self.search.fetch(&query).await;
        let sources = outcome.results.clone();

        match self.settings.chat_start {
            ChatStart::Drained => {
                self.publish_sources(turn, outcome).await;
                self.stream_chat(turn, &prior, &question, &query, sources)
                    .await;
            }
            ChatStart::Immediate => {
                tokio::join!(
                    self.publish_sources(turn, outcome),
                    self.stream_chat(turn, &prior, &question, &query, sources),
                );
            }
        }
    }

    async fn publish_sources(&self, turn: TurnId, outcome: SearchOutcome) {
        if let Some(error) = outcome.error {
            self.dispatch(SessionEvent::SearchFailed { turn, error });
            return;
        }

        let mut paced = Box::pin(self.search.pace(outcome.results));
        while let Some(result) = paced.next().await {
            if !self.dispatch(SessionEvent::SearchResultArrived { turn, result }) {
                return;
            }
        }
        self.dispatch(SessionEvent::SearchCompleted { turn });
    }

    async fn stream_chat(
        &self,
        turn: TurnId,
        prior: &[ConversationTurn],
        question: &str,
        query: &str,
        sources: Vec<SearchResult>,
    ) {
        let mut stream = match stream_answer(
            self.generator.as_ref(),
            prior,
            question,
            query,
            &sources,
            self.settings.answer_temperature,
        )
        .await
        {
            Ok(stream) => stream,
            Err(e) => {
                self.dispatch(SessionEvent::ChatFailed {
                    turn,
                    error: format!("{e:#}"),
                });
                return;
            }
        };

        let idle = self.settings.idle_timeout;
        loop {
            match tokio::time::timeout(idle, stream.next()).await {
                Ok(Some(Ok(text))) => {
                    if !self.dispatch(SessionEvent::ChatChunkArrived { turn, text }) {
                        // Superseded: dropping the stream closes the connection.
                        return;
                    }
                }
                Ok(Some(Err(e))) => {
                    self.dispatch(SessionEvent::ChatFailed {
                        turn,
                        error: format!("{e:#}"),
                    });
                    return;
                }
                Ok(None) => break,
                Err(_) => {
                    self.dispatch(SessionEvent::ChatFailed {
                        turn,
                        error: "answer stream timed out (idle)".to_string(),
                    });
                    return;
                }
            }
        }

        if self.dispatch(SessionEvent::ChatCompleted { turn, sources }) {
            tracing::info!("Turn {turn} answered");
        }
    }

    /// Apply an event and publish the new snapshot if it was accepted.
    ///
    /// Publishing happens under the write lock so snapshots go out in the
    /// order their events were applied.
    fn dispatch(&self, event: SessionEvent) -> bool {
        let mut state = self.state.write();
        if !state.apply(event) {
            return false;
        }
        self.updates.send_replace(state.view(self.id));
        true
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some(handle) = self.active.get_mut().take() {
            handle.abort();
        }
    }
}
