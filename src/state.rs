use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::llm::chat_stream::{LlmClient, TextGenerator};
use crate::search::client::SearchClient;
use crate::search::web::{SearchBackend, WebSearch};
use crate::session::driver::{ChatSession, TurnSettings};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub search: Arc<dyn SearchBackend>,
    pub llm: Arc<dyn TextGenerator>,
    pub chat_semaphore: Arc<tokio::sync::Semaphore>,
    session: Arc<RwLock<Arc<ChatSession>>>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let search = Arc::new(WebSearch::new(http_client.clone(), config.search.clone()));
        let llm = Arc::new(LlmClient::new(http_client, config.llm.clone()));

        Ok(Self::with_backends(config, search, llm))
    }

    /// Build state around explicit collaborators.
    pub fn with_backends(
        config: Config,
        search: Arc<dyn SearchBackend>,
        llm: Arc<dyn TextGenerator>,
    ) -> Self {
        let session = new_session(&config, &search, &llm);
        Self {
            config,
            search,
            llm,
            chat_semaphore: Arc::new(tokio::sync::Semaphore::new(3)),
            session: Arc::new(RwLock::new(Arc::new(session))),
        }
    }

    pub fn session(&self) -> Arc<ChatSession> {
        self.session.read().clone()
    }

    /// Replace the session with a fresh one, aborting any running turn.
    pub fn reset_session(&self) -> Arc<ChatSession> {
        let fresh = Arc::new(new_session(&self.config, &self.search, &self.llm));
        let old = std::mem::replace(&mut *self.session.write(), fresh.clone());
        old.shutdown();
        tracing::info!("Session {} replaced by {}", old.id(), fresh.id());
        fresh
    }
}

fn new_session(
    config: &Config,
    search: &Arc<dyn SearchBackend>,
    llm: &Arc<dyn TextGenerator>,
) -> ChatSession {
    ChatSession::new(
        SearchClient::new(
            search.clone(),
            Duration::from_millis(config.search.pace_ms),
        ),
        llm.clone(),
        TurnSettings::from_config(config),
    )
}
