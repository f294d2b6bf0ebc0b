use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, Stream, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;

use crate::models::SearchResult;
use crate::search::web::SearchBackend;

/// Observable state of the most recent search.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchStatus {
    pub loading: bool,
    pub error: Option<String>,
    pub results: Vec<SearchResult>,
}

/// Ranked results of one search, or the message explaining why there are none.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub error: Option<String>,
}

/// Client-side search: ranks results and hands them out one at a time.
///
/// Failures never escape; they are recorded in [`SearchStatus`] and the
/// caller gets an empty result list.
#[derive(Clone)]
pub struct SearchClient {
    backend: Arc<dyn SearchBackend>,
    pace: Duration,
    status: Arc<RwLock<SearchStatus>>,
}

impl SearchClient {
    pub fn new(backend: Arc<dyn SearchBackend>, pace: Duration) -> Self {
        Self {
            backend,
            pace,
            status: Arc::new(RwLock::new(SearchStatus::default())),
        }
    }

    pub fn status(&self) -> SearchStatus {
        self.status.read().clone()
    }

    /// Run the search and return results sorted by score, without pacing.
    pub async fn fetch(&self, query: &str) -> SearchOutcome {
        {
            // Previous results stay visible until the new ones are in.
            let mut status = self.status.write();
            status.loading = true;
            status.error = None;
        }

        match self.backend.search(query).await {
            Ok(mut results) => {
                rank(&mut results);
                tracing::info!("Search for {query:?} returned {} results", results.len());
                let mut status = self.status.write();
                status.loading = false;
                status.results = results.clone();
                SearchOutcome {
                    results,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!("Search for {query:?} failed: {e}");
                let message = e.user_message();
                let mut status = self.status.write();
                status.loading = false;
                status.error = Some(message.clone());
                SearchOutcome {
                    results: Vec::new(),
                    error: Some(message),
                }
            }
        }
    }

    /// Yield `results` in order with the configured pause between items.
    pub fn pace(&self, results: Vec<SearchResult>) -> impl Stream<Item = SearchResult> + Send + 'static {
        paced(results, self.pace)
    }

    /// Fetch and pace in one lazy sequence. Each call issues a new request.
    pub fn search(&self, query: impl Into<String>) -> impl Stream<Item = SearchResult> + Send + 'static {
        let client = self.clone();
        let query = query.into();
        stream::once(async move {
            let outcome = client.fetch(&query).await;
            client.pace(outcome.results)
        })
        .flatten()
    }
}

/// Highest score first; equal scores keep provider order.
pub fn rank(results: &mut [SearchResult]) {
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
}

fn paced(results: Vec<SearchResult>, pace: Duration) -> impl Stream<Item = SearchResult> + Send + 'static {
    stream::unfold(
        (results.into_iter(), false),
        move |(mut iter, started)| async move {
            let next = iter.next()?;
            if started {
                tokio::time::sleep(pace).await;
            }
            Some((next, (iter, true)))
        },
    )
}
