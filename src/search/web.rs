use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::{SearchConfig, SearchDepth};
use crate::error::SearchError;
use crate::models::{ErrorBody, SearchRequest, SearchResponse, SearchResult};

/// The external search collaborator.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Run one search and return the provider's results in provider order.
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError>;
}

/// Web search over HTTP, dispatching on the configured provider.
#[derive(Clone)]
pub struct WebSearch {
    client: reqwest::Client,
    config: SearchConfig,
}

impl WebSearch {
    pub fn new(client: reqwest::Client, config: SearchConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl SearchBackend for WebSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError> {
        match self.config.provider.as_str() {
            "tavily" => search_tavily(&self.client, &self.config, query).await,
            "proxy" => search_proxy(&self.client, &self.config, query).await,
            other => Err(SearchError::UnsupportedProvider(other.to_string())),
        }
    }
}

// ─── Tavily ──────────────────────────────────────────────

#[derive(Serialize)]
struct TavilySearchRequest<'a> {
    query: &'a str,
    search_depth: SearchDepth,
    max_results: usize,
    include_answer: bool,
    include_raw_content: bool,
    include_images: bool,
}

async fn search_tavily(
    client: &reqwest::Client,
    config: &SearchConfig,
    query: &str,
) -> Result<Vec<SearchResult>, SearchError> {
    let api_key = config.api_key.as_deref().ok_or(SearchError::MissingApiKey)?;
    let url = format!("{}/search", config.base_url.trim_end_matches('/'));

    let req = TavilySearchRequest {
        query,
        search_depth: config.search_depth,
        max_results: config.max_results,
        include_answer: config.include_answer,
        include_raw_content: config.include_raw_content,
        include_images: config.include_images,
    };

    let resp = client
        .post(&url)
        .header("Authorization", format!("Bearer {api_key}"))
        .json(&req)
        .send()
        .await?;

    read_results(resp).await
}

// ─── Proxy ({query} -> {results} | {error, details}) ─────

async fn search_proxy(
    client: &reqwest::Client,
    config: &SearchConfig,
    query: &str,
) -> Result<Vec<SearchResult>, SearchError> {
    let url = format!("{}/api/search", config.base_url.trim_end_matches('/'));

    let resp = client
        .post(&url)
        .json(&SearchRequest {
            query: query.to_string(),
        })
        .send()
        .await?;

    read_results(resp).await
}

async fn read_results(resp: reqwest::Response) -> Result<Vec<SearchResult>, SearchError> {
    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(parse_error_body(status, &body));
    }

    parse_results(&body)
}

fn parse_results(body: &str) -> Result<Vec<SearchResult>, SearchError> {
    serde_json::from_str::<SearchResponse>(body)
        .map(|r| r.results)
        .map_err(|e| SearchError::Malformed(e.to_string()))
}

/// Tavily nests its message as `{"detail": {"error": "..."}}`.
#[derive(Deserialize)]
struct DetailBody {
    detail: DetailInner,
}

#[derive(Deserialize)]
struct DetailInner {
    error: String,
}

fn parse_error_body(status: StatusCode, body: &str) -> SearchError {
    if let Ok(b) = serde_json::from_str::<ErrorBody>(body) {
        return SearchError::Api {
            status,
            error: b.error,
            details: b.details,
        };
    }
    if let Ok(b) = serde_json::from_str::<DetailBody>(body) {
        return SearchError::Api {
            status,
            error: b.detail.error.clone(),
            details: Some(b.detail.error),
        };
    }
    SearchError::Api {
        status,
        error: body.trim().to_string(),
        details: None,
    }
}
