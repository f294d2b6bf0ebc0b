//! # search-chat
//!
//! Chat over web search. A question is (for follow-ups) rewritten into a
//! standalone query, searched on the web, and answered by an LLM that cites
//! the results. Sources, the model's thinking trace and the answer all stream
//! into one session view as they arrive.
//!
//! ## Turn pipeline
//!
//! ```text
//!   question ──► Query Reformulation ──► Web Search ──► paced sources ──┐
//!               (follow-ups only,          (ranked by                    │
//!                falls back to question)    score)                       ▼
//!                                                          Answer stream (LLM)
//!                                                          <think>…</think> answer
//!                                                                        │
//!                                       every event ──► SessionState reducer
//!                                                                        │
//!                                                              SessionView snapshot
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for the server, LLM and search provider
//! - [`models`] - Wire types: `SearchResult`, `ConversationTurn`, request/response bodies
//! - [`error`] - Search error taxonomy
//! - [`search::web`] - Search backends (Tavily, or any `{query} -> {results}` proxy)
//! - [`search::client`] - Ranking, pacing and observable status of a search
//! - [`llm::chat_stream`] - Streaming completions from Ollama or OpenAI-compatible APIs
//! - [`llm::reformulate`] - Follow-up question to standalone query
//! - [`llm::answer`] - Answer prompt with numbered sources and the thinking contract
//! - [`thinking`] - Incremental `<think>` delimiter scanner
//! - [`session`] - Reducer-driven session state and the turn driver
//! - [`api`] - Axum HTTP handlers
//! - [`state`] - Shared application state

pub mod api;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod search;
pub mod session;
pub mod state;
pub mod thinking;
