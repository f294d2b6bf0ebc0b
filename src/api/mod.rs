pub mod ask;
pub mod chat;
pub mod search;
pub mod session;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// All HTTP routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/search", post(search::search))
        .route("/api/chat", post(chat::chat))
        .route("/api/ask", post(ask::ask))
        .route(
            "/api/session",
            get(session::get_session).delete(session::reset_session),
        )
        .route("/api/session/search", get(session::search_status))
        .with_state(state)
}
