use axum::extract::State;
use axum::Json;

use crate::search::client::SearchStatus;
use crate::session::state::SessionView;
use crate::state::AppState;

/// GET /api/session - Current snapshot of the session.
pub async fn get_session(State(state): State<AppState>) -> Json<SessionView> {
    Json(state.session().view())
}

/// DELETE /api/session - Start over with an empty session.
pub async fn reset_session(State(state): State<AppState>) -> Json<SessionView> {
    Json(state.reset_session().view())
}

/// GET /api/session/search - Loading/error/results of the latest search.
pub async fn search_status(State(state): State<AppState>) -> Json<SearchStatus> {
    Json(state.session().search_status())
}
