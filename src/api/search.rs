use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::error::SEARCH_FAILED_MESSAGE;
use crate::models::{ErrorBody, SearchRequest, SearchResponse};
use crate::state::AppState;

/// POST /api/search - Proxy one query to the configured search provider.
pub async fn search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, (StatusCode, Json<ErrorBody>)> {
    let query = req.query.trim();
    if query.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: "Query is required".to_string(),
                details: None,
            }),
        ));
    }

    match state.search.search(query).await {
        Ok(results) => {
            tracing::info!("Search proxy: {} results for {query:?}", results.len());
            Ok(Json(SearchResponse { results }))
        }
        Err(e) => {
            tracing::warn!("Search proxy failed for {query:?}: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: SEARCH_FAILED_MESSAGE.to_string(),
                    details: Some(e.details()),
                }),
            ))
        }
    }
}
