use std::convert::Infallible;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::stream::{self, Stream};
use tokio::sync::watch;

use crate::models::{AskRequest, ErrorBody};
use crate::session::state::{SessionView, TurnId};
use crate::state::AppState;

const MAX_QUESTION_LEN: usize = 2000;

enum Stage {
    Watch {
        updates: watch::Receiver<SessionView>,
        first: bool,
    },
    Finish,
    Done,
}

/// POST /api/ask - Submit a question to the session and stream its progress.
///
/// Emits `view` events (a full session snapshot) until the turn completes,
/// then `done`. If another question supersedes this one, emits `superseded`.
pub async fn ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, Json<ErrorBody>)> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: "Question is required".to_string(),
                details: None,
            }),
        ));
    }
    if question.len() > MAX_QUESTION_LEN {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: format!("Question exceeds {MAX_QUESTION_LEN} bytes"),
                details: None,
            }),
        ));
    }

    let session = state.session();
    let updates = session.subscribe();
    let turn = session.submit(question);

    Ok(Sse::new(turn_events(turn, updates)).keep_alive(KeepAlive::default()))
}

/// SSE events for one turn, driven by the session's snapshot channel.
fn turn_events(
    turn: TurnId,
    updates: watch::Receiver<SessionView>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(
        Stage::Watch {
            updates,
            first: true,
        },
        move |stage| async move {
            match stage {
                Stage::Watch {
                    mut updates,
                    first,
                } => {
                    if !first && updates.changed().await.is_err() {
                        // Session dropped (reset) while streaming.
                        return Some((Ok(simple_event("superseded")), Stage::Done));
                    }
                    let view = updates.borrow_and_update().clone();
                    if view.turn_id != Some(turn) {
                        return Some((Ok(simple_event("superseded")), Stage::Done));
                    }
                    let next = if view.complete {
                        Stage::Finish
                    } else {
                        Stage::Watch {
                            updates,
                            first: false,
                        }
                    };
                    Some((Ok(view_event(&view)), next))
                }
                Stage::Finish => Some((Ok(simple_event("done")), Stage::Done)),
                Stage::Done => None,
            }
        },
    )
}

fn view_event(view: &SessionView) -> Event {
    Event::default()
        .event("view")
        .json_data(view)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

fn simple_event(name: &str) -> Event {
    Event::default().event(name).data("{}")
}
