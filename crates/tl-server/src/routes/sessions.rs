//! Session administration.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use tl_core::ChannelNumber;
use tl_session::SessionStatus;

use crate::context::AppContext;
use crate::error::AppError;

/// GET /api/sessions
pub async fn list_sessions(State(ctx): State<AppContext>) -> Json<Vec<SessionStatus>> {
    Json(ctx.sessions.list())
}

/// DELETE /api/sessions/{number}
///
/// Stopping is asynchronous; the session disappears from the list once its
/// folder has been cleaned up.
pub async fn stop_session(
    State(ctx): State<AppContext>,
    Path(number): Path<String>,
) -> Result<StatusCode, AppError> {
    let channel: ChannelNumber = number.parse()?;
    ctx.sessions.cancel(&channel)?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/channels/{number}/playout-updated
pub async fn playout_updated(
    State(ctx): State<AppContext>,
    Path(number): Path<String>,
) -> Result<StatusCode, AppError> {
    let channel: ChannelNumber = number.parse()?;
    ctx.sessions.playout_updated(&channel)?;
    Ok(StatusCode::ACCEPTED)
}
