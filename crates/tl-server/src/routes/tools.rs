//! External tool availability.

use axum::extract::State;
use axum::Json;

use crate::context::AppContext;

/// GET /api/tools
pub async fn list_tools(State(ctx): State<AppContext>) -> Json<Vec<tl_av::ToolInfo>> {
    let tools = ctx.tools.clone();
    // Version detection runs the tools synchronously.
    let infos = tokio::task::spawn_blocking(move || tools.check_all())
        .await
        .unwrap_or_default();
    Json(infos)
}
