//! Axum router construction.

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::routes;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/sessions", get(routes::sessions::list_sessions))
        .route("/sessions/{number}", delete(routes::sessions::stop_session))
        .route(
            "/channels/{number}/playout-updated",
            post(routes::sessions::playout_updated),
        )
        .route("/tools", get(routes::tools::list_tools))
        .route("/events", get(routes::events::events_handler));

    let iptv = Router::new()
        .route("/channel/{file}", get(routes::channels::channel_playlist))
        .route(
            "/session/{number}/hls.m3u8",
            get(routes::channels::session_playlist),
        )
        .route(
            "/session/{number}/{segment}",
            get(routes::channels::session_segment),
        );

    Router::new()
        .route("/health", get(routes::health_check))
        .nest("/api", api)
        .nest("/iptv", iptv)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
