//! IPTV delivery: channel entry playlists, session playlists and segments.

use std::fmt::Write;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;

use tl_core::ChannelNumber;
use tl_hls::SegmentName;

use crate::context::AppContext;
use crate::error::AppError;

const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
/// Advertised bandwidth for the single variant.
const VARIANT_BANDWIDTH: u64 = 10_000_000;

/// GET /iptv/channel/{number}.m3u8
///
/// Starts the channel's session if needed and returns a multivariant
/// playlist pointing at the session playlist. A fresh session gets a bounded
/// wait for its first segments so players do not see an empty playlist.
pub async fn channel_playlist(
    State(ctx): State<AppContext>,
    Path(file): Path<String>,
) -> Result<Response, AppError> {
    let number = file
        .strip_suffix(".m3u8")
        .ok_or_else(|| tl_core::Error::not_found("playlist", &file))?;
    let channel: ChannelNumber = number.parse()?;
    if ctx.config.channel(&channel).is_none() {
        return Err(tl_core::Error::not_found("channel", &channel).into());
    }

    let (_, started) = ctx.sessions.start_or_touch(&channel)?;
    if started {
        let ready = ctx
            .sessions
            .wait_for_playlist_segments(&channel, ctx.sessions.settings().initial_segment_count)
            .await?;
        if !ready {
            tracing::debug!(channel = %channel, "Serving channel playlist before initial segments are ready");
        }
    }

    let mut body = String::new();
    let _ = writeln!(body, "#EXTM3U");
    let _ = writeln!(body, "#EXT-X-VERSION:3");
    let _ = writeln!(body, "#EXT-X-INDEPENDENT-SEGMENTS");
    let _ = writeln!(body, "#EXT-X-STREAM-INF:BANDWIDTH={VARIANT_BANDWIDTH}");
    let _ = writeln!(body, "/iptv/session/{channel}/hls.m3u8");

    Ok(playlist_response(body))
}

/// GET /iptv/session/{number}/hls.m3u8
pub async fn session_playlist(
    State(ctx): State<AppContext>,
    Path(number): Path<String>,
) -> Result<Response, AppError> {
    let channel: ChannelNumber = number.parse()?;
    let handle = ctx
        .sessions
        .get(&channel)
        .ok_or_else(|| tl_core::Error::not_found("session", &channel))?;
    handle.touch();

    let filter_before = Utc::now()
        - chrono::Duration::from_std(tl_session::PLAYER_LOOKBACK).unwrap_or_default();
    let trimmed = handle
        .trim_manifest_now(filter_before)
        .await
        .ok_or_else(|| tl_core::Error::not_found("playlist", &channel))?;

    Ok(playlist_response(trimmed.playlist))
}

/// GET /iptv/session/{number}/{segment}
pub async fn session_segment(
    State(ctx): State<AppContext>,
    Path((number, segment)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let channel: ChannelNumber = number.parse()?;

    // Only names the segmenter produces; this also rules out traversal.
    let name = SegmentName::parse(&segment)
        .ok_or_else(|| tl_core::Error::not_found("segment", &segment))?;

    let handle = ctx
        .sessions
        .get(&channel)
        .ok_or_else(|| tl_core::Error::not_found("session", &channel))?;
    handle.touch();

    let path = handle.folder().path().join(&segment);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(tl_core::Error::not_found("segment", &segment).into());
        }
        Err(e) => return Err(tl_core::Error::from(e).into()),
    };

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, name.kind.content_type())],
        bytes,
    )
        .into_response())
}

fn playlist_response(body: String) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}
