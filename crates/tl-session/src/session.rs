//! Session handle and shared per-channel state.
//!
//! A [`SessionHandle`] is what the delivery layer holds: it keeps the session
//! alive, stops it, trims the manifest for players and reports status. The
//! runner task shares the same state.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tl_core::config::StreamingConfig;
use tl_core::ChannelNumber;
use tl_hls::{ChannelFolder, TrimResult};

use crate::continuity::ContinuityTracker;
use crate::state::{Origin, SessionState};

/// How far back a player-facing trim keeps entries.
pub const PLAYER_LOOKBACK: Duration = Duration::from_secs(30);

const MANIFEST_POLL: Duration = Duration::from_millis(100);
const SEGMENT_POLL: Duration = Duration::from_millis(200);

/// Tunables shared by every session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub transcode_root: PathBuf,
    /// `None` disables the idle timer.
    pub idle_timeout: Option<Duration>,
    pub reap_interval: Duration,
    pub hard_cancel_grace: Duration,
    pub playlist_window: usize,
    pub initial_segment_count: usize,
    pub startup_wait: Duration,
    pub origin: Origin,
}

impl SessionSettings {
    pub fn from_config(cfg: &StreamingConfig) -> Self {
        Self {
            transcode_root: cfg.transcode_root.clone(),
            idle_timeout: cfg.idle_timeout(),
            reap_interval: cfg.reap_interval(),
            hard_cancel_grace: cfg.hard_cancel_grace(),
            playlist_window: cfg.playlist_window_segments,
            initial_segment_count: cfg.initial_segment_count,
            startup_wait: cfg.startup_wait(),
            origin: if cfg.continuous_origin {
                Origin::Continuous
            } else {
                Origin::WallClock
            },
        }
    }
}

/// Lifecycle phase of a session's runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerPhase {
    Starting,
    Looping,
    Stopping,
    Terminated,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub channel: ChannelNumber,
    pub state: SessionState,
    pub phase: RunnerPhase,
    pub transcoded_until: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}

#[derive(Debug)]
pub(crate) struct RuntimeState {
    pub state: SessionState,
    pub phase: RunnerPhase,
    pub transcoded_until: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub has_written_segments: bool,
}

/// Guarded by the manifest lock.
#[derive(Debug)]
pub(crate) struct ManifestState {
    pub playlist_start: DateTime<Utc>,
    pub last_reap: Option<Instant>,
}

#[derive(Debug)]
pub(crate) struct SessionShared {
    pub id: Uuid,
    pub channel: ChannelNumber,
    pub folder: ChannelFolder,
    pub runtime: parking_lot::Mutex<RuntimeState>,
    pub manifest: tokio::sync::Mutex<ManifestState>,
    pub schedule_changed: AtomicBool,
    pub idle_fired: AtomicBool,
    pub touch_tx: watch::Sender<Instant>,
    /// Cooperative stop.
    pub soft: CancellationToken,
    /// Forced kill of the running process.
    pub hard: CancellationToken,
    /// Fired once the runner has fully stopped.
    pub finished: CancellationToken,
    pub reap_interval: Duration,
    pub playlist_window: usize,
}

/// Delivery-facing handle to a running session. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub(crate) shared: Arc<SessionShared>,
}

impl SessionHandle {
    pub(crate) fn new(channel: ChannelNumber, settings: &SessionSettings) -> Self {
        let now = Utc::now();
        let (touch_tx, _) = watch::channel(Instant::now());
        let folder = ChannelFolder::new(&settings.transcode_root, &channel);

        Self {
            shared: Arc::new(SessionShared {
                id: Uuid::new_v4(),
                channel,
                folder,
                runtime: parking_lot::Mutex::new(RuntimeState {
                    state: settings.origin.initial_state(true),
                    phase: RunnerPhase::Starting,
                    transcoded_until: now,
                    last_access: now,
                    has_written_segments: false,
                }),
                manifest: tokio::sync::Mutex::new(ManifestState {
                    playlist_start: now,
                    last_reap: None,
                }),
                schedule_changed: AtomicBool::new(false),
                idle_fired: AtomicBool::new(false),
                touch_tx,
                soft: CancellationToken::new(),
                hard: CancellationToken::new(),
                finished: CancellationToken::new(),
                reap_interval: settings.reap_interval,
                playlist_window: settings.playlist_window,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn channel(&self) -> &ChannelNumber {
        &self.shared.channel
    }

    pub fn folder(&self) -> &ChannelFolder {
        &self.shared.folder
    }

    /// Reset the idle timer.
    pub fn touch(&self) {
        self.shared.runtime.lock().last_access = Utc::now();
        self.shared.touch_tx.send_replace(Instant::now());
    }

    /// Ask the session to stop.
    pub fn cancel(&self) {
        if !self.shared.soft.is_cancelled() {
            tracing::info!(channel = %self.shared.channel, "Termination requested for session");
        }
        self.shared.soft.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.soft.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.finished.is_cancelled()
    }

    /// Wait until the runner has fully stopped.
    pub async fn finished(&self) {
        self.shared.finished.cancelled().await;
    }

    /// Make the next iteration restart from wall-clock now.
    pub fn notify_schedule_changed(&self) {
        tracing::debug!(channel = %self.shared.channel, "Schedule changed; session will restart playout");
        self.shared.schedule_changed.store(true, Ordering::Release);
    }

    pub(crate) fn take_schedule_changed(&self) -> bool {
        self.shared.schedule_changed.swap(false, Ordering::AcqRel)
    }

    pub fn status(&self) -> SessionStatus {
        let runtime = self.shared.runtime.lock();
        SessionStatus {
            channel: self.shared.channel.clone(),
            state: runtime.state,
            phase: runtime.phase,
            transcoded_until: runtime.transcoded_until,
            last_access: runtime.last_access,
        }
    }

    /// Trim the manifest for a requesting player.
    ///
    /// The on-disk manifest is left as is; only the returned text is windowed.
    /// Returns `None` while the manifest is missing or unreadable.
    pub async fn trim_manifest_now(&self, filter_before: DateTime<Utc>) -> Option<TrimResult> {
        let mut guard = self.shared.manifest.lock().await;

        let lines = self.read_manifest_lines()?;
        match tl_hls::trim_window(
            guard.playlist_start,
            filter_before,
            &lines,
            self.shared.playlist_window.max(1),
        ) {
            Ok(result) => {
                self.maybe_reap(&mut guard, result.sequence);
                Some(result)
            }
            Err(e) => {
                tracing::warn!(channel = %self.shared.channel, error = %e, "Error trimming playlist");
                None
            }
        }
    }

    /// Trim the on-disk manifest ahead of a new transcoder invocation.
    pub(crate) async fn trim_and_reap(&self, filter_before: DateTime<Utc>) {
        let mut guard = self.shared.manifest.lock().await;

        let Some(lines) = self.read_manifest_lines() else {
            return;
        };

        let result =
            match tl_hls::trim_with_discontinuity(guard.playlist_start, filter_before, &lines) {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(channel = %self.shared.channel, error = %e, "Error trimming playlist");
                    return;
                }
            };

        if let Err(e) = self.shared.folder.write_manifest(&result.playlist) {
            tracing::warn!(channel = %self.shared.channel, error = %e, "Failed to write trimmed playlist");
            return;
        }

        guard.playlist_start = result.playlist_start;
        self.maybe_reap(&mut guard, result.sequence);
    }

    /// Offset for the next invocation, read under the manifest lock.
    pub(crate) async fn pts_offset(&self, continuity: &ContinuityTracker) -> i64 {
        let _guard = self.shared.manifest.lock().await;
        let has_written = self.shared.runtime.lock().has_written_segments;
        continuity.pts_offset(&self.shared.channel, has_written).await
    }

    /// Wait for the first segments of a fresh session.
    ///
    /// Returns `true` once `initial_count` segments are listed, `false` if
    /// `ceiling` passes or the session stops first.
    pub async fn wait_for_playlist_segments(&self, initial_count: usize, ceiling: Duration) -> bool {
        let started = Instant::now();
        let deadline = started + ceiling;
        let manifest = self.shared.folder.manifest_path();

        tracing::debug!(channel = %self.shared.channel, "Waiting for playlist to exist");
        while !tokio::fs::try_exists(&manifest).await.unwrap_or(false) {
            if Instant::now() >= deadline {
                tracing::debug!(channel = %self.shared.channel, "Playlist did not appear in time");
                return false;
            }
            tokio::select! {
                _ = tokio::time::sleep(MANIFEST_POLL) => {}
                _ = self.shared.soft.cancelled() => return false,
            }
        }

        let mut segment_count = 0;
        let mut last_logged = None;
        while Instant::now() < deadline && segment_count < initial_count {
            if last_logged != Some(segment_count) {
                last_logged = Some(segment_count);
                tracing::debug!(
                    channel = %self.shared.channel,
                    "Segment count {segment_count} of {initial_count}"
                );
            }

            tokio::select! {
                _ = tokio::time::sleep(SEGMENT_POLL) => {}
                _ = self.shared.soft.cancelled() => return false,
            }

            let filter_before = Utc::now() - chrono::Duration::from_std(PLAYER_LOOKBACK).unwrap_or_default();
            if let Some(result) = self.trim_manifest_now(filter_before).await {
                segment_count = result.segment_count;
            }
        }

        tracing::debug!(
            channel = %self.shared.channel,
            elapsed = ?started.elapsed(),
            "Finished waiting for playlist segments"
        );
        segment_count >= initial_count
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut RuntimeState) -> R) -> R {
        f(&mut self.shared.runtime.lock())
    }

    fn read_manifest_lines(&self) -> Option<Vec<String>> {
        match self.shared.folder.read_manifest_lines() {
            Ok(Some(lines)) => Some(lines),
            Ok(None) => {
                tracing::debug!(channel = %self.shared.channel, "Playlist is missing or empty");
                None
            }
            Err(e) => {
                tracing::warn!(channel = %self.shared.channel, error = %e, "Failed to read playlist");
                None
            }
        }
    }

    fn maybe_reap(&self, guard: &mut ManifestState, cutoff: i64) {
        let due = guard
            .last_reap
            .map_or(true, |last| last.elapsed() >= self.shared.reap_interval);
        if !due {
            return;
        }
        guard.last_reap = Some(Instant::now());

        match self.shared.folder.reap(cutoff) {
            Ok(report) if report.deleted > 0 || report.failed > 0 => {
                tracing::debug!(
                    channel = %self.shared.channel,
                    cutoff,
                    deleted = report.deleted,
                    failed = report.failed,
                    "Reaped old segments"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(channel = %self.shared.channel, error = %e, "Failed to list segments");
            }
        }
    }
}
