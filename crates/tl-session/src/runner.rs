//! Session runner: the per-channel transcode loop.
//!
//! One runner task exists per active channel. It repeatedly asks the schedule
//! for a job, runs it, and advances the session state until it is cancelled,
//! idles out, or both the job and its error slate fail.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::Instrument;

use tl_core::events::{EventBus, EventPayload, StopReason};

use crate::continuity::{ContinuityTracker, PlaybackProgress};
use crate::governor::{WorkAheadGovernor, WorkAheadPermit};
use crate::jobs::{ErrorJobRequest, ErrorSlateSource, JobOutcome, JobRequest, ScheduleSource};
use crate::session::{RunnerPhase, SessionHandle, SessionSettings};
use crate::state::SessionState;

/// Buffer beyond which the loop stops transcoding and only trims.
const HEALTHY_BUFFER: chrono::Duration = chrono::Duration::minutes(1);
/// Buffer at or beyond which jobs run at playback speed.
const REALTIME_BUFFER: chrono::Duration = chrono::Duration::seconds(30);
/// Sleep between trims while the buffer is healthy.
const HEALTHY_SLEEP: Duration = Duration::from_secs(5);
/// How far back the main loop keeps manifest entries.
const TRIM_LOOKBACK: chrono::Duration = chrono::Duration::minutes(1);

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct SessionDeps {
    pub schedule: Arc<dyn ScheduleSource>,
    pub slates: Arc<dyn ErrorSlateSource>,
    pub continuity: ContinuityTracker,
    pub governor: Arc<WorkAheadGovernor>,
    pub events: Arc<EventBus>,
}

impl SessionDeps {
    pub fn new(
        schedule: Arc<dyn ScheduleSource>,
        slates: Arc<dyn ErrorSlateSource>,
        progress: Arc<dyn PlaybackProgress>,
        governor: Arc<WorkAheadGovernor>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            schedule,
            slates,
            continuity: ContinuityTracker::new(progress),
            governor,
            events,
        }
    }
}

/// Run a session until it stops, then clean up its folder.
pub(crate) async fn run_session(
    handle: SessionHandle,
    deps: SessionDeps,
    settings: SessionSettings,
) -> StopReason {
    let span = tracing::info_span!("session", channel = %handle.channel());
    let events = Arc::clone(&deps.events);

    let watchdog = settings
        .idle_timeout
        .map(|timeout| tokio::spawn(idle_watchdog(handle.clone(), timeout)));
    let escalation = tokio::spawn(escalate_cancel(handle.clone(), settings.hard_cancel_grace));

    let runner = Runner {
        handle: handle.clone(),
        deps,
        settings,
    };
    // The loop runs as its own task so a panic still reaches the cleanup below.
    let task = tokio::spawn(async move { runner.run().await }.instrument(span.clone()));
    let mut reason = match task.await {
        Ok(reason) => reason,
        Err(e) => {
            span.in_scope(|| {
                tracing::error!(error = %e, "Session runner aborted");
            });
            StopReason::Failed
        }
    };

    let shared = &handle.shared;
    if reason == StopReason::Cancelled && shared.idle_fired.load(Ordering::Acquire) {
        reason = StopReason::Idle;
    }

    span.in_scope(|| {
        tracing::debug!(reason = ?reason, "Session stopping");
    });
    handle.update(|rt| rt.phase = RunnerPhase::Stopping);

    shared.soft.cancel();
    if let Some(watchdog) = watchdog {
        watchdog.abort();
    }
    escalation.abort();

    shared.folder.empty();
    handle.update(|rt| rt.phase = RunnerPhase::Terminated);

    events.broadcast(EventPayload::SessionStopped {
        channel: shared.channel.clone(),
        reason,
    });
    span.in_scope(|| {
        tracing::info!(reason = ?reason, "Session terminated");
    });
    shared.finished.cancel();

    reason
}

/// Cancel the session when no touch arrives within `timeout`.
async fn idle_watchdog(handle: SessionHandle, timeout: Duration) {
    let shared = &handle.shared;
    let mut touches = shared.touch_tx.subscribe();

    loop {
        let deadline = *touches.borrow_and_update() + timeout;
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                if touches.has_changed().unwrap_or(false) {
                    continue;
                }
                tracing::info!(channel = %shared.channel, "Stopping idle session");
                shared.idle_fired.store(true, Ordering::Release);
                shared.soft.cancel();
                return;
            }
            changed = touches.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = shared.soft.cancelled() => return,
        }
    }
}

/// After a stop request, force-kill the running process once `grace` passes.
async fn escalate_cancel(handle: SessionHandle, grace: Duration) {
    let shared = &handle.shared;
    shared.soft.cancelled().await;

    tokio::select! {
        _ = tokio::time::sleep(grace) => {
            tracing::debug!(channel = %shared.channel, "Grace period elapsed; killing transcoder");
            shared.hard.cancel();
        }
        _ = shared.finished.cancelled() => {}
    }
}

struct Runner {
    handle: SessionHandle,
    deps: SessionDeps,
    settings: SessionSettings,
}

impl Runner {
    async fn run(&self) -> StopReason {
        let shared = &self.handle.shared;
        let channel = &shared.channel;

        if !shared.folder.is_empty() {
            tracing::error!(
                folder = %shared.folder.path().display(),
                "Transcode folder is not empty; previous session may not have shut down cleanly"
            );
            shared.folder.empty();
        }

        let now = Utc::now();
        self.handle.update(|rt| rt.transcoded_until = now);
        shared.manifest.lock().await.playlist_start = now;

        if let Err(e) = self.deps.schedule.align_on_demand(channel, now).await {
            tracing::warn!(error = %e, "Failed to align on-demand channel");
        }

        let mut carried = self.deps.governor.try_acquire();
        let initial = self.settings.origin.initial_state(carried.is_some());
        self.handle.update(|rt| {
            rt.state = initial;
            rt.phase = RunnerPhase::Looping;
        });
        tracing::debug!(state = ?initial, "Session started");

        let reason = loop {
            if shared.soft.is_cancelled() {
                break StopReason::Cancelled;
            }

            if self.handle.take_schedule_changed() {
                self.handle.update(|rt| rt.state = SessionState::PlayoutUpdated);
            }

            let now = Utc::now();
            let buffer = self.handle.status().transcoded_until - now;

            if buffer > HEALTHY_BUFFER {
                drop(carried.take());
                self.handle.trim_and_reap(now - TRIM_LOOKBACK).await;
                tokio::select! {
                    _ = tokio::time::sleep(HEALTHY_SLEEP) => continue,
                    _ = shared.soft.cancelled() => break StopReason::Cancelled,
                }
            }

            let permit = if buffer >= REALTIME_BUFFER {
                drop(carried.take());
                None
            } else {
                carried.take().or_else(|| self.deps.governor.try_acquire())
            };

            if let Some(reason) = self.iteration(permit, now).await {
                break reason;
            }
        };

        let until = self.handle.status().transcoded_until;
        if let Err(e) = self.deps.schedule.checkpoint(channel, until).await {
            tracing::warn!(error = %e, "Failed to checkpoint on-demand progress");
        }

        reason
    }

    /// Run one job. The permit is released when this returns, on every path.
    async fn iteration(&self, permit: Option<WorkAheadPermit>, now: DateTime<Utc>) -> Option<StopReason> {
        let shared = &self.handle.shared;
        let channel = &shared.channel;
        let origin = self.settings.origin;

        let current = self.handle.status().state;
        let state = if permit.is_some() {
            let next = current.accelerate();
            if next != current {
                tracing::debug!(from = ?current, to = ?next, "Work-ahead slot granted; accelerating");
            }
            next
        } else {
            let next = current.throttle();
            if next != current {
                tracing::debug!(from = ?current, to = ?next, "Throttling to realtime");
            }
            next
        };
        self.handle.update(|rt| rt.state = state);

        let pts_offset = self.handle.pts_offset(&self.deps.continuity).await;
        let transcoded_until = self.handle.status().transcoded_until;
        let realtime = state.is_realtime() || permit.is_none();

        let request = JobRequest {
            channel: channel.clone(),
            reference_time: origin.reference_time(state, now, transcoded_until),
            start_at_zero: state.starts_at_zero(),
            realtime,
            pts_offset,
        };
        tracing::debug!(
            state = ?state,
            reference_time = %request.reference_time,
            pts_offset,
            realtime,
            "Requesting transcode job"
        );

        let job = match self.deps.schedule.transcode_job(request).await {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to create transcode job");
                return Some(StopReason::Failed);
            }
        };

        self.handle.trim_and_reap(now - TRIM_LOOKBACK).await;

        let outcome = match job.process.run(&shared.soft, &shared.hard).await {
            Ok(outcome) => JobOutcome::from_process(&job, outcome),
            Err(e) => {
                tracing::error!(error = %e, "Failed to run transcoder");
                return Some(StopReason::Failed);
            }
        };

        match outcome {
            JobOutcome::Completed { until, completed } => {
                let next = origin.next_state(state, completed);
                self.advance(until, next);
                tracing::debug!(until = %until, completed, next = ?next, "Transcode finished");
                None
            }
            JobOutcome::Cancelled => {
                tracing::info!("Transcoder cancelled");
                Some(StopReason::Cancelled)
            }
            JobOutcome::Failed(context) => {
                tracing::error!(
                    exit_code = context.exit_code,
                    diagnostic = %context.diagnostic,
                    "Transcoder exited with an error"
                );
                self.deps.events.broadcast(EventPayload::TranscodeFailed {
                    channel: channel.clone(),
                    exit_code: context.exit_code,
                });

                let wrote = shared
                    .folder
                    .list_segments()
                    .map(|segments| !segments.is_empty())
                    .unwrap_or(false);
                if wrote {
                    self.handle.update(|rt| rt.has_written_segments = true);
                }

                let pts_offset = self.handle.pts_offset(&self.deps.continuity).await;
                let request = context.into_request(channel.clone(), realtime, pts_offset);
                self.run_error_slate(request, state).await
            }
        }
    }

    async fn run_error_slate(
        &self,
        request: ErrorJobRequest,
        state: SessionState,
    ) -> Option<StopReason> {
        let shared = &self.handle.shared;
        let channel = &shared.channel;

        let slate = match self.deps.slates.error_job(request).await {
            Ok(slate) => slate,
            Err(e) => {
                tracing::error!(error = %e, "Failed to create error slate");
                self.deps.events.broadcast(EventPayload::ErrorSlateFailed {
                    channel: channel.clone(),
                });
                return Some(StopReason::Failed);
            }
        };

        match slate.process.run(&shared.soft, &shared.hard).await {
            Ok(tl_av::ProcessOutcome::Exited { exit_code: 0, .. }) => {
                let next = self.settings.origin.next_state(state, false);
                self.advance(slate.until, next);
                tracing::debug!(until = %slate.until, next = ?next, "Error slate finished");
                None
            }
            Ok(tl_av::ProcessOutcome::Cancelled) => {
                tracing::info!("Error slate cancelled");
                Some(StopReason::Cancelled)
            }
            Ok(tl_av::ProcessOutcome::Exited { exit_code, stderr }) => {
                tracing::error!(exit_code, stderr = %stderr, "Error slate failed; stopping session");
                self.deps.events.broadcast(EventPayload::ErrorSlateFailed {
                    channel: channel.clone(),
                });
                Some(StopReason::Failed)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to run error slate; stopping session");
                self.deps.events.broadcast(EventPayload::ErrorSlateFailed {
                    channel: channel.clone(),
                });
                Some(StopReason::Failed)
            }
        }
    }

    fn advance(&self, until: DateTime<Utc>, next: SessionState) {
        self.handle.update(|rt| {
            rt.transcoded_until = rt.transcoded_until.max(until);
            rt.has_written_segments = true;
            rt.state = next;
        });
    }
}
