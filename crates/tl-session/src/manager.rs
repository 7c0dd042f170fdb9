//! Registry of active sessions, keyed by channel.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::task::TaskTracker;

use tl_core::events::EventPayload;
use tl_core::{ChannelNumber, Error, Result};

use crate::runner::{run_session, SessionDeps};
use crate::session::{SessionHandle, SessionSettings, SessionStatus};

/// Owns every running session and the shared work-ahead governor.
pub struct SessionManager {
    sessions: Arc<DashMap<ChannelNumber, SessionHandle>>,
    deps: SessionDeps,
    settings: SessionSettings,
    tracker: TaskTracker,
}

impl SessionManager {
    pub fn new(deps: SessionDeps, settings: SessionSettings) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            deps,
            settings,
            tracker: TaskTracker::new(),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Start a session for `channel`, or touch the one already running.
    ///
    /// A session that is still stopping is replaced: the new one starts once
    /// the old one has released the channel folder.
    ///
    /// Returns the handle and whether a new session was started.
    pub fn start_or_touch(&self, channel: &ChannelNumber) -> Result<(SessionHandle, bool)> {
        if self.tracker.is_closed() {
            return Err(Error::Conflict("server is shutting down".into()));
        }

        let (handle, previous) = match self.sessions.entry(channel.clone()) {
            Entry::Occupied(entry) if !entry.get().is_cancelled() => {
                let handle = entry.get().clone();
                handle.touch();
                return Ok((handle, false));
            }
            Entry::Occupied(mut entry) => {
                let handle = SessionHandle::new(channel.clone(), &self.settings);
                handle.folder().ensure()?;
                let previous = entry.insert(handle.clone());
                tracing::debug!(
                    channel = %channel,
                    previous = %previous.id(),
                    "Replacing stopping session"
                );
                (handle, Some(previous))
            }
            Entry::Vacant(entry) => {
                let handle = SessionHandle::new(channel.clone(), &self.settings);
                handle.folder().ensure()?;
                entry.insert(handle.clone());
                (handle, None)
            }
        };

        self.spawn(handle.clone(), previous);

        tracing::info!(channel = %channel, session_id = %handle.id(), "Started session");
        self.deps.events.broadcast(EventPayload::SessionStarted {
            channel: channel.clone(),
        });
        Ok((handle, true))
    }

    fn spawn(&self, handle: SessionHandle, previous: Option<SessionHandle>) {
        let sessions = Arc::clone(&self.sessions);
        let deps = self.deps.clone();
        let settings = self.settings.clone();

        self.tracker.spawn(async move {
            if let Some(previous) = previous {
                previous.finished().await;
            }
            let id = handle.id();
            let channel = handle.channel().clone();
            run_session(handle, deps, settings).await;
            sessions.remove_if(&channel, |_, current| current.id() == id);
        });
    }

    pub fn get(&self, channel: &ChannelNumber) -> Option<SessionHandle> {
        self.sessions.get(channel).map(|entry| entry.value().clone())
    }

    /// Wait for a freshly started session to publish its first segments.
    ///
    /// Returns `false` when the startup ceiling passes first.
    pub async fn wait_for_playlist_segments(
        &self,
        channel: &ChannelNumber,
        initial_count: usize,
    ) -> Result<bool> {
        let handle = self
            .get(channel)
            .ok_or_else(|| Error::not_found("session", channel))?;
        Ok(handle
            .wait_for_playlist_segments(initial_count, self.settings.startup_wait)
            .await)
    }

    /// Tell a running session that its channel's schedule changed.
    pub fn playout_updated(&self, channel: &ChannelNumber) -> Result<()> {
        let handle = self
            .get(channel)
            .ok_or_else(|| Error::not_found("session", channel))?;
        handle.notify_schedule_changed();
        self.deps.events.broadcast(EventPayload::PlayoutUpdated {
            channel: channel.clone(),
        });
        Ok(())
    }

    /// Request a session stop.
    pub fn cancel(&self, channel: &ChannelNumber) -> Result<()> {
        let handle = self
            .get(channel)
            .ok_or_else(|| Error::not_found("session", channel))?;
        handle.cancel();
        Ok(())
    }

    /// Status of every session, ordered by channel.
    pub fn list(&self) -> Vec<SessionStatus> {
        let mut statuses: Vec<SessionStatus> =
            self.sessions.iter().map(|entry| entry.value().status()).collect();
        statuses.sort_by(|a, b| a.channel.as_str().cmp(b.channel.as_str()));
        statuses
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stop every session and wait for them to clean up.
    pub async fn shutdown(&self) {
        self.tracker.close();
        let handles: Vec<SessionHandle> =
            self.sessions.iter().map(|entry| entry.value().clone()).collect();
        tracing::info!(count = handles.len(), "Stopping all sessions");
        for handle in &handles {
            handle.cancel();
        }
        self.tracker.wait().await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::continuity::PlaybackProgress;
    use crate::governor::WorkAheadGovernor;
    use crate::jobs::{ErrorJobRequest, ErrorSlateSource, JobRequest, ScheduleSource, SlateJob, TranscodeJob};
    use crate::state::Origin;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
    use std::time::Duration;
    use tl_av::{PtsAndDuration, TranscodeProcess};
    use tl_core::events::EventBus;

    const WRITE_AND_IDLE: &str = "printf '#EXTM3U\\n#EXT-X-TARGETDURATION:4\\n#EXTINF:4.0,\\nlive000000.ts\\n' > live.m3u8; \
         touch live000000.ts; sleep 30";

    /// Runs `script` in the channel folder.
    struct WritingSchedule {
        root: PathBuf,
        script: &'static str,
    }

    impl WritingSchedule {
        /// Writes a one-segment manifest, then idles like a realtime encoder.
        fn new(root: &std::path::Path) -> Self {
            Self {
                root: root.to_path_buf(),
                script: WRITE_AND_IDLE,
            }
        }
    }

    #[async_trait]
    impl ScheduleSource for WritingSchedule {
        async fn transcode_job(&self, request: JobRequest) -> tl_core::Result<TranscodeJob> {
            let mut process = TranscodeProcess::new("sh");
            process.current_dir(self.root.join(request.channel.as_str()));
            process.arg("-c").arg(self.script);
            Ok(TranscodeJob {
                process,
                duration: None,
                until: request.reference_time + chrono::Duration::seconds(4),
                completed: false,
            })
        }
    }

    /// Panics on the first request, then behaves like [`WritingSchedule`].
    struct PanicOnceSchedule {
        inner: WritingSchedule,
        panicked: AtomicBool,
    }

    #[async_trait]
    impl ScheduleSource for PanicOnceSchedule {
        async fn transcode_job(&self, request: JobRequest) -> tl_core::Result<TranscodeJob> {
            if !self.panicked.swap(true, AtomicOrdering::SeqCst) {
                panic!("lineup lookup failed for {}", request.channel);
            }
            self.inner.transcode_job(request).await
        }
    }

    struct NoSlate;

    #[async_trait]
    impl ErrorSlateSource for NoSlate {
        async fn error_job(&self, request: ErrorJobRequest) -> tl_core::Result<SlateJob> {
            Err(tl_core::Error::tool("ffmpeg", format!("no slate for {}", request.channel)))
        }
    }

    struct NoProgress;

    #[async_trait]
    impl PlaybackProgress for NoProgress {
        async fn last_pts_and_duration(&self, channel: &ChannelNumber) -> tl_core::Result<PtsAndDuration> {
            Err(tl_core::Error::not_found("segment", channel))
        }
    }

    fn manager(root: &std::path::Path) -> (SessionManager, Arc<EventBus>) {
        manager_with(root, Arc::new(WritingSchedule::new(root)))
    }

    fn manager_with(
        root: &std::path::Path,
        schedule: Arc<dyn ScheduleSource>,
    ) -> (SessionManager, Arc<EventBus>) {
        let events = Arc::new(EventBus::default());
        let deps = SessionDeps::new(
            schedule,
            Arc::new(NoSlate),
            Arc::new(NoProgress),
            WorkAheadGovernor::new(1),
            Arc::clone(&events),
        );
        let settings = SessionSettings {
            transcode_root: root.to_path_buf(),
            idle_timeout: None,
            reap_interval: Duration::from_secs(30),
            hard_cancel_grace: Duration::from_millis(500),
            playlist_window: 10,
            initial_segment_count: 1,
            startup_wait: Duration::from_secs(5),
            origin: Origin::WallClock,
        };
        (SessionManager::new(deps, settings), events)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    fn channel(n: &str) -> ChannelNumber {
        ChannelNumber::new(n).unwrap()
    }

    #[tokio::test]
    async fn second_request_touches_existing_session() {
        let root = tempfile::tempdir().unwrap();
        let (manager, _events) = manager(root.path());

        let (first, started) = manager.start_or_touch(&channel("4")).unwrap();
        assert!(started);
        let (second, started) = manager.start_or_touch(&channel("4")).unwrap();
        assert!(!started);
        assert_eq!(first.id(), second.id());
        assert_eq!(manager.len(), 1);

        manager.shutdown().await;
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn start_clears_stale_folder() {
        let root = tempfile::tempdir().unwrap();
        let stale = root.path().join("4");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("live000099.ts"), b"old").unwrap();

        let (manager, _events) = manager(root.path());
        manager.start_or_touch(&channel("4")).unwrap();
        wait_until(|| !stale.join("live000099.ts").exists()).await;

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn cancel_removes_session_when_finished() {
        let root = tempfile::tempdir().unwrap();
        let (manager, events) = manager(root.path());
        let mut rx = events.subscribe();

        let (handle, _) = manager.start_or_touch(&channel("2")).unwrap();
        manager.cancel(&channel("2")).unwrap();
        handle.finished().await;

        // Entry removal runs right after the runner finishes.
        wait_until(|| manager.get(&channel("2")).is_none()).await;

        let started = rx.recv().await.unwrap();
        assert!(matches!(started.payload, EventPayload::SessionStarted { .. }));
    }

    #[tokio::test]
    async fn unknown_channel_operations_are_not_found() {
        let root = tempfile::tempdir().unwrap();
        let (manager, _events) = manager(root.path());

        assert_eq!(manager.cancel(&channel("9")).unwrap_err().http_status(), 404);
        assert_eq!(manager.playout_updated(&channel("9")).unwrap_err().http_status(), 404);
        assert!(manager
            .wait_for_playlist_segments(&channel("9"), 1)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn waits_for_initial_segments() {
        let root = tempfile::tempdir().unwrap();
        let (manager, _events) = manager(root.path());

        let (handle, _) = manager.start_or_touch(&channel("5")).unwrap();
        assert!(manager.wait_for_playlist_segments(&channel("5"), 1).await.unwrap());
        assert!(handle.folder().manifest_path().exists());

        manager.shutdown().await;
        assert!(handle.folder().is_empty());
    }

    #[tokio::test]
    async fn shutdown_rejects_new_sessions() {
        let root = tempfile::tempdir().unwrap();
        let (manager, _events) = manager(root.path());
        manager.start_or_touch(&channel("1")).unwrap();
        manager.start_or_touch(&channel("3")).unwrap();
        assert_eq!(manager.list().len(), 2);

        manager.shutdown().await;
        assert!(manager.is_empty());
        assert_eq!(manager.start_or_touch(&channel("1")).unwrap_err().http_status(), 409);
    }

    #[tokio::test]
    async fn panicked_runner_is_unregistered_and_channel_recovers() {
        let root = tempfile::tempdir().unwrap();
        let schedule = PanicOnceSchedule {
            inner: WritingSchedule::new(root.path()),
            panicked: AtomicBool::new(false),
        };
        let (manager, events) = manager_with(root.path(), Arc::new(schedule));

        let (first, _) = manager.start_or_touch(&channel("6")).unwrap();
        tokio::time::timeout(Duration::from_secs(5), first.finished())
            .await
            .unwrap();
        assert_eq!(first.status().phase, crate::session::RunnerPhase::Terminated);
        assert!(first.folder().is_empty());
        wait_until(|| manager.get(&channel("6")).is_none()).await;
        assert!(events.recent_events(10).iter().any(|e| matches!(
            e.payload,
            EventPayload::SessionStopped {
                reason: tl_core::events::StopReason::Failed,
                ..
            }
        )));

        let (second, started) = manager.start_or_touch(&channel("6")).unwrap();
        assert!(started);
        assert_ne!(first.id(), second.id());
        assert!(manager.wait_for_playlist_segments(&channel("6"), 1).await.unwrap());

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn request_during_stop_grace_starts_fresh_session() {
        let root = tempfile::tempdir().unwrap();
        let schedule = WritingSchedule {
            root: root.path().to_path_buf(),
            script: "trap '' TERM; touch live000007.ts; while true; do sleep 0.1; done",
        };
        let (manager, _events) = manager_with(root.path(), Arc::new(schedule));

        let (old, _) = manager.start_or_touch(&channel("8")).unwrap();
        let marker = old.folder().path().join("live000007.ts");
        wait_until(|| marker.exists()).await;

        manager.cancel(&channel("8")).unwrap();
        let (new, started) = manager.start_or_touch(&channel("8")).unwrap();
        assert!(started);
        assert_ne!(old.id(), new.id());
        assert!(!old.is_finished());
        assert_eq!(manager.get(&channel("8")).unwrap().id(), new.id());

        // The old session's cleanup must not unregister its replacement.
        tokio::time::timeout(Duration::from_secs(5), old.finished())
            .await
            .unwrap();
        wait_until(|| new.status().phase == crate::session::RunnerPhase::Looping).await;
        assert_eq!(manager.get(&channel("8")).unwrap().id(), new.id());
        wait_until(|| marker.exists()).await;

        manager.shutdown().await;
        assert!(manager.is_empty());
    }
}
