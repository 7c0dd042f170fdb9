//! Application context shared by every route handler via Axum state.

use std::sync::Arc;

use tl_av::ToolRegistry;
use tl_core::config::Config;
use tl_core::events::EventBus;
use tl_session::{
    ErrorSlateSource, PlaybackProgress, ScheduleSource, SessionDeps, SessionManager,
    SessionSettings, WorkAheadGovernor,
};

use crate::lineup::LineupSchedule;
use crate::progress::FfprobeProgress;
use crate::slate::SlateSource;

/// Channel collaborators handed to the session engine.
pub struct Collaborators {
    pub schedule: Arc<dyn ScheduleSource>,
    pub slates: Arc<dyn ErrorSlateSource>,
    pub progress: Arc<dyn PlaybackProgress>,
}

impl Collaborators {
    /// The built-in lineup, slate and ffprobe collaborators.
    pub fn builtin(config: &Config, tools: &Arc<ToolRegistry>) -> Self {
        let root = config.streaming.transcode_root.clone();
        Self {
            schedule: Arc::new(LineupSchedule::new(config, Arc::clone(tools))),
            slates: Arc::new(SlateSource::new(
                Arc::clone(tools),
                root.clone(),
                config.streaming.segment_seconds,
            )),
            progress: Arc::new(FfprobeProgress::new(Arc::clone(tools), root)),
        }
    }
}

/// Shared state for route handlers. Cheap to clone.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionManager>,
    pub tools: Arc<ToolRegistry>,
    pub event_bus: Arc<EventBus>,
}

impl AppContext {
    pub fn new(
        config: Config,
        tools: Arc<ToolRegistry>,
        event_bus: Arc<EventBus>,
        collaborators: Collaborators,
    ) -> Self {
        let governor = WorkAheadGovernor::new(config.streaming.work_ahead_limit);
        let deps = SessionDeps::new(
            collaborators.schedule,
            collaborators.slates,
            collaborators.progress,
            governor,
            Arc::clone(&event_bus),
        );
        let settings = SessionSettings::from_config(&config.streaming);

        Self {
            config: Arc::new(config),
            sessions: Arc::new(SessionManager::new(deps, settings)),
            tools,
            event_bus,
        }
    }
}
