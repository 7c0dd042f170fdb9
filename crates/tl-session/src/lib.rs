//! Live HLS session engine.
//!
//! Each active channel gets one session: a runner task that keeps a rolling
//! `live.m3u8` and its segments ahead of viewers by repeatedly invoking a
//! transcoder, switching between working ahead and realtime as the buffer and
//! the shared [`WorkAheadGovernor`] allow.

pub mod continuity;
pub mod governor;
pub mod jobs;
pub mod manager;
pub mod runner;
pub mod session;
pub mod state;

pub use continuity::{ContinuityTracker, PlaybackProgress};
pub use governor::{WorkAheadGovernor, WorkAheadPermit};
pub use jobs::{
    ErrorJobRequest, ErrorSlateSource, FallbackContext, JobOutcome, JobRequest, ScheduleSource,
    SlateJob, TranscodeJob,
};
pub use manager::SessionManager;
pub use runner::SessionDeps;
pub use session::{RunnerPhase, SessionHandle, SessionSettings, SessionStatus, PLAYER_LOOKBACK};
pub use state::{Origin, SessionState};
