//! Job collaborators and iteration outcomes.
//!
//! The session engine does not know what plays on a channel. It asks a
//! [`ScheduleSource`] for a ready-to-run transcode job and, when that job
//! fails, an [`ErrorSlateSource`] for a fallback that shows the failure.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tl_av::TranscodeProcess;
use tl_core::ChannelNumber;

/// Parameters for the next transcode job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub channel: ChannelNumber,
    /// Channel time the job should start from.
    pub reference_time: DateTime<Utc>,
    /// Start at the beginning of the item playing at `reference_time`.
    pub start_at_zero: bool,
    pub realtime: bool,
    /// Output timestamp offset in 90 kHz ticks.
    pub pts_offset: i64,
}

/// A runnable transcode job.
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    pub process: TranscodeProcess,
    /// Content duration, when known.
    pub duration: Option<Duration>,
    /// Channel time at which the produced segments end.
    pub until: DateTime<Utc>,
    /// Whether the job runs to the end of its content item.
    pub completed: bool,
}

/// Parameters for an error slate job.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorJobRequest {
    pub channel: ChannelNumber,
    pub realtime: bool,
    pub pts_offset: i64,
    pub duration: Option<Duration>,
    pub until: DateTime<Utc>,
    /// Diagnostic text to show.
    pub diagnostic: String,
}

/// A runnable error slate.
#[derive(Debug, Clone)]
pub struct SlateJob {
    pub process: TranscodeProcess,
    pub until: DateTime<Utc>,
}

/// Produces transcode jobs for channels.
#[async_trait]
pub trait ScheduleSource: Send + Sync {
    async fn transcode_job(&self, request: JobRequest) -> tl_core::Result<TranscodeJob>;

    /// Shift an on-demand channel's timeline so it resumes at `now`.
    async fn align_on_demand(&self, _channel: &ChannelNumber, _now: DateTime<Utc>) -> tl_core::Result<()> {
        Ok(())
    }

    /// Record how far an on-demand channel has been watched.
    async fn checkpoint(&self, _channel: &ChannelNumber, _at: DateTime<Utc>) -> tl_core::Result<()> {
        Ok(())
    }
}

/// Produces fallback jobs after a transcoder failure.
#[async_trait]
pub trait ErrorSlateSource: Send + Sync {
    async fn error_job(&self, request: ErrorJobRequest) -> tl_core::Result<SlateJob>;
}

/// What a failed transcode leaves behind for the fallback request.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackContext {
    pub exit_code: i32,
    pub diagnostic: String,
    pub duration: Option<Duration>,
    pub until: DateTime<Utc>,
}

impl FallbackContext {
    /// Build the context from a non-zero exit.
    pub fn from_exit(job: &TranscodeJob, exit_code: i32, stderr: &str) -> Self {
        let diagnostic = if stderr.trim().is_empty() {
            format!("Unknown ffmpeg error; exit code {exit_code}")
        } else {
            stderr.trim().to_string()
        };
        Self {
            exit_code,
            diagnostic,
            duration: job.duration,
            until: job.until,
        }
    }

    pub fn into_request(self, channel: ChannelNumber, realtime: bool, pts_offset: i64) -> ErrorJobRequest {
        ErrorJobRequest {
            channel,
            realtime,
            pts_offset,
            duration: self.duration,
            until: self.until,
            diagnostic: self.diagnostic,
        }
    }
}

/// Result of running one transcode job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The job exited cleanly.
    Completed { until: DateTime<Utc>, completed: bool },
    /// The transcoder exited non-zero.
    Failed(FallbackContext),
    /// The session was cancelled while the job ran.
    Cancelled,
}

impl JobOutcome {
    /// Classify a process outcome for `job`.
    pub fn from_process(job: &TranscodeJob, outcome: tl_av::ProcessOutcome) -> Self {
        match outcome {
            tl_av::ProcessOutcome::Cancelled => JobOutcome::Cancelled,
            tl_av::ProcessOutcome::Exited { exit_code: 0, .. } => JobOutcome::Completed {
                until: job.until,
                completed: job.completed,
            },
            tl_av::ProcessOutcome::Exited { exit_code, stderr } => {
                JobOutcome::Failed(FallbackContext::from_exit(job, exit_code, &stderr))
            }
        }
    }
}
