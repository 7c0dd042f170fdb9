//! Presentation-timestamp continuity between transcoder invocations.

use std::sync::Arc;

use async_trait::async_trait;
use tl_av::PtsAndDuration;
use tl_core::ChannelNumber;

/// Reports where the last written segment of a channel ends.
#[async_trait]
pub trait PlaybackProgress: Send + Sync {
    async fn last_pts_and_duration(&self, channel: &ChannelNumber) -> tl_core::Result<PtsAndDuration>;
}

/// Computes the output timestamp offset for the next transcoder invocation.
#[derive(Clone)]
pub struct ContinuityTracker {
    progress: Arc<dyn PlaybackProgress>,
}

impl ContinuityTracker {
    pub fn new(progress: Arc<dyn PlaybackProgress>) -> Self {
        Self { progress }
    }

    /// Offset (90 kHz ticks) that continues right after the last written packet.
    ///
    /// Zero when nothing has been written yet or the lookup fails.
    pub async fn pts_offset(&self, channel: &ChannelNumber, has_written_segments: bool) -> i64 {
        if !has_written_segments {
            return 0;
        }

        match self.progress.last_pts_and_duration(channel).await {
            Ok(last) => last.pts + last.duration + 1,
            Err(e) => {
                tracing::warn!(channel = %channel, error = %e, "Failed to read last pts; using offset 0");
                0
            }
        }
    }
}
