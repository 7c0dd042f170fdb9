//! Built-in schedule: a fixed rotation over each channel's configured items.
//!
//! The rotation is anchored at the Unix epoch, so the item playing at any
//! instant is a pure function of the clock and the lineup.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tl_av::{build_segmenter, SegmenterInput, SegmenterRequest, ToolRegistry};
use tl_core::config::{Config, LineupItem};
use tl_core::ChannelNumber;
use tl_hls::ChannelFolder;
use tl_session::{JobRequest, ScheduleSource, TranscodeJob};

/// Longest job produced while working ahead from a mid-item seek.
const WORK_AHEAD_SLICE: Duration = Duration::from_secs(60);
/// Seeks shorter than this are snapped to the start of the item for zero-origin jobs.
const ZERO_TOLERANCE: Duration = Duration::from_secs(1);

/// Where a channel is at some instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub item: LineupItem,
    /// Offset into the item.
    pub offset: Duration,
    /// Time left in the item from `offset`.
    pub remaining: Duration,
}

/// Schedule source backed by the `channels` section of the config.
pub struct LineupSchedule {
    lineups: HashMap<ChannelNumber, Vec<LineupItem>>,
    tools: Arc<ToolRegistry>,
    transcode_root: PathBuf,
    segment_seconds: u32,
}

impl LineupSchedule {
    pub fn new(config: &Config, tools: Arc<ToolRegistry>) -> Self {
        let lineups = config
            .channels
            .iter()
            .map(|channel| (channel.number.clone(), channel.items.clone()))
            .collect();

        Self {
            lineups,
            tools,
            transcode_root: config.streaming.transcode_root.clone(),
            segment_seconds: config.streaming.segment_seconds,
        }
    }

    /// Locate the item playing on `channel` at `at`.
    pub fn position(&self, channel: &ChannelNumber, at: DateTime<Utc>) -> tl_core::Result<Position> {
        let items = self
            .lineups
            .get(channel)
            .ok_or_else(|| tl_core::Error::not_found("channel", channel))?;

        let lengths: Vec<i64> = items
            .iter()
            .map(|item| (item.duration_secs * 1000.0).round() as i64)
            .collect();
        let cycle: i64 = lengths.iter().filter(|&&ms| ms > 0).sum();
        if cycle <= 0 {
            return Err(tl_core::Error::schedule(channel, "lineup has no playable items"));
        }

        let mut offset = at.timestamp_millis().rem_euclid(cycle);
        for (item, &length) in items.iter().zip(&lengths) {
            if length <= 0 {
                continue;
            }
            if offset < length {
                return Ok(Position {
                    item: item.clone(),
                    offset: Duration::from_millis(offset as u64),
                    remaining: Duration::from_millis((length - offset) as u64),
                });
            }
            offset -= length;
        }

        Err(tl_core::Error::schedule(channel, "rotation offset out of range"))
    }
}

#[async_trait]
impl ScheduleSource for LineupSchedule {
    async fn transcode_job(&self, request: JobRequest) -> tl_core::Result<TranscodeJob> {
        let ffmpeg = self.tools.require("ffmpeg")?;
        let position = self.position(&request.channel, request.reference_time)?;

        let (seek, remaining) = if request.start_at_zero && position.offset < ZERO_TOLERANCE {
            (Duration::ZERO, position.remaining + position.offset)
        } else {
            (position.offset, position.remaining)
        };

        let working_ahead_from_seek = !request.realtime && !request.start_at_zero;
        let (duration, completed) = if working_ahead_from_seek && remaining > WORK_AHEAD_SLICE {
            (WORK_AHEAD_SLICE, false)
        } else {
            (remaining, true)
        };

        let until = request.reference_time
            + chrono::Duration::from_std(duration)
                .map_err(|e| tl_core::Error::Internal(format!("job duration out of range: {e}")))?;

        tracing::debug!(
            channel = %request.channel,
            item = %position.item.path.display(),
            seek = ?seek,
            duration = ?duration,
            completed,
            "Built transcode job"
        );

        let folder = ChannelFolder::new(&self.transcode_root, &request.channel);
        let process = build_segmenter(
            ffmpeg,
            &folder,
            &SegmenterRequest {
                input: SegmenterInput::File {
                    path: position.item.path.clone(),
                    seek,
                },
                duration: Some(duration),
                realtime: request.realtime,
                pts_offset: request.pts_offset,
                segment_seconds: self.segment_seconds,
            },
        );

        Ok(TranscodeJob {
            process,
            duration: Some(duration),
            until,
            completed,
        })
    }
}
