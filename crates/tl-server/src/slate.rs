//! Error slate: a generated card showing why a channel's transcode failed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use tl_av::{build_segmenter, SegmenterInput, SegmenterRequest, ToolRegistry};
use tl_hls::ChannelFolder;
use tl_session::{ErrorJobRequest, ErrorSlateSource, SlateJob};

/// Slate length when the failed job's duration is unknown.
const DEFAULT_SLATE: Duration = Duration::from_secs(30);
/// Longest diagnostic shown on screen.
const MAX_MESSAGE_CHARS: usize = 300;

pub struct SlateSource {
    tools: Arc<ToolRegistry>,
    transcode_root: PathBuf,
    segment_seconds: u32,
}

impl SlateSource {
    pub fn new(tools: Arc<ToolRegistry>, transcode_root: PathBuf, segment_seconds: u32) -> Self {
        Self {
            tools,
            transcode_root,
            segment_seconds,
        }
    }
}

#[async_trait]
impl ErrorSlateSource for SlateSource {
    async fn error_job(&self, request: ErrorJobRequest) -> tl_core::Result<SlateJob> {
        let ffmpeg = self.tools.require("ffmpeg")?;

        let duration = request.duration.unwrap_or(DEFAULT_SLATE);
        let until = match request.duration {
            Some(_) => request.until,
            None => {
                request.until
                    + chrono::Duration::from_std(DEFAULT_SLATE).map_err(|e| {
                        tl_core::Error::Internal(format!("slate duration out of range: {e}"))
                    })?
            }
        };

        let message = last_line(&request.diagnostic);
        let folder = ChannelFolder::new(&self.transcode_root, &request.channel);
        let process = build_segmenter(
            ffmpeg,
            &folder,
            &SegmenterRequest {
                input: SegmenterInput::Slate { message },
                duration: Some(duration),
                realtime: request.realtime,
                pts_offset: request.pts_offset,
                segment_seconds: self.segment_seconds,
            },
        );

        Ok(SlateJob { process, until })
    }
}

/// ffmpeg's useful message is usually its last line.
fn last_line(diagnostic: &str) -> String {
    let line = diagnostic
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("Transcode failed");
    line.chars().take(MAX_MESSAGE_CHARS).collect()
}
