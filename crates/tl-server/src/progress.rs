//! Playback progress from the newest segment on disk.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use tl_av::{PtsAndDuration, ToolRegistry};
use tl_core::ChannelNumber;
use tl_hls::segment::SegmentKind;
use tl_hls::ChannelFolder;
use tl_session::PlaybackProgress;

/// Reads the last packet of a channel's newest `.ts` segment with ffprobe.
pub struct FfprobeProgress {
    tools: Arc<ToolRegistry>,
    transcode_root: PathBuf,
}

impl FfprobeProgress {
    pub fn new(tools: Arc<ToolRegistry>, transcode_root: PathBuf) -> Self {
        Self {
            tools,
            transcode_root,
        }
    }
}

#[async_trait]
impl PlaybackProgress for FfprobeProgress {
    async fn last_pts_and_duration(&self, channel: &ChannelNumber) -> tl_core::Result<PtsAndDuration> {
        let ffprobe = self.tools.require("ffprobe")?;
        let folder = ChannelFolder::new(&self.transcode_root, channel);

        let newest = folder
            .list_segments()?
            .into_iter()
            .filter(|segment| segment.name.kind == SegmentKind::Ts)
            .next_back()
            .ok_or_else(|| tl_core::Error::not_found("segment", channel))?;

        tl_av::last_pts_and_duration(ffprobe, &newest.path).await
    }
}
