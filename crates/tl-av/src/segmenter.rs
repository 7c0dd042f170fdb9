//! ffmpeg HLS segmenter command lines.
//!
//! Every invocation appends to the channel's rolling `live.m3u8` and writes
//! `live%06d.ts` segments into the channel folder.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tl_hls::segment::{segment_pattern, SegmentKind};
use tl_hls::ChannelFolder;

use crate::command::TranscodeProcess;
use crate::probe::PTS_TIMESCALE;

/// Frame rate used for GOP sizing.
const FRAME_RATE: u32 = 30;

const HLS_FLAGS: &str =
    "program_date_time+append_list+discont_start+omit_endlist+independent_segments";

/// What the segmenter reads from.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmenterInput {
    /// A media file, optionally starting part-way in.
    File { path: PathBuf, seek: Duration },
    /// A generated slate showing a message.
    Slate { message: String },
}

/// Everything needed to build one segmenter invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmenterRequest {
    pub input: SegmenterInput,
    /// Stop after this much output; `None` runs to the end of input.
    pub duration: Option<Duration>,
    /// Pace reading at playback speed.
    pub realtime: bool,
    /// Output timestamp offset in 90 kHz ticks.
    pub pts_offset: i64,
    pub segment_seconds: u32,
}

/// Build the ffmpeg process for a segmenter request.
pub fn build_segmenter(
    ffmpeg: &Path,
    folder: &ChannelFolder,
    request: &SegmenterRequest,
) -> TranscodeProcess {
    let mut cmd = TranscodeProcess::new(ffmpeg);
    cmd.current_dir(folder.path());
    cmd.args(["-hide_banner", "-nostdin", "-nostats", "-loglevel", "error"]);

    if request.realtime {
        cmd.arg("-re");
    }

    match &request.input {
        SegmenterInput::File { path, seek } => {
            if !seek.is_zero() {
                cmd.args(["-ss", &format_seconds(*seek)]);
            }
            cmd.arg("-i");
            cmd.arg(path.to_string_lossy().as_ref());
        }
        SegmenterInput::Slate { message } => {
            cmd.args(["-f", "lavfi", "-i", &slate_video_graph(message)]);
            cmd.args(["-f", "lavfi", "-i", "anullsrc=r=48000:cl=stereo"]);
        }
    }

    if let Some(duration) = request.duration {
        cmd.args(["-t", &format_seconds(duration)]);
    }

    match &request.input {
        SegmenterInput::File { .. } => cmd.args(["-map", "0:v:0", "-map", "0:a:0?"]),
        SegmenterInput::Slate { .. } => cmd.args(["-map", "0:v", "-map", "1:a"]),
    };

    cmd.args(["-c:v", "libx264", "-preset", "veryfast", "-pix_fmt", "yuv420p"]);
    cmd.args(["-c:a", "aac", "-b:a", "160k", "-ac", "2", "-ar", "48000"]);

    if request.pts_offset > 0 {
        let seconds = request.pts_offset as f64 / PTS_TIMESCALE as f64;
        cmd.args(["-output_ts_offset", &seconds.to_string()]);
    }

    let gop = (FRAME_RATE * request.segment_seconds.max(1)).to_string();
    cmd.args(["-g", &gop, "-keyint_min", &gop]);
    cmd.args([
        "-force_key_frames",
        &format!("expr:gte(t,n_forced*{})", request.segment_seconds.max(1)),
    ]);

    cmd.args(["-f", "hls"]);
    cmd.args(["-hls_time", &request.segment_seconds.max(1).to_string()]);
    cmd.args(["-hls_list_size", "0", "-segment_list_flags", "+live"]);
    cmd.arg("-hls_segment_filename");
    cmd.arg(
        folder
            .path()
            .join(segment_pattern(SegmentKind::Ts))
            .to_string_lossy()
            .as_ref(),
    );
    cmd.args(["-hls_flags", HLS_FLAGS]);
    cmd.args(["-mpegts_flags", "+initial_discontinuity"]);
    cmd.arg(folder.manifest_path().to_string_lossy().as_ref());

    cmd
}

fn format_seconds(d: Duration) -> String {
    format!("{:.3}", d.as_secs_f64())
}

fn slate_video_graph(message: &str) -> String {
    format!(
        "color=c=black:s=1280x720:r={FRAME_RATE},drawtext=text='{}':fontcolor=white:fontsize=28:x=(w-text_w)/2:y=(h-text_h)/2",
        escape_drawtext(message)
    )
}

/// Escape text for use inside a quoted `drawtext` option in a lavfi graph.
pub fn escape_drawtext(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines().filter(|l| !l.trim().is_empty()).take(4) {
        if !out.is_empty() {
            out.push(' ');
        }
        for c in line.trim().chars().take(120) {
            match c {
                '\\' => out.push_str("\\\\\\\\"),
                '\'' => out.push('\u{2019}'),
                ':' => out.push_str("\\:"),
                '%' => out.push_str("\\%"),
                ',' => out.push_str("\\,"),
                c if c.is_control() => out.push(' '),
                c => out.push(c),
            }
        }
    }
    out
}
