//! # tl-av
//!
//! Transcoder process handling for tvloom.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to ffmpeg
//!   and ffprobe.
//! - **Process supervision** ([`TranscodeProcess`]) -- run a transcoder with
//!   stderr capture and two-stage (terminate, then kill) cancellation.
//! - **Segmenter commands** ([`segmenter`]) -- ffmpeg HLS command lines for
//!   media files and error slates.
//! - **PTS probing** ([`probe`]) -- read the last packet timestamp of a segment.

pub mod command;
pub mod probe;
pub mod segmenter;
pub mod tools;

pub use command::{ProcessOutcome, TranscodeProcess};
pub use probe::{last_pts_and_duration, PtsAndDuration, PTS_TIMESCALE};
pub use segmenter::{build_segmenter, SegmenterInput, SegmenterRequest};
pub use tools::{ToolInfo, ToolRegistry};
