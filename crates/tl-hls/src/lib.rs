//! tl-hls: rolling HLS manifest editing and segment housekeeping.
//!
//! # Modules
//!
//! - [`playlist`] - Trim a live manifest, rewrite program-date-time, window for players
//! - [`segment`] - Segment file naming and sequence parsing
//! - [`folder`] - Per-channel folder layout, manifest I/O and the segment reaper

pub mod error;
pub mod folder;
pub mod playlist;
pub mod segment;

pub use error::{Error, Result};
pub use folder::{ChannelFolder, ReapReport, MANIFEST_FILE};
pub use playlist::{trim, trim_window, trim_with_discontinuity, TrimResult};
pub use segment::{parse_sequence, SegmentKind, SegmentName};
