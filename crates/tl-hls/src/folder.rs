//! Per-channel segment folder.
//!
//! Each active channel owns one directory under the transcode root holding
//! the rolling `live.m3u8` manifest and its segment files.

use std::path::{Path, PathBuf};

use tl_core::ChannelNumber;

use crate::error::Result;
use crate::segment::SegmentName;

/// File name of the rolling manifest written by the segmenter.
pub const MANIFEST_FILE: &str = "live.m3u8";

/// Result of a reap pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Segments removed.
    pub deleted: usize,
    /// Segments that could not be removed (usually still open by a player).
    pub failed: usize,
}

/// A segment file found on disk.
#[derive(Debug, Clone)]
pub struct SegmentFile {
    pub path: PathBuf,
    pub name: SegmentName,
}

/// The directory holding one channel's manifest and segments.
#[derive(Debug, Clone)]
pub struct ChannelFolder {
    dir: PathBuf,
}

impl ChannelFolder {
    pub fn new(root: &Path, channel: &ChannelNumber) -> Self {
        Self {
            dir: root.join(channel.as_str()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    /// Create the folder if it does not exist.
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Read the manifest's lines.
    ///
    /// Returns `Ok(None)` when the manifest does not exist yet or is empty.
    pub fn read_manifest_lines(&self) -> Result<Option<Vec<String>>> {
        match std::fs::read_to_string(self.manifest_path()) {
            Ok(text) if text.trim().is_empty() => Ok(None),
            Ok(text) => Ok(Some(text.lines().map(str::to_owned).collect())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the manifest atomically (write to a sibling, then rename).
    pub fn write_manifest(&self, contents: &str) -> Result<()> {
        let tmp = self.dir.join(format!("{MANIFEST_FILE}.tmp"));
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, self.manifest_path())?;
        Ok(())
    }

    /// All segment files currently in the folder, sorted by sequence.
    pub fn list_segments(&self) -> Result<Vec<SegmentFile>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut segments = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if let Some(name) = SegmentName::from_path(&path) {
                segments.push(SegmentFile { path, name });
            }
        }
        segments.sort_by_key(|s| s.name.sequence);
        Ok(segments)
    }

    /// Whether the folder is missing or has no entries.
    pub fn is_empty(&self) -> bool {
        match std::fs::read_dir(&self.dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        }
    }

    /// Delete every segment whose sequence number is below `cutoff`.
    ///
    /// Per-file failures are logged and counted; they never abort the pass.
    pub fn reap(&self, cutoff: i64) -> Result<ReapReport> {
        let mut report = ReapReport::default();

        for segment in self.list_segments()? {
            if segment.name.sequence >= cutoff {
                continue;
            }
            match std::fs::remove_file(&segment.path) {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::debug!(
                        path = %segment.path.display(),
                        error = %e,
                        "Failed to delete old segment"
                    );
                }
            }
        }

        Ok(report)
    }

    /// Remove everything in the folder. Failures are logged, never returned.
    pub fn empty(&self) {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "Failed to read channel folder");
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            if let Err(e) = result {
                tracing::debug!(path = %path.display(), error = %e, "Failed to remove file");
            }
        }
    }
}
