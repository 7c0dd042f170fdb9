//! Presentation timestamp probing with ffprobe.
//!
//! Used to continue the output timeline of a new transcoder invocation
//! exactly where the last written segment ends.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// MPEG-TS timestamps tick at 90 kHz.
pub const PTS_TIMESCALE: i64 = 90_000;

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Last packet timestamp and duration, in [`PTS_TIMESCALE`] ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtsAndDuration {
    pub pts: i64,
    pub duration: i64,
}

impl PtsAndDuration {
    /// Parse one `pts_time|duration_time` line from `-of compact=p=0:nk=1`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.trim().split('|');
        let pts: f64 = parts.next()?.trim().parse().ok()?;
        let duration: f64 = parts.next()?.trim().parse().ok()?;
        if !pts.is_finite() || !duration.is_finite() {
            return None;
        }
        Some(Self {
            pts: seconds_to_ticks(pts),
            duration: seconds_to_ticks(duration),
        })
    }

    /// The first timestamp after this packet.
    pub fn end(&self) -> i64 {
        self.pts + self.duration
    }
}

fn seconds_to_ticks(seconds: f64) -> i64 {
    (seconds * PTS_TIMESCALE as f64).round() as i64
}

/// Probe the last packet of one stream type (`"v"` or `"a"`) in a segment.
///
/// Returns `Ok(None)` when the stream is absent or ffprobe fails.
pub async fn last_packet(
    ffprobe: &Path,
    segment: &Path,
    stream: &str,
) -> tl_core::Result<Option<PtsAndDuration>> {
    let mut cmd = Command::new(ffprobe);
    cmd.args(["-v", "0", "-select_streams"])
        .arg(format!("{stream}:0"))
        .args([
            "-show_entries",
            "packet=pts_time,duration_time",
            "-of",
            "compact=p=0:nk=1",
        ])
        .arg(segment)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let output = tokio::time::timeout(PROBE_TIMEOUT, cmd.output())
        .await
        .map_err(|_| tl_core::Error::tool("ffprobe", format!("timed out after {PROBE_TIMEOUT:?}")))?
        .map_err(|e| tl_core::Error::tool("ffprobe", format!("failed to run: {e}")))?;

    if !output.status.success() {
        return Ok(None);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let last = stdout.lines().rev().find(|l| !l.trim().is_empty());
    Ok(last.and_then(PtsAndDuration::parse))
}

/// Probe both audio and video and keep whichever ends later.
pub async fn last_pts_and_duration(
    ffprobe: &Path,
    segment: &Path,
) -> tl_core::Result<PtsAndDuration> {
    let video = last_packet(ffprobe, segment, "v").await?;
    let audio = last_packet(ffprobe, segment, "a").await?;

    match (video, audio) {
        (Some(v), Some(a)) => Ok(if v.end() >= a.end() { v } else { a }),
        (Some(only), None) | (None, Some(only)) => Ok(only),
        (None, None) => Err(tl_core::Error::tool(
            "ffprobe",
            format!("no packets found in {}", segment.display()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_line() {
        let parsed = PtsAndDuration::parse("12.000000|0.033367").unwrap();
        assert_eq!(parsed.pts, 1_080_000);
        assert_eq!(parsed.duration, 3003);
        assert_eq!(parsed.end(), 1_083_003);
    }

    #[test]
    fn rejects_incomplete_lines() {
        assert!(PtsAndDuration::parse("12.0").is_none());
        assert!(PtsAndDuration::parse("N/A|0.02").is_none());
        assert!(PtsAndDuration::parse("").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn uses_later_of_audio_and_video() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-ffprobe");
        std::fs::write(
            &script,
            "#!/bin/sh\ncase \"$4\" in\n  v:0) printf '1.0|0.5\\n2.0|0.5\\n' ;;\n  a:0) printf '2.0|0.6\\n' ;;\nesac\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let result = last_pts_and_duration(&script, Path::new("live000001.ts"))
            .await
            .unwrap();
        assert_eq!(result.pts, 180_000);
        assert_eq!(result.duration, 54_000);
    }
}
