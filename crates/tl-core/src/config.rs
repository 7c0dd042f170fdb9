//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! server, streaming, tools and channel lineup sections. Every section
//! defaults sensibly so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::ids::ChannelNumber;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub streaming: StreamingConfig,
    pub tools: ToolsConfig,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Look up a configured channel by number.
    pub fn channel(&self, number: &ChannelNumber) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| &c.number == number)
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if self.streaming.work_ahead_limit == 0 {
            warnings.push(
                "streaming.work_ahead_limit is 0; every session will transcode in realtime"
                    .into(),
            );
        }

        if self.streaming.segment_seconds == 0 {
            warnings.push("streaming.segment_seconds is 0; ffmpeg will pick its own".into());
        }

        if self.streaming.playlist_window_segments == 0 {
            warnings.push("streaming.playlist_window_segments is 0; window is unbounded".into());
        }

        let mut seen = HashSet::new();
        for (i, channel) in self.channels.iter().enumerate() {
            if !seen.insert(channel.number.clone()) {
                warnings.push(format!(
                    "channels[{i}] duplicates channel number {}",
                    channel.number
                ));
            }
            if channel.items.is_empty() {
                warnings.push(format!("channels[{i}].items is empty"));
            }
            for (j, item) in channel.items.iter().enumerate() {
                if item.duration_secs <= 0.0 {
                    warnings.push(format!(
                        "channels[{i}].items[{j}].duration_secs must be positive"
                    ));
                }
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8409,
        }
    }
}

/// Session engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Root under which each channel gets its own segment folder.
    pub transcode_root: PathBuf,
    /// Seconds without a keep-alive before a session stops. `0` disables.
    pub idle_timeout_secs: u64,
    /// Maximum sessions transcoding faster than realtime at once.
    pub work_ahead_limit: usize,
    /// Minimum seconds between segment reaps for one session.
    pub reap_interval_secs: u64,
    /// Segments that must exist before the first playlist is served.
    pub initial_segment_count: usize,
    /// Ceiling on the startup wait for initial segments.
    pub startup_wait_secs: u64,
    /// Grace between a cooperative stop and a forced kill.
    pub hard_cancel_grace_secs: u64,
    /// Target HLS segment length.
    pub segment_seconds: u32,
    /// Segments served to players per playlist request.
    pub playlist_window_segments: usize,
    /// Continue mid-item jobs from the end of the buffer instead of seeking
    /// to wall-clock now.
    pub continuous_origin: bool,
}

impl StreamingConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    pub fn startup_wait(&self) -> Duration {
        Duration::from_secs(self.startup_wait_secs)
    }

    pub fn hard_cancel_grace(&self) -> Duration {
        Duration::from_secs(self.hard_cancel_grace_secs)
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            transcode_root: PathBuf::from("./transcode"),
            idle_timeout_secs: 60,
            work_ahead_limit: 1,
            reap_interval_secs: 30,
            initial_segment_count: 1,
            startup_wait_secs: 8,
            hard_cancel_grace_secs: 10,
            segment_seconds: 4,
            playlist_window_segments: 10,
            continuous_origin: false,
        }
    }
}

/// External tool path overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

/// A channel in the built-in rotation lineup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub number: ChannelNumber,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub items: Vec<LineupItem>,
}

/// One media file in a channel rotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineupItem {
    pub path: PathBuf,
    pub duration_secs: f64,
}
