//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which builds a full [`AppContext`] over a temporary
//! transcode root, with shell-script collaborators standing in for ffmpeg, and
//! starts Axum on a random port for HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use tl_av::{PtsAndDuration, ToolRegistry, TranscodeProcess};
use tl_core::config::{ChannelConfig, Config, LineupItem};
use tl_core::events::EventBus;
use tl_core::ChannelNumber;
use tl_server::context::{AppContext, Collaborators};
use tl_server::router::build_router;
use tl_session::{
    ErrorJobRequest, ErrorSlateSource, JobRequest, PlaybackProgress, ScheduleSource, SlateJob,
    TranscodeJob,
};

/// Writes one segment and a manifest listing it, then idles like a realtime encoder.
const FAKE_SEGMENTER: &str = "printf 'segment' > live000000.ts; \
     printf '#EXTM3U\\n#EXT-X-VERSION:6\\n#EXT-X-TARGETDURATION:4\\n#EXTINF:4.000000,\\nlive000000.ts\\n' > live.m3u8; \
     exec sleep 30";

pub struct ScriptSchedule {
    root: PathBuf,
}

#[async_trait]
impl ScheduleSource for ScriptSchedule {
    async fn transcode_job(&self, request: JobRequest) -> tl_core::Result<TranscodeJob> {
        let mut process = TranscodeProcess::new("sh");
        process
            .current_dir(self.root.join(request.channel.as_str()))
            .arg("-c")
            .arg(FAKE_SEGMENTER);
        Ok(TranscodeJob {
            process,
            duration: Some(Duration::from_secs(4)),
            until: request.reference_time + chrono::Duration::seconds(4),
            completed: false,
        })
    }
}

pub struct NoSlate;

#[async_trait]
impl ErrorSlateSource for NoSlate {
    async fn error_job(&self, request: ErrorJobRequest) -> tl_core::Result<SlateJob> {
        Err(tl_core::Error::tool("ffmpeg", format!("no slate for {}", request.channel)))
    }
}

pub struct NoProgress;

#[async_trait]
impl PlaybackProgress for NoProgress {
    async fn last_pts_and_duration(&self, channel: &ChannelNumber) -> tl_core::Result<PtsAndDuration> {
        Err(tl_core::Error::not_found("segment", channel))
    }
}

/// Test harness wrapping a fully-constructed [`AppContext`] and a running server.
pub struct TestHarness {
    pub ctx: AppContext,
    pub addr: SocketAddr,
    pub root: tempfile::TempDir,
}

impl TestHarness {
    /// Config with one channel, `"1"`, over a temporary transcode root.
    pub fn config(root: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.streaming.transcode_root = root.to_path_buf();
        config.streaming.idle_timeout_secs = 0;
        config.streaming.startup_wait_secs = 5;
        config.streaming.hard_cancel_grace_secs = 1;
        config.channels.push(ChannelConfig {
            number: ChannelNumber::new("1").expect("valid channel"),
            name: "Test".into(),
            items: vec![LineupItem {
                path: PathBuf::from("/media/test.mkv"),
                duration_secs: 60.0,
            }],
        });
        config
    }

    /// Start an Axum server on a random port.
    pub async fn with_server() -> Self {
        let root = tempfile::tempdir().expect("failed to create temp dir");
        let config = Self::config(root.path());

        let collaborators = Collaborators {
            schedule: Arc::new(ScriptSchedule {
                root: root.path().to_path_buf(),
            }),
            slates: Arc::new(NoSlate),
            progress: Arc::new(NoProgress),
        };
        let ctx = AppContext::new(
            config,
            Arc::new(ToolRegistry::default()),
            Arc::new(EventBus::default()),
            collaborators,
        );
        let app = build_router(ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self { ctx, addr, root }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Poll `condition` until it holds or a few seconds pass.
    pub async fn wait_until(&self, mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..500 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }
}
