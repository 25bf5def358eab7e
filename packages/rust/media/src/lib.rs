//! Media tool boundary for the K-Hive pipeline.
//!
//! Agents never spawn ffmpeg themselves; they go through [`MediaTool`]. The
//! production implementation is [`Ffmpeg`]. Tests in dependent crates enable
//! the `testing` feature and use [`testing::ScriptedMedia`].

pub mod ffmpeg;
pub mod filter;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::path::PathBuf;

use khive_shared::{CtaConfig, HookConfig, Result, VideoConfig};

pub use ffmpeg::Ffmpeg;

/// Cut `[start, start + duration)` out of `source` without re-encoding.
#[derive(Debug, Clone)]
pub struct CutRequest {
    pub source: PathBuf,
    pub output: PathBuf,
    pub start: f64,
    pub duration: f64,
}

/// Render a 9:16 video with the hook overlay.
#[derive(Debug, Clone)]
pub struct VerticalRequest {
    pub source: PathBuf,
    pub output: PathBuf,
    /// Output length in seconds.
    pub duration: f64,
    /// Loop the source to fill `duration`.
    pub loop_source: bool,
    pub hook_text: String,
    pub video: VideoConfig,
    pub hook: HookConfig,
    pub cta: CtaConfig,
    /// Resolved banner image, replacing the drawn hook text.
    pub banner: Option<PathBuf>,
    /// Resolved call-to-action image.
    pub cta_image: Option<PathBuf>,
}

/// External audio/video tooling used by the agents.
pub trait MediaTool: Send + Sync {
    /// Container duration in seconds.
    fn probe_duration(&self, path: &std::path::Path) -> Result<f64>;

    /// Whether the file has a readable video stream.
    fn probe_video_stream(&self, path: &std::path::Path) -> Result<bool>;

    fn cut(&self, request: &CutRequest) -> Result<()>;

    fn render_vertical(&self, request: &VerticalRequest) -> Result<()>;
}
