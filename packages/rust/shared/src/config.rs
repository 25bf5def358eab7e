//! Per-agent configuration.
//!
//! Each agent directory holds a `config.json`. Only `agent_name` and the
//! `storage` directories are required; every other section falls back to
//! the defaults below. Paths are relative to the agent directory.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{KhiveError, Result};
use crate::types::{AgentKind, DirRole};

/// Config file name inside every agent directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Upper bound for `tools.attempts`.
const MAX_TOOL_ATTEMPTS: u32 = 5;

// ---------------------------------------------------------------------------
// Top-level agent config
// ---------------------------------------------------------------------------

/// An agent's `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_name: String,

    #[serde(default)]
    pub role: String,

    #[serde(default = "default_version")]
    pub version: String,

    /// Named directories, relative to the agent directory.
    pub storage: StorageConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub selection: SelectionConfig,

    #[serde(default)]
    pub production: ProductionConfig,

    #[serde(default)]
    pub video: VideoConfig,

    #[serde(default)]
    pub hook: HookConfig,

    #[serde(default)]
    pub cta: CtaConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub tweet: TweetConfig,

    #[serde(default)]
    pub kpis: KpiConfig,

    #[serde(default)]
    pub clipping: ClippingConfig,
}

fn default_version() -> String {
    "1.0".into()
}

impl AgentConfig {
    /// The config `khive init` writes for an agent.
    pub fn default_for(kind: AgentKind) -> Self {
        let storage = match kind {
            AgentKind::Capture
            | AgentKind::Selector
            | AgentKind::Vertical
            | AgentKind::Coordinator => StorageConfig {
                input: Some("STORAGE/INPUT".into()),
                output: Some("STORAGE/OUTPUT".into()),
                logs: Some("STORAGE/LOGS".into()),
                ..StorageConfig::default()
            },
            AgentKind::Quality => StorageConfig {
                input: Some("STORAGE/INPUT".into()),
                output_approved: Some("../../../PRET_A_PUBLIER/TIKTOK".into()),
                output_rejected: Some("STORAGE/REJECTED".into()),
                logs: Some("STORAGE/LOGS".into()),
                ..StorageConfig::default()
            },
            AgentKind::Micro => StorageConfig {
                input: Some("STORAGE/INPUT".into()),
                output: Some("STORAGE/OUTPUT".into()),
                logs: Some("STORAGE/LOGS".into()),
                ready: Some("../../../PRET_A_PUBLIER/TWITTER".into()),
                ..StorageConfig::default()
            },
            AgentKind::Executive => StorageConfig {
                output: Some("STORAGE/OUTPUT".into()),
                logs: Some("STORAGE/LOGS".into()),
                ..StorageConfig::default()
            },
        };

        Self {
            agent_name: kind.dir_name().into(),
            role: kind.default_role().into(),
            version: default_version(),
            storage,
            tools: ToolsConfig::default(),
            selection: SelectionConfig::default(),
            production: ProductionConfig::default(),
            video: VideoConfig::default(),
            hook: HookConfig::default(),
            cta: CtaConfig::default(),
            validation: ValidationConfig::default(),
            tweet: TweetConfig::default(),
            kpis: KpiConfig::default(),
            clipping: ClippingConfig::default(),
        }
    }

    /// Check everything that can be checked without touching the filesystem.
    pub fn validate(&self, kind: AgentKind) -> Result<()> {
        if self.agent_name.trim().is_empty() {
            return Err(KhiveError::config("agent_name must not be empty"));
        }

        for role in kind.required_dirs() {
            match self.storage.get(*role) {
                Some(p) if !p.trim().is_empty() => {}
                _ => {
                    return Err(KhiveError::config(format!(
                        "{}: missing storage.{}",
                        self.agent_name,
                        role.config_key()
                    )));
                }
            }
        }

        let s = &self.selection;
        if s.min_duration > s.max_duration {
            return Err(KhiveError::config(format!(
                "selection.min_duration ({}) exceeds selection.max_duration ({})",
                s.min_duration, s.max_duration
            )));
        }
        if !(0.0..=100.0).contains(&s.vip_threshold) {
            return Err(KhiveError::config(format!(
                "selection.vip_threshold must be within 0..=100, got {}",
                s.vip_threshold
            )));
        }

        let v = &self.validation;
        if v.min_duration_seconds > v.max_duration_seconds {
            return Err(KhiveError::config(format!(
                "validation.min_duration_seconds ({}) exceeds validation.max_duration_seconds ({})",
                v.min_duration_seconds, v.max_duration_seconds
            )));
        }
        if v.max_size_mb <= 0.0 {
            return Err(KhiveError::config("validation.max_size_mb must be positive"));
        }
        if v.min_size_kb < 0.0 {
            return Err(KhiveError::config("validation.min_size_kb must not be negative"));
        }

        if self.video.target_duration <= 0.0 || self.video.width == 0 || self.video.height == 0 {
            return Err(KhiveError::config(
                "video.target_duration, video.width and video.height must be positive",
            ));
        }

        if self.tweet.max_length == 0 {
            return Err(KhiveError::config("tweet.max_length must be positive"));
        }
        if !(0.0..=100.0).contains(&self.tweet.vip_threshold) {
            return Err(KhiveError::config(format!(
                "tweet.vip_threshold must be within 0..=100, got {}",
                self.tweet.vip_threshold
            )));
        }

        if self.kpis.target_videos_per_day == 0 {
            return Err(KhiveError::config("kpis.target_videos_per_day must be positive"));
        }
        if !(0.0..=1.0).contains(&self.kpis.target_approval_rate) {
            return Err(KhiveError::config(format!(
                "kpis.target_approval_rate must be within 0..=1, got {}",
                self.kpis.target_approval_rate
            )));
        }

        if self.clipping.target_duration <= 0.0 {
            return Err(KhiveError::config("clipping.target_duration must be positive"));
        }

        if self.tools.attempts == 0 || self.tools.attempts > MAX_TOOL_ATTEMPTS {
            return Err(KhiveError::config(format!(
                "tools.attempts must be within 1..={MAX_TOOL_ATTEMPTS}, got {}",
                self.tools.attempts
            )));
        }

        Ok(())
    }
}

/// `storage` section. Keys absent from the file stay `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_approved: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_rejected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready: Option<String>,
}

impl StorageConfig {
    pub fn get(&self, role: DirRole) -> Option<&str> {
        match role {
            DirRole::Input => self.input.as_deref(),
            DirRole::Output => self.output.as_deref(),
            DirRole::Logs => self.logs.as_deref(),
            DirRole::Approved => self.output_approved.as_deref(),
            DirRole::Rejected => self.output_rejected.as_deref(),
            DirRole::Ready => self.ready.as_deref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// `tools` section: external media binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,

    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,

    /// Attempts per tool invocation (1 means no retry).
    #[serde(default = "default_attempts")]
    pub attempts: u32,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            attempts: default_attempts(),
        }
    }
}

fn default_ffmpeg() -> String {
    "ffmpeg".into()
}
fn default_ffprobe() -> String {
    "ffprobe".into()
}
fn default_attempts() -> u32 {
    1
}

/// `selection` section (selector).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Clips must have notoriety strictly above this value.
    #[serde(default = "default_vip_threshold")]
    pub vip_threshold: f64,

    #[serde(default = "default_min_clip_duration")]
    pub min_duration: f64,

    #[serde(default = "default_max_clip_duration")]
    pub max_duration: f64,

    #[serde(default = "default_max_clips")]
    pub max_clips: usize,

    /// Drop clips where the player gave no answer.
    #[serde(default = "default_true")]
    pub require_answer: bool,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            vip_threshold: default_vip_threshold(),
            min_duration: default_min_clip_duration(),
            max_duration: default_max_clip_duration(),
            max_clips: default_max_clips(),
            require_answer: true,
        }
    }
}

fn default_vip_threshold() -> f64 {
    90.0
}
fn default_min_clip_duration() -> f64 {
    3.0
}
fn default_max_clip_duration() -> f64 {
    180.0
}
fn default_max_clips() -> usize {
    3
}
fn default_true() -> bool {
    true
}

/// `production` section (vertical).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductionConfig {
    /// Only render the first N selected clips.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_clips: Option<usize>,

    /// Delete previous `.mp4`/`.md` outputs before rendering.
    #[serde(default)]
    pub clean_output_before_run: bool,
}

/// `video` section: render geometry and encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Seconds; renders are capped to this length.
    #[serde(default = "default_target_duration")]
    pub target_duration: f64,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_bitrate")]
    pub bitrate: String,
    #[serde(default = "default_bg_blur")]
    pub bg_blur: u32,
    /// Pixels cropped off the top of the source (status bar).
    #[serde(default)]
    pub crop_top_px: u32,
    /// Loop short sources up to `target_duration`.
    #[serde(default)]
    pub loop_if_short: bool,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            target_duration: default_target_duration(),
            fps: default_fps(),
            bitrate: default_bitrate(),
            bg_blur: default_bg_blur(),
            crop_top_px: 0,
            loop_if_short: false,
        }
    }
}

fn default_width() -> u32 {
    1080
}
fn default_height() -> u32 {
    1920
}
fn default_target_duration() -> f64 {
    30.0
}
fn default_fps() -> u32 {
    30
}
fn default_bitrate() -> String {
    "4M".into()
}
fn default_bg_blur() -> u32 {
    20
}

/// `hook` section: the text overlay shown at the start of a render.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfig {
    #[serde(default = "default_hook_duration")]
    pub duration_seconds: f64,
    #[serde(default = "default_hook_font_size")]
    pub font_size: u32,
    #[serde(default = "default_white")]
    pub font_color: String,
    #[serde(default = "default_black")]
    pub bg_color: String,
    #[serde(default = "default_bg_opacity")]
    pub bg_opacity: f64,
    #[serde(default = "default_hook_y")]
    pub position_y: u32,
    #[serde(default = "default_true")]
    pub shadow: bool,
    /// Characters per line before wrapping.
    #[serde(default = "default_wrap_width")]
    pub wrap_width: usize,
    /// Image overlaid instead of drawn text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner_path: Option<String>,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            duration_seconds: default_hook_duration(),
            font_size: default_hook_font_size(),
            font_color: default_white(),
            bg_color: default_black(),
            bg_opacity: default_bg_opacity(),
            position_y: default_hook_y(),
            shadow: true,
            wrap_width: default_wrap_width(),
            banner_path: None,
        }
    }
}

fn default_hook_duration() -> f64 {
    6.0
}
fn default_hook_font_size() -> u32 {
    64
}
fn default_white() -> String {
    "white".into()
}
fn default_black() -> String {
    "black".into()
}
fn default_bg_opacity() -> f64 {
    0.6
}
fn default_hook_y() -> u32 {
    300
}
fn default_wrap_width() -> usize {
    22
}

/// `cta` section: call-to-action shown at the end of a render.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtaConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cta_text")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(default = "default_true")]
    pub show_text: bool,
    #[serde(default = "default_cta_font_size")]
    pub font_size: u32,
    #[serde(default = "default_white")]
    pub font_color: String,
    #[serde(default = "default_cta_y")]
    pub position_y: u32,
    #[serde(default = "default_cta_lead")]
    pub start_at_seconds_before_end: f64,
}

impl Default for CtaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            text: default_cta_text(),
            image_path: None,
            show_text: true,
            font_size: default_cta_font_size(),
            font_color: default_white(),
            position_y: default_cta_y(),
            start_at_seconds_before_end: default_cta_lead(),
        }
    }
}

fn default_cta_text() -> String {
    "Joue sur K-Hive".into()
}
fn default_cta_font_size() -> u32 {
    48
}
fn default_cta_y() -> u32 {
    1500
}
fn default_cta_lead() -> f64 {
    5.0
}

/// `validation` section (quality control).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_min_video_duration")]
    pub min_duration_seconds: f64,
    #[serde(default = "default_max_video_duration")]
    pub max_duration_seconds: f64,
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: f64,
    /// 0 disables the floor.
    #[serde(default)]
    pub min_size_kb: f64,
    #[serde(default = "default_true")]
    pub require_video_stream: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_duration_seconds: default_min_video_duration(),
            max_duration_seconds: default_max_video_duration(),
            max_size_mb: default_max_size_mb(),
            min_size_kb: 0.0,
            require_video_stream: true,
        }
    }
}

fn default_min_video_duration() -> f64 {
    10.0
}
fn default_max_video_duration() -> f64 {
    60.0
}
fn default_max_size_mb() -> f64 {
    50.0
}

/// One text template for microcontent posts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TweetTemplate {
    /// Post type, e.g. `quiz`.
    pub kind: String,
    /// Body with `{year}`, `{title}`, `{description}`, `{fact}`, `{ref_year}`
    /// and `{app_link}` placeholders.
    pub text: String,
}

/// `tweet` section (microcontent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TweetConfig {
    #[serde(default = "default_hashtags")]
    pub default_hashtags: Vec<String>,
    #[serde(default = "default_tweet_vip")]
    pub vip_threshold: f64,
    /// Events kept when none clear the threshold.
    #[serde(default = "default_fallback_count")]
    pub fallback_count: usize,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default = "default_app_link")]
    pub app_link: String,
    #[serde(default = "default_templates")]
    pub templates: Vec<TweetTemplate>,
}

impl Default for TweetConfig {
    fn default() -> Self {
        Self {
            default_hashtags: default_hashtags(),
            vip_threshold: default_tweet_vip(),
            fallback_count: default_fallback_count(),
            max_length: default_max_length(),
            app_link: default_app_link(),
            templates: default_templates(),
        }
    }
}

fn default_hashtags() -> Vec<String> {
    vec!["#Histoire".into(), "#KHive".into()]
}
fn default_tweet_vip() -> f64 {
    80.0
}
fn default_fallback_count() -> usize {
    5
}
fn default_max_length() -> usize {
    280
}
fn default_app_link() -> String {
    "k-hive.app".into()
}
fn default_templates() -> Vec<TweetTemplate> {
    vec![
        TweetTemplate {
            kind: "quiz".into(),
            text: "{title} : avant ou après {ref_year} ? Réponse : {year}. Teste-toi sur {app_link}"
                .into(),
        },
        TweetTemplate {
            kind: "fact".into(),
            text: "Le saviez-vous ? {year} : {title}. {fact}".into(),
        },
        TweetTemplate {
            kind: "challenge".into(),
            text: "Défi : place {title} sur la frise. Indice, c'est autour de {ref_year}. Joue sur {app_link}"
                .into(),
        },
    ]
}

/// `kpis` section (executive).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KpiConfig {
    #[serde(default = "default_videos_per_day")]
    pub target_videos_per_day: u32,
    #[serde(default = "default_approval_rate")]
    pub target_approval_rate: f64,
    /// Journal entries newer than this count as recent activity.
    #[serde(default = "default_activity_window")]
    pub activity_window_hours: i64,
}

impl Default for KpiConfig {
    fn default() -> Self {
        Self {
            target_videos_per_day: default_videos_per_day(),
            target_approval_rate: default_approval_rate(),
            activity_window_hours: default_activity_window(),
        }
    }
}

fn default_videos_per_day() -> u32 {
    3
}
fn default_approval_rate() -> f64 {
    0.8
}
fn default_activity_window() -> i64 {
    24
}

/// `clipping` section (capture). All values in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClippingConfig {
    #[serde(default = "default_padding_before")]
    pub padding_before: f64,
    #[serde(default = "default_padding_vip")]
    pub padding_vip: f64,
    #[serde(default = "default_padding_standard")]
    pub padding_standard: f64,
    #[serde(default = "default_clip_target")]
    pub target_duration: f64,
    #[serde(default = "default_vip_threshold")]
    pub vip_threshold: f64,
}

impl Default for ClippingConfig {
    fn default() -> Self {
        Self {
            padding_before: default_padding_before(),
            padding_vip: default_padding_vip(),
            padding_standard: default_padding_standard(),
            target_duration: default_clip_target(),
            vip_threshold: default_vip_threshold(),
        }
    }
}

fn default_padding_before() -> f64 {
    3.0
}
fn default_padding_vip() -> f64 {
    8.0
}
fn default_padding_standard() -> f64 {
    5.0
}
fn default_clip_target() -> f64 {
    25.0
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Load and validate an agent config. Fails before anything is created on disk.
pub fn load_agent_config(path: &Path, kind: AgentKind) -> Result<AgentConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| KhiveError::io(path, e))?;

    let config: AgentConfig = serde_json::from_str(&content).map_err(|e| {
        KhiveError::config(format!("failed to parse {}: {e}", path.display()))
    })?;

    config.validate(kind)?;
    tracing::debug!(?path, agent = %config.agent_name, "loaded agent config");

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let json = r#"{
            "agent_name": "LEA",
            "storage": {
                "input": "STORAGE/INPUT",
                "output_approved": "../../../PRET_A_PUBLIER/TIKTOK",
                "output_rejected": "STORAGE/REJECTED",
                "logs": "STORAGE/LOGS"
            }
        }"#;
        let config: AgentConfig = serde_json::from_str(json).expect("parse");
        assert_eq!(config.version, "1.0");
        assert_eq!(config.validation.min_duration_seconds, 10.0);
        assert_eq!(config.validation.max_duration_seconds, 60.0);
        assert_eq!(config.hook.duration_seconds, 6.0);
        assert_eq!(config.selection.vip_threshold, 90.0);
        assert!(config.validate(AgentKind::Quality).is_ok());
    }

    #[test]
    fn missing_required_storage_key_is_rejected() {
        let json = r#"{"agent_name": "CHLOE", "storage": {"input": "IN", "logs": "LOGS"}}"#;
        let config: AgentConfig = serde_json::from_str(json).expect("parse");
        let err = config.validate(AgentKind::Vertical).unwrap_err();
        assert!(err.to_string().contains("storage.output"), "{err}");
    }

    #[test]
    fn empty_storage_value_is_rejected() {
        let mut config = AgentConfig::default_for(AgentKind::Micro);
        config.storage.ready = Some("  ".into());
        assert!(config.validate(AgentKind::Micro).is_err());
    }

    #[test]
    fn inverted_duration_band_is_rejected() {
        let mut config = AgentConfig::default_for(AgentKind::Quality);
        config.validation.min_duration_seconds = 90.0;
        let err = config.validate(AgentKind::Quality).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn out_of_range_targets_are_rejected() {
        let mut config = AgentConfig::default_for(AgentKind::Executive);
        config.kpis.target_approval_rate = 1.5;
        assert!(config.validate(AgentKind::Executive).is_err());

        let mut config = AgentConfig::default_for(AgentKind::Selector);
        config.selection.vip_threshold = 120.0;
        assert!(config.validate(AgentKind::Selector).is_err());

        let mut config = AgentConfig::default_for(AgentKind::Quality);
        config.validation.max_size_mb = 0.0;
        assert!(config.validate(AgentKind::Quality).is_err());
    }

    #[test]
    fn defaults_validate_for_every_agent() {
        for kind in AgentKind::ALL {
            let config = AgentConfig::default_for(kind);
            config
                .validate(kind)
                .unwrap_or_else(|e| panic!("{kind}: {e}"));
        }
    }

    #[test]
    fn default_config_roundtrip() {
        let config = AgentConfig::default_for(AgentKind::Micro);
        let json = serde_json::to_string_pretty(&config).expect("serialize");
        let parsed: AgentConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.storage.ready.as_deref(), Some("../../../PRET_A_PUBLIER/TWITTER"));
        assert_eq!(parsed.tweet.templates.len(), 3);
    }

    #[test]
    fn load_reports_parse_errors_with_path() {
        let tmp = std::env::temp_dir().join(format!("khive-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&tmp).expect("mkdir");
        let path = tmp.join(CONFIG_FILE_NAME);
        std::fs::write(&path, "{ not json").expect("write");

        let err = load_agent_config(&path, AgentKind::Selector).unwrap_err();
        assert!(err.to_string().contains("failed to parse"));

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
