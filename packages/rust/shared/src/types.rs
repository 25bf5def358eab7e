//! Core domain types for the K-Hive pipeline.
//!
//! On-disk JSON keeps the field names already used by existing pipeline
//! artifacts (`titre`, `notoriete`, `choix`...), mapped onto English Rust names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Agents and units
// ---------------------------------------------------------------------------

/// The organisational unit an agent directory lives under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    /// `REPORTERS_UNIT`: capture and clip cutting.
    Reporters,
    /// `K_HIVE`: selection, production, validation and management.
    KHive,
}

impl Unit {
    /// Directory name under the pipeline root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Reporters => "REPORTERS_UNIT",
            Self::KHive => "K_HIVE",
        }
    }
}

/// Every independently runnable pipeline agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AgentKind {
    /// Capture stage: cuts a raw session recording into per-event clips.
    Capture,
    /// Content-strategy selector: ranks clips and writes hooks.
    Selector,
    /// Vertical-video production (9:16 render with hook overlay).
    Vertical,
    /// Quality control: approves or rejects rendered videos.
    Quality,
    /// Text/microcontent production (tweet-length posts).
    Micro,
    /// Head of unit: runs the production sub-pipelines and reports.
    Coordinator,
    /// Executive KPI aggregator.
    Executive,
}

impl AgentKind {
    /// All agents, in pipeline order.
    pub const ALL: [AgentKind; 7] = [
        Self::Capture,
        Self::Selector,
        Self::Vertical,
        Self::Quality,
        Self::Micro,
        Self::Coordinator,
        Self::Executive,
    ];

    /// Agent directory name (`<root>/<unit>/AGENTS/<dir_name>`).
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Capture => "DERUSH",
            Self::Selector => "MARC",
            Self::Vertical => "CHLOE",
            Self::Quality => "LEA",
            Self::Micro => "JEAN",
            Self::Coordinator => "HUGO",
            Self::Executive => "LOUIS",
        }
    }

    /// Name accepted on the command line (`khive agent <name>`).
    pub fn cli_name(&self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::Selector => "selector",
            Self::Vertical => "vertical",
            Self::Quality => "quality",
            Self::Micro => "micro",
            Self::Coordinator => "coordinator",
            Self::Executive => "executive",
        }
    }

    pub fn unit(&self) -> Unit {
        match self {
            Self::Capture => Unit::Reporters,
            _ => Unit::KHive,
        }
    }

    /// Default human-readable role, written into journal entries.
    pub fn default_role(&self) -> &'static str {
        match self {
            Self::Capture => "Clip Cutter",
            Self::Selector => "Content Strategist",
            Self::Vertical => "TikTok Production",
            Self::Quality => "Quality Control",
            Self::Micro => "Twitter Production",
            Self::Coordinator => "Head of Social",
            Self::Executive => "CEO",
        }
    }

    /// Prefix of journal file names (`<prefix>_<millis>_<seq>.json`).
    pub fn log_prefix(&self) -> String {
        self.dir_name().to_lowercase()
    }

    /// Storage roles that must be present in this agent's config.
    pub fn required_dirs(&self) -> &'static [DirRole] {
        match self {
            Self::Capture | Self::Selector | Self::Vertical | Self::Coordinator => {
                &[DirRole::Input, DirRole::Output, DirRole::Logs]
            }
            Self::Quality => &[
                DirRole::Input,
                DirRole::Approved,
                DirRole::Rejected,
                DirRole::Logs,
            ],
            Self::Micro => &[
                DirRole::Input,
                DirRole::Output,
                DirRole::Logs,
                DirRole::Ready,
            ],
            Self::Executive => &[DirRole::Output, DirRole::Logs],
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        AgentKind::ALL
            .into_iter()
            .find(|k| k.cli_name() == lower || k.dir_name().eq_ignore_ascii_case(&lower))
            .or(match lower.as_str() {
                "derush" => Some(Self::Capture),
                _ => None,
            })
            .ok_or_else(|| {
                format!(
                    "unknown agent '{s}': expected one of capture, selector, vertical, quality, micro, coordinator, executive"
                )
            })
    }
}

/// A named storage directory in an agent's config (`storage.<key>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DirRole {
    Input,
    Output,
    Logs,
    Approved,
    Rejected,
    /// Ready-to-publish directory.
    Ready,
}

impl DirRole {
    pub const ALL: [DirRole; 6] = [
        Self::Input,
        Self::Output,
        Self::Logs,
        Self::Approved,
        Self::Rejected,
        Self::Ready,
    ];

    /// Key under `storage` in `config.json`.
    pub fn config_key(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Logs => "logs",
            Self::Approved => "output_approved",
            Self::Rejected => "output_rejected",
            Self::Ready => "ready",
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A historical event shown during a game round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "titre")]
    pub title: String,
    /// ISO-like date, `YYYY-MM-DD` (years may be negative).
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Importance score, 0..=100.
    #[serde(rename = "notoriete", default, skip_serializing_if = "Option::is_none")]
    pub notoriety: Option<f64>,
}

impl Event {
    pub fn notoriety_or_zero(&self) -> f64 {
        self.notoriety.unwrap_or(0.0)
    }
}

/// Extract the year component of an event date (`"1789-07-14"` → `"1789"`,
/// `"-44-03-15"` → `"-44"`).
pub fn year_of(date: &str) -> String {
    match date.strip_prefix('-') {
        Some(rest) => format!("-{}", rest.split('-').next().unwrap_or_default()),
        None => date.split('-').next().unwrap_or_default().to_string(),
    }
}

// ---------------------------------------------------------------------------
// Capture input
// ---------------------------------------------------------------------------

/// `<session>_metadata.json`: the game timeline recorded alongside a capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub events_timeline: Vec<TimelineEvent>,
}

/// One round of the recorded game session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub tour: u32,
    /// Seconds into the recording when the event card appeared.
    pub timecode_apparition: f64,
    /// Seconds into the recording when the player answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timecode_choix: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choix: Option<String>,
    pub event_titre: String,
    pub event_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_notoriete: Option<f64>,
}

impl TimelineEvent {
    pub fn event(&self) -> Event {
        Event {
            title: self.event_titre.clone(),
            date: self.event_date.clone(),
            description: self.event_description.clone(),
            notoriety: self.event_notoriete,
        }
    }
}

// ---------------------------------------------------------------------------
// Delivery manifest
// ---------------------------------------------------------------------------

/// `<session>_DELIVERY_MANIFEST.json`, written by the capture stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryManifest {
    pub session_id: String,
    pub clips: Vec<ManifestClip>,
}

/// A clip cut from a session recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestClip {
    pub filename: String,
    pub tour: u32,
    #[serde(rename = "evenement")]
    pub event: Event,
    /// The player's answer (`avant` / `après`), if one was recorded.
    #[serde(rename = "choix", default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    /// Clip duration in seconds.
    pub duration: f64,
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Whether a hook teases the event before the reveal or recaps it afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookFraming {
    PreEvent,
    PostEvent,
}

/// `selection_<session>.json`, written by the selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    pub session_id: String,
    pub selection_date: DateTime<Utc>,
    pub selection_method: String,
    pub total_clips_analyzed: usize,
    pub clips_selected: usize,
    pub clips: Vec<SelectedClip>,
}

/// A clip chosen for production, enriched with its hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedClip {
    pub original_filename: String,
    pub readable_filename: String,
    pub tour: u32,
    pub duration: f64,
    #[serde(rename = "evenement")]
    pub event: Event,
    #[serde(rename = "choix", default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub hook: String,
    pub framing: HookFraming,
    pub is_vip: bool,
}

// ---------------------------------------------------------------------------
// Tweets
// ---------------------------------------------------------------------------

/// A generated short text post, ready to publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tweet {
    pub content: String,
    /// Length in characters.
    pub length: usize,
    #[serde(rename = "type")]
    pub kind: String,
    pub event: Event,
}
