//! Shared types, error model, and agent configuration for the K-Hive pipeline.
//!
//! This crate is the foundation depended on by all other K-Hive crates.
//! It provides:
//! - [`KhiveError`], the unified error type
//! - Domain types ([`AgentKind`], [`DeliveryManifest`], [`Selection`], [`Tweet`], ...)
//! - Per-agent configuration ([`AgentConfig`], config loading and validation)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AgentConfig, CONFIG_FILE_NAME, ClippingConfig, CtaConfig, HookConfig, KpiConfig,
    ProductionConfig, SelectionConfig, StorageConfig, ToolsConfig, TweetConfig, TweetTemplate,
    ValidationConfig, VideoConfig, load_agent_config,
};
pub use error::{KhiveError, Result};
pub use types::{
    AgentKind, DeliveryManifest, DirRole, Event, HookFraming, ManifestClip, SelectedClip,
    Selection, SessionMetadata, TimelineEvent, Tweet, Unit, year_of,
};
