//! Agent runtime: config loading, directory bootstrap, journal, dispatch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument};
use uuid::Uuid;

use khive_media::{Ffmpeg, MediaTool};
use khive_shared::{AgentConfig, AgentKind, DirRole, KhiveError, Result};
use khive_storage::{AgentDirs, Claim, Journal, Layout, LogStatus, recover_stale_claims};

use crate::pipeline::StageRunner;
use crate::{capture, coordinator, executive, micro, quality, selector, vertical};

/// Claims older than this belong to a run that is no longer alive.
pub const STALE_CLAIM_AGE: Duration = Duration::from_secs(6 * 60 * 60);

/// Which production sub-pipelines the coordinator runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SocialMode {
    #[default]
    All,
    Tiktok,
    Twitter,
}

impl SocialMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Tiktok => "tiktok",
            Self::Twitter => "twitter",
        }
    }

    pub fn includes_tiktok(&self) -> bool {
        matches!(self, Self::All | Self::Tiktok)
    }

    pub fn includes_twitter(&self) -> bool {
        matches!(self, Self::All | Self::Twitter)
    }
}

impl std::fmt::Display for SocialMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SocialMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "tiktok" => Ok(Self::Tiktok),
            "twitter" => Ok(Self::Twitter),
            other => Err(format!("unknown social mode '{other}': expected all, tiktok or twitter")),
        }
    }
}

/// Per-invocation options passed down from the command line.
#[derive(Debug, Clone, Default)]
pub struct AgentOptions {
    /// RNG seed for microcontent template rotation.
    pub seed: Option<u64>,
    pub social_mode: SocialMode,
}

/// Summary of one agent run.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub kind: AgentKind,
    /// Items handled successfully (clips cut, videos rendered, posts written...).
    pub processed: usize,
    /// Items that failed or were rejected.
    pub failed: usize,
    /// `false` makes the agent exit non-zero.
    pub success: bool,
    pub summary: String,
}

impl AgentOutcome {
    pub fn ok(kind: AgentKind, processed: usize, failed: usize, summary: impl Into<String>) -> Self {
        Self {
            kind,
            processed,
            failed,
            success: true,
            summary: summary.into(),
        }
    }

    /// Nothing to do: no input was waiting.
    pub fn idle(kind: AgentKind, summary: impl Into<String>) -> Self {
        Self::ok(kind, 0, 0, summary)
    }
}

/// Everything an agent needs while running.
#[derive(Debug)]
pub struct AgentContext {
    pub kind: AgentKind,
    pub layout: Layout,
    pub config: AgentConfig,
    pub dirs: AgentDirs,
    pub journal: Journal,
    /// Unique per run; used to name claims.
    pub run_id: String,
}

impl AgentContext {
    /// Load and validate the config, then create the configured directories.
    /// A bad config fails before anything is created.
    pub fn open(layout: &Layout, kind: AgentKind) -> Result<Self> {
        let (config, dirs) = layout.open(kind)?;
        dirs.bootstrap()?;

        let role = if config.role.is_empty() {
            kind.default_role().to_string()
        } else {
            config.role.clone()
        };
        let journal = Journal::new(
            dirs.require(DirRole::Logs)?,
            kind.log_prefix(),
            config.agent_name.clone(),
            role,
        );

        let ctx = Self {
            kind,
            layout: layout.clone(),
            config,
            dirs,
            journal,
            run_id: Uuid::now_v7().simple().to_string(),
        };
        ctx.recover_claims()?;
        Ok(ctx)
    }

    /// Return files left claimed by runs that died more than
    /// [`STALE_CLAIM_AGE`] ago.
    fn recover_claims(&self) -> Result<()> {
        for (role, dir) in self.dirs.iter() {
            for path in recover_stale_claims(dir, STALE_CLAIM_AGE)? {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                self.journal.record(
                    "RECOVERY",
                    LogStatus::Warning,
                    format!("{} {name}", role.config_key()),
                    Some("claim abandoned by an earlier run".into()),
                )?;
            }
        }
        Ok(())
    }

    pub fn dir(&self, role: DirRole) -> Result<&Path> {
        self.dirs.require(role)
    }

    pub fn claim(&self, path: &Path) -> Result<Option<Claim>> {
        Claim::acquire(path, &self.run_id)
    }

    /// Resolve a config path (asset, banner...) against the agent directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.layout.agent_dir(self.kind).join(p)
        }
    }
}

/// Run one agent to completion.
///
/// The coordinator drives sub-pipelines through `runner`; every other agent
/// is synchronous and runs on a blocking task. `media` overrides the ffmpeg
/// tool built from the agent's own `tools` config.
#[instrument(skip_all, fields(agent = %kind))]
pub async fn run_agent(
    layout: &Layout,
    kind: AgentKind,
    options: &AgentOptions,
    media: Option<Arc<dyn MediaTool>>,
    runner: &dyn StageRunner,
) -> Result<AgentOutcome> {
    if kind == AgentKind::Coordinator {
        let ctx = AgentContext::open(layout, kind)?;
        return coordinator::run(&ctx, options, runner).await;
    }

    let layout = layout.clone();
    let options = options.clone();
    tokio::task::spawn_blocking(move || run_blocking(&layout, kind, &options, media))
        .await
        .map_err(|e| KhiveError::stage(kind.dir_name(), format!("agent task failed: {e}")))?
}

/// Synchronous agents. The coordinator is rejected here.
pub fn run_blocking(
    layout: &Layout,
    kind: AgentKind,
    options: &AgentOptions,
    media: Option<Arc<dyn MediaTool>>,
) -> Result<AgentOutcome> {
    let ctx = AgentContext::open(layout, kind)?;
    ctx.journal.note(
        "INITIALIZATION",
        LogStatus::Ok,
        format!("{} v{} ready", ctx.config.agent_name, ctx.config.version),
    )?;

    let media: Arc<dyn MediaTool> =
        media.unwrap_or_else(|| Arc::new(Ffmpeg::from_config(&ctx.config.tools)));

    let outcome = match kind {
        AgentKind::Capture => capture::run(&ctx, media.as_ref()),
        AgentKind::Selector => selector::run(&ctx),
        AgentKind::Vertical => vertical::run(&ctx, media.as_ref()),
        AgentKind::Quality => quality::run(&ctx, media.as_ref()),
        AgentKind::Micro => micro::run(&ctx, options.seed),
        AgentKind::Executive => executive::run(&ctx),
        AgentKind::Coordinator => Err(KhiveError::validation(
            "the coordinator runs sub-pipelines and must be started through run_agent",
        )),
    }?;

    info!(
        agent = %kind,
        processed = outcome.processed,
        failed = outcome.failed,
        "{}",
        outcome.summary
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn social_mode_parses() {
        assert_eq!("tiktok".parse::<SocialMode>(), Ok(SocialMode::Tiktok));
        assert_eq!("ALL".parse::<SocialMode>(), Ok(SocialMode::All));
        assert!("radio".parse::<SocialMode>().is_err());
        assert!(SocialMode::All.includes_tiktok() && SocialMode::All.includes_twitter());
        assert!(!SocialMode::Twitter.includes_tiktok());
    }

    #[test]
    fn context_requires_valid_config_before_bootstrap() {
        let root = std::env::temp_dir().join(format!("khive-agent-test-{}", Uuid::now_v7()));
        let layout = Layout::new(&root);

        assert!(AgentContext::open(&layout, AgentKind::Selector).is_err());
        assert!(!root.exists());

        layout.write_default_configs(false).unwrap();
        let ctx = AgentContext::open(&layout, AgentKind::Selector).unwrap();
        assert!(ctx.dir(DirRole::Input).unwrap().is_dir());
        assert_eq!(
            ctx.resolve_path("assets/banner.png"),
            root.join("K_HIVE/AGENTS/MARC/assets/banner.png")
        );

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn opening_returns_abandoned_claims() {
        let root = crate::testutil::TestRoot::new();
        let input = root.dir(AgentKind::Quality, DirRole::Input);
        let dead = Uuid::new_v7(uuid::Timestamp::from_unix(uuid::NoContext, 1_600_000_000, 0));
        std::fs::write(input.join(format!(".claim-{}-clip.mp4", dead.simple())), "v").unwrap();
        std::fs::write(input.join("live.mp4"), "l").unwrap();
        let live = Claim::acquire(&input.join("live.mp4"), &Uuid::now_v7().simple().to_string())
            .unwrap()
            .unwrap();

        let ctx = root.context(AgentKind::Quality);

        assert_eq!(root.names(AgentKind::Quality, DirRole::Input), vec!["clip.mp4"]);
        assert!(live.path().exists());
        let warning = ctx
            .journal
            .entries()
            .unwrap()
            .into_iter()
            .find(|e| e.action == "RECOVERY")
            .unwrap();
        assert_eq!(warning.status, LogStatus::Warning);
        assert!(warning.detail.ends_with("clip.mp4"));
        live.release().unwrap();
    }
}
