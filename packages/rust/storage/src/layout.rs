//! Pipeline root layout.
//!
//! ```text
//! <root>/
//! ├── REPORTERS_UNIT/AGENTS/DERUSH/{config.json, STORAGE/...}
//! ├── K_HIVE/AGENTS/{MARC,CHLOE,LEA,JEAN,HUGO,LOUIS}/{config.json, STORAGE/...}
//! └── PRET_A_PUBLIER/{TIKTOK,TWITTER}
//! ```
//!
//! Storage paths in each config are relative to the agent directory and are
//! normalised lexically, so `../../../PRET_A_PUBLIER/TIKTOK` lands under the root.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};

use khive_shared::{
    AgentConfig, AgentKind, CONFIG_FILE_NAME, DirRole, KhiveError, Result, load_agent_config,
};

use crate::stage::{bootstrap, write_json_atomic};

/// Handle on a pipeline root directory.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

/// Resolved absolute directories for one agent.
#[derive(Debug, Clone)]
pub struct AgentDirs {
    kind: AgentKind,
    dirs: BTreeMap<DirRole, PathBuf>,
}

/// Result of `khive init`.
#[derive(Debug, Default)]
pub struct InitReport {
    pub written: Vec<PathBuf>,
    pub kept: Vec<PathBuf>,
}

/// Directories touched by clean mode.
#[derive(Debug, Default)]
pub struct CleanPlan {
    /// Emptied completely.
    pub empty: Vec<PathBuf>,
    /// Kept, but stripped of leftover claim and temp files.
    pub sweep: Vec<PathBuf>,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn agent_dir(&self, kind: AgentKind) -> PathBuf {
        self.root
            .join(kind.unit().dir_name())
            .join("AGENTS")
            .join(kind.dir_name())
    }

    pub fn config_path(&self, kind: AgentKind) -> PathBuf {
        self.agent_dir(kind).join(CONFIG_FILE_NAME)
    }

    /// Load and validate an agent's config.
    pub fn load(&self, kind: AgentKind) -> Result<AgentConfig> {
        load_agent_config(&self.config_path(kind), kind)
    }

    /// Like [`Layout::load`], but `None` when the config file does not exist.
    pub fn load_if_present(&self, kind: AgentKind) -> Result<Option<AgentConfig>> {
        let path = self.config_path(kind);
        if !path.exists() {
            return Ok(None);
        }
        load_agent_config(&path, kind).map(Some)
    }

    /// Absolute directories for every storage key in `config`.
    pub fn resolve(&self, kind: AgentKind, config: &AgentConfig) -> AgentDirs {
        let base = self.agent_dir(kind);
        let dirs = DirRole::ALL
            .into_iter()
            .filter_map(|role| {
                config
                    .storage
                    .get(role)
                    .filter(|p| !p.trim().is_empty())
                    .map(|p| (role, normalize(&base.join(p))))
            })
            .collect();
        AgentDirs { kind, dirs }
    }

    /// Load, validate and resolve in one step. Nothing is created on disk.
    pub fn open(&self, kind: AgentKind) -> Result<(AgentConfig, AgentDirs)> {
        let config = self.load(kind)?;
        let dirs = self.resolve(kind, &config);
        Ok((config, dirs))
    }

    /// Write the default config of every agent (keeping existing files
    /// unless `force`), then bootstrap every configured directory.
    pub fn write_default_configs(&self, force: bool) -> Result<InitReport> {
        let mut report = InitReport::default();

        for kind in AgentKind::ALL {
            let path = self.config_path(kind);
            if path.exists() && !force {
                debug!(?path, "keeping existing config");
                report.kept.push(path);
                continue;
            }

            let dir = self.agent_dir(kind);
            std::fs::create_dir_all(&dir).map_err(|e| KhiveError::io(&dir, e))?;
            write_json_atomic(&path, &AgentConfig::default_for(kind))?;
            info!(?path, agent = %kind, "wrote default config");
            report.written.push(path);
        }

        for kind in AgentKind::ALL {
            let (_, dirs) = self.open(kind)?;
            dirs.bootstrap()?;
        }

        Ok(report)
    }

    /// Directories clean mode empties or sweeps. Agents without a config
    /// file fall back to their default layout.
    pub fn clean_plan(&self) -> Result<CleanPlan> {
        let mut plan = CleanPlan::default();

        for kind in AgentKind::ALL {
            let config = match self.load_if_present(kind)? {
                Some(config) => config,
                None => AgentConfig::default_for(kind),
            };
            let dirs = self.resolve(kind, &config);

            let emptied: &[DirRole] = match kind {
                AgentKind::Quality => &[DirRole::Input, DirRole::Rejected],
                _ => &[DirRole::Input, DirRole::Output],
            };

            for (role, path) in dirs.iter() {
                if emptied.contains(&role) {
                    plan.empty.push(path.to_path_buf());
                } else {
                    plan.sweep.push(path.to_path_buf());
                }
            }
        }

        plan.empty.sort();
        plan.empty.dedup();
        plan.sweep.sort();
        plan.sweep.dedup();
        plan.sweep.retain(|p| !plan.empty.contains(p));

        Ok(plan)
    }
}

impl AgentDirs {
    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    pub fn get(&self, role: DirRole) -> Option<&Path> {
        self.dirs.get(&role).map(PathBuf::as_path)
    }

    /// The directory for `role`, or a config error naming the missing key.
    pub fn require(&self, role: DirRole) -> Result<&Path> {
        self.get(role).ok_or_else(|| {
            KhiveError::config(format!(
                "{}: storage.{} is not configured",
                self.kind,
                role.config_key()
            ))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (DirRole, &Path)> {
        self.dirs.iter().map(|(role, path)| (*role, path.as_path()))
    }

    /// Create every configured directory.
    pub fn bootstrap(&self) -> Result<()> {
        let dirs: Vec<&Path> = self.dirs.values().map(PathBuf::as_path).collect();
        bootstrap(&dirs)
    }
}

/// Fold `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("khive-layout-test-{}", uuid::Uuid::now_v7()))
    }

    #[test]
    fn agent_dirs_follow_units() {
        let layout = Layout::new("/srv/khive");
        assert_eq!(
            layout.agent_dir(AgentKind::Capture),
            PathBuf::from("/srv/khive/REPORTERS_UNIT/AGENTS/DERUSH")
        );
        assert_eq!(
            layout.config_path(AgentKind::Quality),
            PathBuf::from("/srv/khive/K_HIVE/AGENTS/LEA/config.json")
        );
    }

    #[test]
    fn relative_storage_paths_are_normalised() {
        let layout = Layout::new("/srv/khive");
        let config = AgentConfig::default_for(AgentKind::Quality);
        let dirs = layout.resolve(AgentKind::Quality, &config);
        assert_eq!(
            dirs.get(DirRole::Approved).unwrap(),
            Path::new("/srv/khive/PRET_A_PUBLIER/TIKTOK")
        );
        assert_eq!(
            dirs.get(DirRole::Input).unwrap(),
            Path::new("/srv/khive/K_HIVE/AGENTS/LEA/STORAGE/INPUT")
        );
        assert!(dirs.get(DirRole::Output).is_none());
        assert!(dirs.require(DirRole::Output).is_err());
    }

    #[test]
    fn invalid_config_fails_before_any_directory_exists() {
        let root = temp_root();
        let layout = Layout::new(&root);
        let agent_dir = layout.agent_dir(AgentKind::Vertical);
        std::fs::create_dir_all(&agent_dir).unwrap();
        std::fs::write(
            layout.config_path(AgentKind::Vertical),
            r#"{"agent_name": "CHLOE", "storage": {"input": "STORAGE/INPUT"}}"#,
        )
        .unwrap();

        assert!(layout.open(AgentKind::Vertical).is_err());
        assert!(!agent_dir.join("STORAGE").exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn init_writes_configs_and_is_idempotent() {
        let root = temp_root();
        let layout = Layout::new(&root);

        let first = layout.write_default_configs(false).unwrap();
        assert_eq!(first.written.len(), AgentKind::ALL.len());
        assert!(root.join("PRET_A_PUBLIER/TIKTOK").is_dir());
        assert!(root.join("PRET_A_PUBLIER/TWITTER").is_dir());
        assert!(root.join("K_HIVE/AGENTS/LEA/STORAGE/REJECTED").is_dir());
        assert!(root.join("REPORTERS_UNIT/AGENTS/DERUSH/STORAGE/INPUT").is_dir());

        let second = layout.write_default_configs(false).unwrap();
        assert!(second.written.is_empty());
        assert_eq!(second.kept.len(), AgentKind::ALL.len());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn clean_plan_keeps_logs_and_publication_queue() {
        let layout = Layout::new("/srv/khive");
        let plan = layout.clean_plan().unwrap();

        let lea = Path::new("/srv/khive/K_HIVE/AGENTS/LEA/STORAGE");
        assert!(plan.empty.contains(&lea.join("INPUT")));
        assert!(plan.empty.contains(&lea.join("REJECTED")));
        assert!(plan.sweep.contains(&PathBuf::from("/srv/khive/PRET_A_PUBLIER/TIKTOK")));
        assert!(plan.sweep.contains(&PathBuf::from("/srv/khive/PRET_A_PUBLIER/TWITTER")));
        assert!(plan.empty.iter().all(|p| !p.ends_with("LOGS")));
        assert!(
            plan.empty
                .iter()
                .all(|p| !p.starts_with("/srv/khive/PRET_A_PUBLIER"))
        );
        assert!(plan.empty.contains(&PathBuf::from(
            "/srv/khive/K_HIVE/AGENTS/LOUIS/STORAGE/OUTPUT"
        )));
    }

    #[test]
    fn normalize_folds_parent_components() {
        assert_eq!(
            normalize(Path::new("/a/b/c/../../d/./e")),
            PathBuf::from("/a/d/e")
        );
    }
}
