//! Shared fixtures for agent and pipeline tests.

use std::path::PathBuf;

use khive_shared::{AgentKind, DirRole};
use khive_storage::Layout;

use crate::agent::AgentContext;

/// A freshly initialised pipeline root, removed on drop.
pub struct TestRoot {
    root: PathBuf,
    pub layout: Layout,
}

impl TestRoot {
    pub fn new() -> Self {
        let root = std::env::temp_dir().join(format!("khive-core-test-{}", uuid::Uuid::now_v7()));
        let layout = Layout::new(&root);
        layout.write_default_configs(false).unwrap();
        Self { root, layout }
    }

    pub fn dir(&self, kind: AgentKind, role: DirRole) -> PathBuf {
        let (_, dirs) = self.layout.open(kind).unwrap();
        dirs.require(role).unwrap().to_path_buf()
    }

    pub fn context(&self, kind: AgentKind) -> AgentContext {
        AgentContext::open(&self.layout, kind).unwrap()
    }

    /// Rewrite one agent's config in place.
    pub fn edit_config(&self, kind: AgentKind, edit: impl FnOnce(&mut khive_shared::AgentConfig)) {
        let mut config = self.layout.load(kind).unwrap();
        edit(&mut config);
        khive_storage::write_json_atomic(&self.layout.config_path(kind), &config).unwrap();
    }

    pub fn names(&self, kind: AgentKind, role: DirRole) -> Vec<String> {
        khive_storage::list_files(&self.dir(kind, role), &khive_storage::FilePattern::any())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }
}

impl Drop for TestRoot {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}
