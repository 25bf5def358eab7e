//! Filesystem storage for the K-Hive pipeline.
//!
//! Stage directories are the only shared state between agents. This crate
//! owns every operation that touches them:
//! - [`layout`]: where each agent's directories live, `init`, and clean targets
//! - [`stage`]: listing, claiming, atomic publish, transfers and cleanup
//! - [`journal`]: the per-agent JSON activity log

pub mod journal;
pub mod layout;
pub mod stage;

pub use journal::{Journal, LogEntry, LogStatus, read_entries};
pub use layout::{AgentDirs, CleanPlan, InitReport, Layout};
pub use stage::{
    Claim, FilePattern, bootstrap, clean_dir, copy_files, latest, list_files, move_file,
    move_files, read_json, recover_stale_claims, sweep_hidden, unique_name, write_atomic,
    write_json_atomic,
};
