//! Run modes: which agents run, in which order, fed from where.

use tracing::{info, instrument};

use khive_shared::{AgentKind, DirRole, Result};
use khive_storage::{Layout, clean_dir, sweep_hidden};

use crate::pipeline::{
    PipelineObserver, PipelineRun, Stage, StageRunner, TransferMode, execute_plan,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Full,
    Tiktok,
    Twitter,
    Report,
    Clean,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Tiktok => "tiktok",
            Self::Twitter => "twitter",
            Self::Report => "report",
            Self::Clean => "clean",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selector, vertical, quality. The selector's inbound transfers are the
/// caller's business. With `share_selection` the selection stays in the
/// selector's output for a microcontent stage that runs later.
pub fn tiktok_stages(selector: Stage, share_selection: bool) -> Vec<Stage> {
    let selection = if share_selection {
        TransferMode::Copy
    } else {
        TransferMode::Move
    };
    vec![
        selector,
        Stage::new(AgentKind::Vertical)
            .transfer(AgentKind::Selector, DirRole::Output, "selection_", selection)
            .take(AgentKind::Selector, DirRole::Input, "*.mp4"),
        Stage::new(AgentKind::Quality).take(AgentKind::Vertical, DirRole::Output, "*.mp4"),
    ]
}

/// Microcontent. With `after_selector` it takes the selection the tiktok
/// stages left behind.
pub fn twitter_stages(after_selector: bool) -> Vec<Stage> {
    let micro = Stage::new(AgentKind::Micro);
    if after_selector {
        vec![micro.take(AgentKind::Selector, DirRole::Output, "selection_")]
    } else {
        vec![micro]
    }
}

/// The stages of `mode`, in run order. Clean has none.
///
/// Every upstream file is moved by the last stage that reads it, so
/// rerunning a mode never processes the same session twice.
pub fn plan(mode: Mode) -> Vec<Stage> {
    match mode {
        Mode::Full => {
            let mut stages = vec![Stage::new(AgentKind::Capture)];
            stages.extend(tiktok_stages(
                Stage::new(AgentKind::Selector)
                    .pull(AgentKind::Capture, DirRole::Output, "MANIFEST")
                    .take(AgentKind::Capture, DirRole::Output, "*.mp4"),
                true,
            ));
            stages.push(
                Stage::new(AgentKind::Micro)
                    .take(AgentKind::Selector, DirRole::Output, "selection_")
                    .take(AgentKind::Capture, DirRole::Output, "MANIFEST"),
            );
            stages.push(Stage::new(AgentKind::Executive));
            stages
        }
        Mode::Tiktok => tiktok_stages(Stage::new(AgentKind::Selector), false),
        Mode::Twitter => twitter_stages(false),
        Mode::Report => vec![Stage::new(AgentKind::Executive)],
        Mode::Clean => Vec::new(),
    }
}

/// Counts from a clean run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanSummary {
    pub directories: usize,
    pub removed: usize,
}

/// Empty the working directories and sweep leftover claim/temp files from
/// the rest. Logs and the publication tree keep their content.
#[instrument(skip_all, fields(root = %layout.root().display()))]
pub fn clean_all(layout: &Layout) -> Result<CleanSummary> {
    let plan = layout.clean_plan()?;
    let mut summary = CleanSummary::default();

    for dir in &plan.empty {
        summary.removed += clean_dir(dir)?;
        summary.directories += 1;
    }
    for dir in &plan.sweep {
        summary.removed += sweep_hidden(dir)?;
    }

    info!(
        directories = summary.directories,
        removed = summary.removed,
        "clean complete"
    );
    Ok(summary)
}

/// Execute `mode`. Clean returns an empty, successful run.
pub async fn run(
    layout: &Layout,
    mode: Mode,
    runner: &dyn StageRunner,
    observer: &dyn PipelineObserver,
) -> Result<PipelineRun> {
    info!(mode = %mode, root = %layout.root().display(), "starting pipeline");
    if mode == Mode::Clean {
        let layout = layout.clone();
        let started = std::time::Instant::now();
        tokio::task::spawn_blocking(move || clean_all(&layout))
            .await
            .map_err(|e| khive_shared::KhiveError::stage("clean", format!("clean task failed: {e}")))??;
        return Ok(PipelineRun {
            records: Vec::new(),
            elapsed: started.elapsed(),
        });
    }
    execute_plan(layout, &plan(mode), runner, observer).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentOptions;
    use crate::executive::latest_report;
    use crate::pipeline::{InProcessRunner, SilentObserver, StageState};
    use crate::testutil::TestRoot;
    use khive_media::testing::ScriptedMedia;
    use khive_shared::{SessionMetadata, TimelineEvent};
    use khive_storage::{LogStatus, read_entries, write_json_atomic};
    use std::sync::Arc;

    fn agents(mode: Mode) -> Vec<AgentKind> {
        plan(mode).iter().map(|s| s.agent).collect()
    }

    #[test]
    fn plans_follow_modes() {
        assert_eq!(
            agents(Mode::Full),
            vec![
                AgentKind::Capture,
                AgentKind::Selector,
                AgentKind::Vertical,
                AgentKind::Quality,
                AgentKind::Micro,
                AgentKind::Executive
            ]
        );
        assert_eq!(
            agents(Mode::Tiktok),
            vec![AgentKind::Selector, AgentKind::Vertical, AgentKind::Quality]
        );
        assert_eq!(agents(Mode::Twitter), vec![AgentKind::Micro]);
        assert_eq!(agents(Mode::Report), vec![AgentKind::Executive]);
        assert!(plan(Mode::Clean).is_empty());

        let full = plan(Mode::Full);
        assert!(full[5].needs.is_empty());
        assert!(full[4].needs.contains(&AgentKind::Capture));
        assert!(plan(Mode::Tiktok)[0].inbound.is_empty());
        assert!(plan(Mode::Twitter)[0].inbound.is_empty());
    }

    #[test]
    fn only_the_last_reader_moves_a_file() {
        let modes = |stage: &Stage| stage.inbound.iter().map(|t| t.mode).collect::<Vec<_>>();

        let full = plan(Mode::Full);
        // the selection feeds both production and microcontent
        assert_eq!(modes(&full[2]), vec![TransferMode::Copy, TransferMode::Move]);
        assert_eq!(modes(&full[4]), vec![TransferMode::Move, TransferMode::Move]);
        assert_eq!(modes(&full[1]), vec![TransferMode::Copy, TransferMode::Move]);

        let tiktok = plan(Mode::Tiktok);
        assert_eq!(modes(&tiktok[1]), vec![TransferMode::Move, TransferMode::Move]);
        assert_eq!(modes(&tiktok[2]), vec![TransferMode::Move]);
    }

    #[test]
    fn clean_is_idempotent_and_keeps_directories() {
        let root = TestRoot::new();
        let input = root.dir(AgentKind::Selector, DirRole::Input);
        let approved = root.dir(AgentKind::Quality, DirRole::Approved);
        let logs = root.dir(AgentKind::Quality, DirRole::Logs);
        std::fs::write(input.join("old.json"), "{}").unwrap();
        std::fs::create_dir_all(input.join("nested")).unwrap();
        std::fs::write(approved.join("ready.mp4"), "x").unwrap();
        std::fs::write(approved.join(".claim-r1-other.mp4"), "x").unwrap();
        std::fs::write(logs.join("lea_1_0001.json"), "{}").unwrap();

        let first = clean_all(&root.layout).unwrap();
        assert!(first.removed >= 3);
        let second = clean_all(&root.layout).unwrap();
        assert_eq!(second.removed, 0);
        assert_eq!(first.directories, second.directories);

        assert!(input.is_dir());
        assert!(std::fs::read_dir(&input).unwrap().next().is_none());
        assert!(approved.join("ready.mp4").exists());
        assert!(!approved.join(".claim-r1-other.mp4").exists());
        assert!(logs.join("lea_1_0001.json").exists());
    }

    /// Metadata plus raw video for one session with a single event.
    fn stage_capture(root: &TestRoot, notoriety: f64) {
        let input = root.dir(AgentKind::Capture, DirRole::Input);
        let metadata = SessionMetadata {
            events_timeline: vec![TimelineEvent {
                tour: 1,
                timecode_apparition: 10.0,
                timecode_choix: Some(12.0),
                choix: Some("avant".into()),
                event_titre: "Prise de la Bastille".into(),
                event_date: "1789-07-14".into(),
                event_description: None,
                event_notoriete: Some(notoriety),
            }],
        };
        write_json_atomic(&input.join("s1_metadata.json"), &metadata).unwrap();
        ScriptedMedia::write_video(&input.join("raw_s1.mp4"), 600.0).unwrap();
    }

    fn runner(media: Arc<ScriptedMedia>) -> InProcessRunner {
        InProcessRunner::new(AgentOptions {
            seed: Some(42),
            ..AgentOptions::default()
        })
        .with_media(media)
    }

    #[tokio::test]
    async fn full_run_approves_a_well_sized_clip() {
        let root = TestRoot::new();
        stage_capture(&root, 95.0);
        let media = Arc::new(ScriptedMedia::new());

        let run = run(&root.layout, Mode::Full, &runner(media.clone()), &SilentObserver)
            .await
            .unwrap();
        assert!(run.success(), "{:?}", run.records);

        assert_eq!(media.renders()[0].duration, 25.0);
        assert_eq!(root.names(AgentKind::Quality, DirRole::Approved).len(), 1);
        assert!(root.names(AgentKind::Quality, DirRole::Rejected).is_empty());
        assert!(!root.names(AgentKind::Micro, DirRole::Ready).is_empty());

        let report = latest_report(&root.dir(AgentKind::Executive, DirRole::Output)).unwrap();
        assert_eq!(report.metrics.tiktok_produced, 1);
        assert_eq!(report.metrics.tiktok_approved, 1);
        assert_eq!(report.metrics.tiktok_rejected, 0);
    }

    #[tokio::test]
    async fn full_run_rejects_a_short_clip_with_a_duration_reason() {
        let root = TestRoot::new();
        root.edit_config(AgentKind::Capture, |c| {
            c.clipping.padding_before = 0.0;
            c.clipping.padding_vip = 0.0;
            c.clipping.target_duration = 5.0;
        });
        stage_capture(&root, 95.0);
        let media = Arc::new(ScriptedMedia::new());

        let run = run(&root.layout, Mode::Full, &runner(media.clone()), &SilentObserver)
            .await
            .unwrap();
        assert!(run.success(), "{:?}", run.records);

        assert_eq!(media.renders()[0].duration, 5.0);
        assert!(root.names(AgentKind::Quality, DirRole::Approved).is_empty());
        assert_eq!(root.names(AgentKind::Quality, DirRole::Rejected).len(), 1);

        let entries = read_entries(&root.dir(AgentKind::Quality, DirRole::Logs)).unwrap();
        let rejected = entries
            .iter()
            .find(|e| e.status == LogStatus::Rejected)
            .unwrap();
        assert!(rejected.reason.as_deref().unwrap().contains("duration"));
    }

    #[tokio::test]
    async fn reruns_process_each_session_once() {
        let root = TestRoot::new();
        stage_capture(&root, 95.0);
        let media = Arc::new(ScriptedMedia::new());
        let runner = runner(media.clone());

        for mode in [Mode::Full, Mode::Full, Mode::Tiktok, Mode::Twitter] {
            let run = run(&root.layout, mode, &runner, &SilentObserver).await.unwrap();
            assert!(run.success(), "{mode}: {:?}", run.records);
        }

        assert_eq!(media.renders().len(), 1);
        assert_eq!(root.names(AgentKind::Quality, DirRole::Approved).len(), 1);
        assert_eq!(root.names(AgentKind::Micro, DirRole::Ready).len(), 1);

        for (kind, role) in [
            (AgentKind::Capture, DirRole::Output),
            (AgentKind::Selector, DirRole::Input),
            (AgentKind::Selector, DirRole::Output),
            (AgentKind::Vertical, DirRole::Input),
            (AgentKind::Micro, DirRole::Input),
        ] {
            assert!(root.names(kind, role).is_empty(), "{kind} {role:?}: {:?}", root.names(kind, role));
        }

        let report = latest_report(&root.dir(AgentKind::Executive, DirRole::Output)).unwrap();
        assert_eq!(report.metrics.tiktok_produced, 1);
        assert_eq!(report.metrics.tiktok_approved, 1);
        assert_eq!(report.metrics.twitter_ready, 1);
    }

    #[tokio::test]
    async fn failed_capture_skips_everything_but_the_report() {
        let root = TestRoot::new();
        std::fs::write(
            root.layout.config_path(AgentKind::Capture),
            r#"{"agent_name": ""}"#,
        )
        .unwrap();

        let run = run(
            &root.layout,
            Mode::Full,
            &runner(Arc::new(ScriptedMedia::new())),
            &SilentObserver,
        )
        .await
        .unwrap();

        let states: Vec<StageState> = run.records.iter().map(|r| r.state).collect();
        assert_eq!(states[0], StageState::Failed);
        assert!(states[1..5].iter().all(|s| *s == StageState::Skipped));
        assert_eq!(states[5], StageState::Done);
        assert!(!run.success());
    }

    #[tokio::test]
    async fn clean_mode_runs_no_stages() {
        let root = TestRoot::new();
        let run = run(
            &root.layout,
            Mode::Clean,
            &runner(Arc::new(ScriptedMedia::new())),
            &SilentObserver,
        )
        .await
        .unwrap();
        assert!(run.records.is_empty());
        assert!(run.success());
    }
}
