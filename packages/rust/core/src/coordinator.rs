//! Social-media coordinator: runs the TikTok and/or Twitter sub-pipelines
//! and writes a `social_report_<millis>.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use khive_shared::{AgentKind, DirRole, Result};
use khive_storage::{LogStatus, write_json_atomic};

use crate::agent::{AgentContext, AgentOptions, AgentOutcome, SocialMode};
use crate::executive::{Directive, latest_report};
use crate::orchestrator::{tiktok_stages, twitter_stages};
use crate::pipeline::{PipelineRun, SilentObserver, Stage, StageRunner, StageState, execute_plan};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRun {
    pub agent: String,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub pipeline: String,
    pub success: bool,
    pub agents: Vec<AgentRun>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialReport {
    pub generated_at: DateTime<Utc>,
    pub mode: String,
    pub directives: Vec<Directive>,
    pub pipelines: Vec<PipelineReport>,
    pub success: bool,
}

fn pipeline_report(name: &str, run: &PipelineRun) -> PipelineReport {
    PipelineReport {
        pipeline: name.into(),
        success: run.success(),
        agents: run
            .records
            .iter()
            .map(|r| AgentRun {
                agent: r.agent.dir_name().into(),
                success: r.state == StageState::Done,
                duration_ms: r.duration.as_millis() as u64,
                error: r.error.clone(),
            })
            .collect(),
    }
}

/// Directives addressed to this agent in the latest executive report.
/// `None` means no report: autonomous mode.
fn read_directives(ctx: &AgentContext) -> Option<Vec<Directive>> {
    let config = ctx.layout.load_if_present(AgentKind::Executive).ok()??;
    let dirs = ctx.layout.resolve(AgentKind::Executive, &config);
    let report = latest_report(dirs.get(DirRole::Output)?)?;
    Some(
        report
            .directives_for(ctx.kind.dir_name())
            .cloned()
            .collect(),
    )
}

#[instrument(skip_all, fields(agent = "coordinator", mode = %options.social_mode))]
pub async fn run(
    ctx: &AgentContext,
    options: &AgentOptions,
    runner: &dyn StageRunner,
) -> Result<AgentOutcome> {
    let output = ctx.dir(DirRole::Output)?;
    ctx.journal.note(
        "INITIALIZATION",
        LogStatus::Ok,
        format!("{} v{} ready", ctx.config.agent_name, ctx.config.version),
    )?;

    let directives = match read_directives(ctx) {
        Some(directives) => {
            for d in &directives {
                ctx.journal.record(
                    "DIRECTIVE",
                    LogStatus::Ok,
                    d.directive.clone(),
                    Some(d.reason.clone()),
                )?;
            }
            ctx.journal.note(
                "DIRECTIVES",
                LogStatus::Ok,
                format!("{} directive(s) from the executive", directives.len()),
            )?;
            directives
        }
        None => {
            ctx.journal
                .note("DIRECTIVES", LogStatus::Skip, "no executive report, autonomous mode")?;
            Vec::new()
        }
    };

    let tiktok = options.social_mode.includes_tiktok();
    let twitter = options.social_mode.includes_twitter();
    let mut pipelines: Vec<(&str, Vec<Stage>)> = Vec::new();
    if tiktok {
        pipelines.push(("tiktok", tiktok_stages(Stage::new(AgentKind::Selector), twitter)));
    }
    if twitter {
        pipelines.push(("twitter", twitter_stages(tiktok)));
    }

    let mut reports = Vec::new();
    for (name, stages) in pipelines {
        ctx.journal
            .note("DELEGATION", LogStatus::Delegated, format!("{name} pipeline"))?;
        let run = execute_plan(&ctx.layout, &stages, runner, &SilentObserver).await?;
        let report = pipeline_report(name, &run);
        let status = if report.success {
            LogStatus::Success
        } else {
            LogStatus::Failed
        };
        ctx.journal.note(
            "PIPELINE",
            status,
            format!("{name}: {} agents run", report.agents.len()),
        )?;
        reports.push(report);
    }

    let success = reports.iter().all(|p| p.success);
    let now = Utc::now();
    let report = SocialReport {
        generated_at: now,
        mode: options.social_mode.as_str().into(),
        directives,
        pipelines: reports,
        success,
    };
    write_json_atomic(
        &output.join(format!("social_report_{}.json", now.timestamp_millis())),
        &report,
    )?;

    let failed = report.pipelines.iter().filter(|p| !p.success).count();
    info!(pipelines = report.pipelines.len(), failed, "social run finished");
    ctx.journal.note(
        "FINALIZATION",
        if success {
            LogStatus::Success
        } else {
            LogStatus::Failed
        },
        format!("{} pipeline(s) run", report.pipelines.len()),
    )?;

    Ok(AgentOutcome {
        success,
        ..AgentOutcome::ok(
            ctx.kind,
            report.pipelines.len() - failed,
            failed,
            format!("{} pipeline(s) run, {failed} failed", report.pipelines.len()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestRoot;
    use khive_shared::KhiveError;
    use khive_storage::{FilePattern, Layout, latest, read_json};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeRunner {
        fail: Option<AgentKind>,
        calls: Mutex<Vec<AgentKind>>,
    }

    #[async_trait::async_trait]
    impl StageRunner for FakeRunner {
        async fn run_stage(&self, _layout: &Layout, agent: AgentKind) -> Result<()> {
            self.calls.lock().unwrap().push(agent);
            if self.fail == Some(agent) {
                return Err(KhiveError::stage(agent.dir_name(), "scripted failure"));
            }
            Ok(())
        }
    }

    fn social_report(root: &TestRoot) -> SocialReport {
        let dir = root.dir(AgentKind::Coordinator, DirRole::Output);
        let path = latest(&dir, &FilePattern::new("social_report_*.json"))
            .unwrap()
            .unwrap();
        read_json(&path).unwrap()
    }

    #[tokio::test]
    async fn runs_both_pipelines_autonomously() {
        let root = TestRoot::new();
        let runner = FakeRunner::default();
        let ctx = root.context(AgentKind::Coordinator);

        let outcome = run(&ctx, &AgentOptions::default(), &runner).await.unwrap();
        assert!(outcome.success);
        assert_eq!(
            *runner.calls.lock().unwrap(),
            vec![
                AgentKind::Selector,
                AgentKind::Vertical,
                AgentKind::Quality,
                AgentKind::Micro
            ]
        );

        let report = social_report(&root);
        assert!(report.success);
        assert_eq!(report.pipelines.len(), 2);
        assert!(report.directives.is_empty());
    }

    #[tokio::test]
    async fn both_pipelines_share_one_selection() {
        let root = TestRoot::new();
        let marc_out = root.dir(AgentKind::Selector, DirRole::Output);
        std::fs::write(marc_out.join("selection_s1.json"), "{}").unwrap();
        let ctx = root.context(AgentKind::Coordinator);

        run(&ctx, &AgentOptions::default(), &FakeRunner::default())
            .await
            .unwrap();

        assert_eq!(root.names(AgentKind::Vertical, DirRole::Input), vec!["selection_s1.json"]);
        assert_eq!(root.names(AgentKind::Micro, DirRole::Input), vec!["selection_s1.json"]);
        assert!(root.names(AgentKind::Selector, DirRole::Output).is_empty());
    }

    #[tokio::test]
    async fn failing_sub_pipeline_fails_the_coordinator() {
        let root = TestRoot::new();
        let runner = FakeRunner {
            fail: Some(AgentKind::Vertical),
            ..FakeRunner::default()
        };
        let ctx = root.context(AgentKind::Coordinator);
        let options = AgentOptions {
            social_mode: SocialMode::Tiktok,
            ..AgentOptions::default()
        };

        let outcome = run(&ctx, &options, &runner).await.unwrap();
        assert!(!outcome.success);

        let report = social_report(&root);
        let tiktok = &report.pipelines[0];
        assert!(!tiktok.success);
        assert_eq!(tiktok.agents[1].error.as_deref(), Some("stage CHLOE failed: scripted failure"));
        assert!(!tiktok.agents[2].success);
    }

    #[tokio::test]
    async fn picks_up_directives_addressed_to_it() {
        let root = TestRoot::new();
        crate::executive::run(&root.context(AgentKind::Executive)).unwrap();

        let ctx = root.context(AgentKind::Coordinator);
        let options = AgentOptions {
            social_mode: SocialMode::Twitter,
            ..AgentOptions::default()
        };
        run(&ctx, &options, &FakeRunner::default()).await.unwrap();

        let report = social_report(&root);
        assert_eq!(report.directives.len(), 1);
        assert_eq!(report.directives[0].directive, "INCREASE_PRODUCTION");
    }
}
