//! Executive KPI aggregation.
//!
//! Reads every sibling agent's directories and journal (never writing to
//! them), scores the pipeline against the `kpis` targets and writes a
//! `ceo_report_<millis>.json` with alerts, recommendations and directives.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use khive_shared::{AgentKind, DirRole, KpiConfig, Result};
use khive_storage::{
    FilePattern, Layout, LogEntry, LogStatus, latest, list_files, read_entries, read_json,
    write_json_atomic,
};

use crate::agent::{AgentContext, AgentOutcome};

/// Traffic-light pipeline health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub tiktok_produced: usize,
    pub tiktok_approved: usize,
    pub tiktok_rejected: usize,
    pub twitter_ready: usize,
    pub render_failures: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_rate: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityStatus {
    Active,
    Idle,
    Absent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentActivity {
    pub agent: String,
    pub status: ActivityStatus,
    pub total_entries: usize,
    pub recent_entries: usize,
    pub failures: usize,
}

/// A coded finding (`PRODUCTION_LOW`, `DIVERSIFY`...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub code: String,
    pub message: String,
}

/// An instruction for another agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    pub target: String,
    pub directive: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CeoReport {
    pub generated_at: DateTime<Utc>,
    pub window_hours: i64,
    pub status: Health,
    pub metrics: Metrics,
    pub agents: Vec<AgentActivity>,
    pub alerts: Vec<Finding>,
    pub recommendations: Vec<Finding>,
    pub directives: Vec<Directive>,
}

impl CeoReport {
    pub fn directives_for(&self, target: &str) -> impl Iterator<Item = &Directive> {
        self.directives.iter().filter(move |d| d.target == target)
    }
}

/// Latest CEO report in `dir`, if one exists and parses.
pub fn latest_report(dir: &std::path::Path) -> Option<CeoReport> {
    let path = latest(dir, &FilePattern::new("ceo_report_*.json")).ok()??;
    match read_json(&path) {
        Ok(report) => Some(report),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable CEO report");
            None
        }
    }
}

/// Sibling journal and directories, as far as they can be read.
struct Sibling {
    kind: AgentKind,
    dirs: Option<khive_storage::AgentDirs>,
    entries: Vec<LogEntry>,
}

fn load_sibling(layout: &Layout, kind: AgentKind) -> Sibling {
    let dirs = match layout.load_if_present(kind) {
        Ok(Some(config)) => Some(layout.resolve(kind, &config)),
        Ok(None) => None,
        Err(e) => {
            warn!(agent = %kind, error = %e, "sibling config unreadable, reporting as absent");
            None
        }
    };
    let entries = dirs
        .as_ref()
        .and_then(|d| d.get(DirRole::Logs))
        .map(|logs| {
            read_entries(logs).unwrap_or_else(|e| {
                warn!(agent = %kind, error = %e, "sibling journal unreadable");
                Vec::new()
            })
        })
        .unwrap_or_default();
    Sibling {
        kind,
        dirs,
        entries,
    }
}

fn count(siblings: &[Sibling], kind: AgentKind, role: DirRole, pattern: &str) -> usize {
    siblings
        .iter()
        .find(|s| s.kind == kind)
        .and_then(|s| s.dirs.as_ref())
        .and_then(|d| d.get(role))
        .and_then(|dir| list_files(dir, &FilePattern::new(pattern)).ok())
        .map_or(0, |files| files.len())
}

fn activity(sibling: &Sibling, since: DateTime<Utc>) -> AgentActivity {
    let recent = sibling
        .entries
        .iter()
        .filter(|e| e.timestamp >= since)
        .count();
    let status = match (&sibling.dirs, recent) {
        (None, _) => ActivityStatus::Absent,
        (Some(_), 0) => ActivityStatus::Idle,
        (Some(_), _) => ActivityStatus::Active,
    };
    AgentActivity {
        agent: sibling.kind.dir_name().into(),
        status,
        total_entries: sibling.entries.len(),
        recent_entries: recent,
        failures: sibling
            .entries
            .iter()
            .filter(|e| e.status == LogStatus::Failed)
            .count(),
    }
}

/// Score metrics against targets.
pub fn analyze(
    metrics: &Metrics,
    agents: &[AgentActivity],
    kpis: &KpiConfig,
) -> (Health, Vec<Finding>, Vec<Finding>, Vec<Directive>) {
    let mut health = Health::Green;
    let mut alerts = Vec::new();
    let mut recommendations = Vec::new();
    let mut directives = Vec::new();

    let production = metrics.tiktok_approved;
    if production < kpis.target_videos_per_day as usize {
        let nothing_ready = metrics.tiktok_approved + metrics.twitter_ready == 0;
        health = health.max(if nothing_ready {
            Health::Red
        } else {
            Health::Yellow
        });
        alerts.push(Finding {
            code: "PRODUCTION_LOW".into(),
            message: format!(
                "{production} videos ready, target {}",
                kpis.target_videos_per_day
            ),
        });
    }

    if let Some(rate) = metrics
        .approval_rate
        .filter(|rate| *rate < kpis.target_approval_rate)
    {
        health = health.max(Health::Yellow);
        alerts.push(Finding {
            code: "QUALITY_LOW".into(),
            message: format!(
                "approval rate {:.0}% below target {:.0}%",
                rate * 100.0,
                kpis.target_approval_rate * 100.0
            ),
        });
        directives.push(Directive {
            target: AgentKind::Vertical.dir_name().into(),
            directive: "REVIEW_QUALITY".into(),
            reason: "too many renders rejected by quality control".into(),
        });
    }

    if metrics.render_failures > 0 {
        health = health.max(Health::Yellow);
        alerts.push(Finding {
            code: "RENDER_FAILURES".into(),
            message: format!("{} renders failed", metrics.render_failures),
        });
    }

    if metrics.twitter_ready == 0 && metrics.tiktok_approved > 0 {
        recommendations.push(Finding {
            code: "DIVERSIFY".into(),
            message: "video output but no text posts ready".into(),
        });
        directives.push(Directive {
            target: AgentKind::Micro.dir_name().into(),
            directive: "ACTIVATE_TWITTER".into(),
            reason: "diversify beyond video".into(),
        });
    }

    let idle: Vec<&str> = agents
        .iter()
        .filter(|a| a.status == ActivityStatus::Idle)
        .map(|a| a.agent.as_str())
        .collect();
    if !idle.is_empty() {
        recommendations.push(Finding {
            code: "AGENT_IDLE".into(),
            message: format!("idle agents: {}", idle.join(", ")),
        });
    }

    if health == Health::Red {
        directives.insert(
            0,
            Directive {
                target: AgentKind::Coordinator.dir_name().into(),
                directive: "INCREASE_PRODUCTION".into(),
                reason: "nothing ready to publish".into(),
            },
        );
    }

    (health, alerts, recommendations, directives)
}

#[instrument(skip_all, fields(agent = "executive"))]
pub fn run(ctx: &AgentContext) -> Result<AgentOutcome> {
    let output = ctx.dir(DirRole::Output)?;
    let kpis = &ctx.config.kpis;
    let now = Utc::now();
    let since = now - Duration::hours(kpis.activity_window_hours);

    let siblings: Vec<Sibling> = AgentKind::ALL
        .into_iter()
        .filter(|k| *k != AgentKind::Executive)
        .map(|k| load_sibling(&ctx.layout, k))
        .collect();

    let render_failures = siblings
        .iter()
        .find(|s| s.kind == AgentKind::Vertical)
        .map_or(0, |s| {
            s.entries
                .iter()
                .filter(|e| {
                    e.action == "EXPORT" && e.status == LogStatus::Failed && e.timestamp >= since
                })
                .count()
        });

    let mut metrics = Metrics {
        // videos move on to QC; the render report stays behind
        tiktok_produced: count(&siblings, AgentKind::Vertical, DirRole::Output, "*_RAPPORT.md"),
        tiktok_approved: count(&siblings, AgentKind::Quality, DirRole::Approved, "*.mp4"),
        tiktok_rejected: count(&siblings, AgentKind::Quality, DirRole::Rejected, "*.mp4"),
        twitter_ready: count(&siblings, AgentKind::Micro, DirRole::Ready, "*.json"),
        render_failures,
        approval_rate: None,
    };
    let audited = metrics.tiktok_approved + metrics.tiktok_rejected;
    if audited > 0 {
        metrics.approval_rate = Some(metrics.tiktok_approved as f64 / audited as f64);
    }

    let agents: Vec<AgentActivity> = siblings.iter().map(|s| activity(s, since)).collect();
    let (status, alerts, recommendations, directives) = analyze(&metrics, &agents, kpis);

    let report = CeoReport {
        generated_at: now,
        window_hours: kpis.activity_window_hours,
        status,
        metrics,
        agents,
        alerts,
        recommendations,
        directives,
    };

    let path = output.join(format!("ceo_report_{}.json", now.timestamp_millis()));
    write_json_atomic(&path, &report)?;

    for alert in &report.alerts {
        ctx.journal
            .record("KPI", LogStatus::Alert, alert.code.clone(), Some(alert.message.clone()))?;
    }
    for directive in &report.directives {
        ctx.journal.record(
            "DIRECTIVE",
            LogStatus::Delegated,
            format!("{} -> {}", directive.directive, directive.target),
            Some(directive.reason.clone()),
        )?;
    }
    ctx.journal.note(
        "REPORT",
        LogStatus::Success,
        format!("status {:?}, {} alerts", report.status, report.alerts.len()),
    )?;

    Ok(AgentOutcome::ok(
        ctx.kind,
        1,
        0,
        format!(
            "report written: {} approved, {} rejected, {} posts ready",
            report.metrics.tiktok_approved,
            report.metrics.tiktok_rejected,
            report.metrics.twitter_ready
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestRoot;

    fn active(name: &str) -> AgentActivity {
        AgentActivity {
            agent: name.into(),
            status: ActivityStatus::Active,
            total_entries: 3,
            recent_entries: 3,
            failures: 0,
        }
    }

    #[test]
    fn empty_pipeline_is_red_and_escalates() {
        let (health, alerts, _, directives) =
            analyze(&Metrics::default(), &[], &KpiConfig::default());
        assert_eq!(health, Health::Red);
        assert!(alerts.iter().any(|a| a.code == "PRODUCTION_LOW"));
        assert_eq!(directives[0].target, "HUGO");
        assert_eq!(directives[0].directive, "INCREASE_PRODUCTION");
    }

    #[test]
    fn low_approval_asks_for_quality_review() {
        let metrics = Metrics {
            tiktok_approved: 3,
            tiktok_rejected: 3,
            twitter_ready: 2,
            approval_rate: Some(0.5),
            ..Metrics::default()
        };
        let (health, alerts, recommendations, directives) =
            analyze(&metrics, &[active("CHLOE")], &KpiConfig::default());
        assert_eq!(health, Health::Yellow);
        assert!(alerts.iter().any(|a| a.code == "QUALITY_LOW"));
        assert!(recommendations.is_empty());
        assert_eq!(directives.len(), 1);
        assert_eq!(directives[0].directive, "REVIEW_QUALITY");
        assert_eq!(directives[0].target, "CHLOE");
    }

    #[test]
    fn video_only_output_recommends_diversifying() {
        let metrics = Metrics {
            tiktok_approved: 4,
            approval_rate: Some(1.0),
            ..Metrics::default()
        };
        let mut idle = active("JEAN");
        idle.status = ActivityStatus::Idle;
        let (health, _, recommendations, directives) =
            analyze(&metrics, &[idle], &KpiConfig::default());
        assert_eq!(health, Health::Green);
        assert!(recommendations.iter().any(|r| r.code == "DIVERSIFY"));
        assert!(recommendations.iter().any(|r| r.code == "AGENT_IDLE" && r.message.contains("JEAN")));
        assert!(directives.iter().any(|d| d.target == "JEAN" && d.directive == "ACTIVATE_TWITTER"));
    }

    #[test]
    fn render_failures_raise_yellow() {
        let metrics = Metrics {
            tiktok_approved: 5,
            twitter_ready: 1,
            render_failures: 2,
            approval_rate: Some(1.0),
            ..Metrics::default()
        };
        let (health, alerts, _, _) = analyze(&metrics, &[], &KpiConfig::default());
        assert_eq!(health, Health::Yellow);
        assert!(alerts.iter().any(|a| a.code == "RENDER_FAILURES"));
    }

    #[test]
    fn run_counts_sibling_outputs_without_touching_them() {
        let root = TestRoot::new();
        let approved = root.dir(AgentKind::Quality, DirRole::Approved);
        std::fs::write(approved.join("a.mp4"), "x").unwrap();
        std::fs::write(root.dir(AgentKind::Quality, DirRole::Rejected).join("b.mp4"), "x").unwrap();
        std::fs::write(root.dir(AgentKind::Micro, DirRole::Ready).join("t.json"), "{}").unwrap();
        let chloe_out = root.dir(AgentKind::Vertical, DirRole::Output);
        std::fs::write(chloe_out.join("a_RAPPORT.md"), "# a").unwrap();
        std::fs::write(chloe_out.join("b_RAPPORT.md"), "# b").unwrap();

        let ctx = root.context(AgentKind::Executive);
        run(&ctx).unwrap();

        let report = latest_report(&root.dir(AgentKind::Executive, DirRole::Output)).unwrap();
        assert_eq!(report.metrics.tiktok_produced, 2);
        assert_eq!(report.metrics.tiktok_approved, 1);
        assert_eq!(report.metrics.tiktok_rejected, 1);
        assert_eq!(report.metrics.twitter_ready, 1);
        assert_eq!(report.metrics.approval_rate, Some(0.5));
        assert_eq!(report.agents.len(), 6);
        assert!(approved.join("a.mp4").exists());
    }

    #[test]
    fn missing_sibling_config_is_absent() {
        let root = TestRoot::new();
        std::fs::remove_file(root.layout.config_path(AgentKind::Micro)).unwrap();

        run(&root.context(AgentKind::Executive)).unwrap();
        let report = latest_report(&root.dir(AgentKind::Executive, DirRole::Output)).unwrap();
        let jean = report.agents.iter().find(|a| a.agent == "JEAN").unwrap();
        assert_eq!(jean.status, ActivityStatus::Absent);
    }
}
