//! Quality control: approve or reject rendered videos.
//!
//! Every `*.mp4` in input is audited against the `validation` section and
//! moved to the approved (ready-to-publish) or rejected directory. Nothing
//! ever goes back to input.

use std::path::Path;

use tracing::instrument;

use khive_media::MediaTool;
use khive_shared::{DirRole, KhiveError, Result, ValidationConfig};
use khive_storage::{FilePattern, LogStatus, list_files};

use crate::agent::{AgentContext, AgentOutcome};

/// Everything wrong with one video. Empty means approved.
pub fn audit(path: &Path, media: &dyn MediaTool, rules: &ValidationConfig) -> Result<Vec<String>> {
    let mut issues = Vec::new();

    let size = std::fs::metadata(path)
        .map_err(|e| KhiveError::io(path, e))?
        .len() as f64;
    let size_kb = size / 1024.0;
    let size_mb = size_kb / 1024.0;

    if rules.min_size_kb > 0.0 && size_kb < rules.min_size_kb {
        issues.push(format!(
            "file too small ({size_kb:.1}KB < {}KB)",
            rules.min_size_kb
        ));
    }
    if size_mb > rules.max_size_mb {
        issues.push(format!(
            "file too large ({size_mb:.1}MB > {}MB)",
            rules.max_size_mb
        ));
    }

    match media.probe_duration(path) {
        Ok(duration) if duration < rules.min_duration_seconds => issues.push(format!(
            "duration too short ({duration:.1}s < {}s)",
            rules.min_duration_seconds
        )),
        Ok(duration) if duration > rules.max_duration_seconds => issues.push(format!(
            "duration too long ({duration:.1}s > {}s)",
            rules.max_duration_seconds
        )),
        Ok(_) => {}
        Err(e) => issues.push(format!("cannot probe duration: {e}")),
    }

    if rules.require_video_stream {
        match media.probe_video_stream(path) {
            Ok(true) => {}
            Ok(false) => issues.push("no video stream".into()),
            Err(e) => issues.push(format!("cannot probe video stream: {e}")),
        }
    }

    Ok(issues)
}

#[instrument(skip_all, fields(agent = "quality"))]
pub fn run(ctx: &AgentContext, media: &dyn MediaTool) -> Result<AgentOutcome> {
    let input = ctx.dir(DirRole::Input)?;
    let approved_dir = ctx.dir(DirRole::Approved)?;
    let rejected_dir = ctx.dir(DirRole::Rejected)?;
    let rules = &ctx.config.validation;

    let mut approved = 0;
    let mut rejected = 0;

    for video in list_files(input, &FilePattern::new("*.mp4"))? {
        let Some(claim) = ctx.claim(&video)? else {
            continue;
        };

        let issues = match audit(claim.path(), media, rules) {
            Ok(issues) => issues,
            Err(e) => {
                claim.release()?;
                return Err(e);
            }
        };
        let name = claim.name().to_string();

        if issues.is_empty() {
            let target = claim.finish_into(approved_dir)?;
            ctx.journal.note(
                "AUDIT",
                LogStatus::Approved,
                format!("{name} -> {}", target.display()),
            )?;
            approved += 1;
        } else {
            claim.finish_into(rejected_dir)?;
            ctx.journal
                .record("AUDIT", LogStatus::Rejected, name, Some(issues.join("; ")))?;
            rejected += 1;
        }
    }

    if approved + rejected == 0 {
        ctx.journal
            .note("SCAN", LogStatus::Skip, "no video waiting for review")?;
    }

    Ok(AgentOutcome::ok(
        ctx.kind,
        approved,
        rejected,
        format!("{approved} approved, {rejected} rejected"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestRoot;
    use khive_media::testing::ScriptedMedia;
    use khive_shared::AgentKind;

    #[test]
    fn routes_by_duration_band() {
        let root = TestRoot::new();
        let input = root.dir(AgentKind::Quality, DirRole::Input);
        ScriptedMedia::write_video(&input.join("short.mp4"), 5.0).unwrap();
        ScriptedMedia::write_video(&input.join("good.mp4"), 25.0).unwrap();
        ScriptedMedia::write_video(&input.join("long.mp4"), 75.0).unwrap();
        ScriptedMedia::write_video(&input.join("edge.mp4"), 60.0).unwrap();

        let ctx = root.context(AgentKind::Quality);
        let outcome = run(&ctx, &ScriptedMedia::new()).unwrap();
        assert_eq!(outcome.processed, 2);
        assert_eq!(outcome.failed, 2);

        let mut approved = root.names(AgentKind::Quality, DirRole::Approved);
        approved.sort();
        assert_eq!(approved, vec!["edge.mp4", "good.mp4"]);
        assert_eq!(
            root.names(AgentKind::Quality, DirRole::Rejected),
            vec!["long.mp4", "short.mp4"]
        );
        assert!(root.names(AgentKind::Quality, DirRole::Input).is_empty());

        let reasons: Vec<String> = ctx
            .journal
            .entries()
            .unwrap()
            .into_iter()
            .filter(|e| e.status == LogStatus::Rejected)
            .filter_map(|e| e.reason)
            .collect();
        assert!(reasons.iter().any(|r| r.starts_with("duration too short")));
        assert!(reasons.iter().any(|r| r.starts_with("duration too long")));
    }

    #[test]
    fn size_ceiling_rejects() {
        let root = TestRoot::new();
        root.edit_config(AgentKind::Quality, |c| c.validation.max_size_mb = 0.000_01);
        let input = root.dir(AgentKind::Quality, DirRole::Input);
        ScriptedMedia::write_video(&input.join("big.mp4"), 25.0).unwrap();

        let ctx = root.context(AgentKind::Quality);
        run(&ctx, &ScriptedMedia::new()).unwrap();
        assert_eq!(root.names(AgentKind::Quality, DirRole::Rejected), vec!["big.mp4"]);
    }

    #[test]
    fn unreadable_video_is_rejected_not_fatal() {
        let root = TestRoot::new();
        let input = root.dir(AgentKind::Quality, DirRole::Input);
        std::fs::write(input.join("broken.mp4"), "garbage").unwrap();

        let ctx = root.context(AgentKind::Quality);
        run(&ctx, &ScriptedMedia::new()).unwrap();
        assert_eq!(
            root.names(AgentKind::Quality, DirRole::Rejected),
            vec!["broken.mp4"]
        );
        let entry = ctx
            .journal
            .entries()
            .unwrap()
            .into_iter()
            .find(|e| e.status == LogStatus::Rejected)
            .unwrap();
        assert!(entry.reason.unwrap().contains("cannot probe duration"));
    }
}
