//! Vertical-video production: render each selected clip as a 9:16 video
//! with its hook burned in, plus a markdown production report.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::instrument;

use khive_media::{MediaTool, VerticalRequest};
use khive_shared::{DirRole, KhiveError, Result, SelectedClip, Selection, year_of};
use khive_storage::{
    FilePattern, LogStatus, latest, list_files, read_json, unique_name, write_atomic,
};

use crate::agent::{AgentContext, AgentOutcome};

/// Markdown sidecar written next to each rendered video.
pub fn production_report(clip: &SelectedClip, video_name: &str, duration: f64) -> String {
    let notoriety = clip
        .event
        .notoriety
        .map(|n| n.to_string())
        .unwrap_or_else(|| "?".into());
    format!(
        "# Production report: {video_name}\n\n\
         - Event: {title}\n\
         - Year: {year}\n\
         - Notoriety: {notoriety}\n\
         - Hook: \"{hook}\"\n\
         - Source: {source}\n\
         - Duration: {duration:.1}s\n\
         - Rendered at: {at}\n",
        title = clip.event.title,
        year = year_of(&clip.event.date),
        hook = clip.hook,
        source = clip.original_filename,
        at = Utc::now().to_rfc3339(),
    )
}

fn report_path(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    video.with_file_name(format!("{stem}_RAPPORT.md"))
}

fn clear_previous_outputs(output: &Path) -> Result<usize> {
    let mut removed = 0;
    for pattern in ["*.mp4", "*.md"] {
        for file in list_files(output, &FilePattern::new(pattern))? {
            std::fs::remove_file(&file).map_err(|e| KhiveError::io(&file, e))?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Existing asset referenced by config, if any.
fn asset(ctx: &AgentContext, path: Option<&str>) -> Option<PathBuf> {
    path.map(|p| ctx.resolve_path(p)).filter(|p| p.is_file())
}

#[instrument(skip_all, fields(agent = "vertical"))]
pub fn run(ctx: &AgentContext, media: &dyn MediaTool) -> Result<AgentOutcome> {
    let input = ctx.dir(DirRole::Input)?;
    let output = ctx.dir(DirRole::Output)?;
    let config = &ctx.config;

    let Some(selection_path) = latest(input, &FilePattern::new("selection_*.json"))? else {
        ctx.journal.record(
            "SCAN",
            LogStatus::Skip,
            "no selection in input",
            Some("waiting for selector".into()),
        )?;
        return Ok(AgentOutcome::idle(ctx.kind, "no selection to produce"));
    };
    let Some(selection_claim) = ctx.claim(&selection_path)? else {
        return Ok(AgentOutcome::idle(ctx.kind, "selection claimed by another runner"));
    };

    let mut selection: Selection = match read_json(selection_claim.path()) {
        Ok(s) => s,
        Err(e) => {
            ctx.journal.record(
                "READ",
                LogStatus::Failed,
                selection_claim.name().to_string(),
                Some(e.to_string()),
            )?;
            selection_claim.release()?;
            return Err(e);
        }
    };

    if let Some(limit) = config.production.limit_clips {
        selection.clips.truncate(limit);
    }
    if config.production.clean_output_before_run {
        let removed = clear_previous_outputs(output)?;
        ctx.journal
            .note("CLEAN", LogStatus::Ok, format!("removed {removed} previous outputs"))?;
    }

    let banner = asset(ctx, config.hook.banner_path.as_deref());
    let cta_image = asset(ctx, config.cta.image_path.as_deref());

    let mut rendered = 0;
    let mut failed = 0;

    for clip in &selection.clips {
        let source = input.join(&clip.original_filename);
        let Some(source_claim) = ctx.claim(&source)? else {
            ctx.journal.record(
                "SOURCE",
                LogStatus::Failed,
                clip.original_filename.clone(),
                Some("source clip not found in input".into()),
            )?;
            failed += 1;
            continue;
        };

        let target = unique_name(output, &clip.readable_filename);
        let target_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = target_name.trim_end_matches(".mp4");
        let temp = output.join(format!(".{stem}.part.mp4"));

        let duration = if config.video.loop_if_short {
            config.video.target_duration
        } else {
            clip.duration.min(config.video.target_duration)
        };

        ctx.journal.note(
            "RENDER",
            LogStatus::Process,
            format!("{} -> {target_name} ({duration:.1}s)", clip.original_filename),
        )?;

        let request = VerticalRequest {
            source: source_claim.path().to_path_buf(),
            output: temp.clone(),
            duration,
            loop_source: config.video.loop_if_short,
            hook_text: clip.hook.clone(),
            video: config.video.clone(),
            hook: config.hook.clone(),
            cta: config.cta.clone(),
            banner: banner.clone(),
            cta_image: cta_image.clone(),
        };

        let result = media.render_vertical(&request).and_then(|()| {
            std::fs::rename(&temp, &target).map_err(|e| KhiveError::io(&target, e))
        });

        match result {
            Ok(()) => {
                let report = production_report(clip, &target_name, duration);
                write_atomic(&report_path(&target), report.as_bytes())?;
                source_claim.consume()?;
                ctx.journal
                    .note("EXPORT", LogStatus::Success, target_name)?;
                rendered += 1;
            }
            Err(e) => {
                let _ = std::fs::remove_file(&temp);
                source_claim.release()?;
                ctx.journal.record(
                    "EXPORT",
                    LogStatus::Failed,
                    target_name,
                    Some(e.to_string()),
                )?;
                failed += 1;
            }
        }
    }

    selection_claim.consume()?;

    Ok(AgentOutcome::ok(
        ctx.kind,
        rendered,
        failed,
        format!("rendered {rendered} videos ({failed} failed)"),
    ))
}
