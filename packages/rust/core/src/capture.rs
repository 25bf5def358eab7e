//! Capture stage: cut a recorded game session into one clip per event.
//!
//! Input is a `<session>_metadata.json` timeline plus its `raw_*.mp4`
//! recording. Output is one clip per timeline event and a
//! `<session>_DELIVERY_MANIFEST.json` describing them.

use tracing::instrument;

use khive_media::{CutRequest, MediaTool};
use khive_shared::{
    ClippingConfig, DeliveryManifest, DirRole, KhiveError, ManifestClip, Result, SessionMetadata,
    TimelineEvent,
};
use khive_storage::{FilePattern, LogStatus, latest, list_files, read_json, write_json_atomic};

use crate::agent::{AgentContext, AgentOutcome};

const METADATA_SUFFIX: &str = "_metadata.json";

/// Start offset and length of the clip for one event, in seconds.
pub fn clip_window(event: &TimelineEvent, clipping: &ClippingConfig) -> (f64, f64) {
    let start = (event.timecode_apparition - clipping.padding_before).max(0.0);
    let vip = event.event_notoriete.unwrap_or(0.0) > clipping.vip_threshold;
    let end = match event.timecode_choix {
        Some(choice) => {
            choice
                + if vip {
                    clipping.padding_vip
                } else {
                    clipping.padding_standard
                }
        }
        None => start + clipping.target_duration,
    };
    let duration = (end - start).max(clipping.target_duration);
    (start, duration)
}

/// `<session>_tour<n>_<title>.mp4`, the title reduced to `[A-Za-z0-9_]`, 30 chars.
pub fn clip_filename(session_id: &str, event: &TimelineEvent) -> String {
    let title: String = event
        .event_titre
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(30)
        .collect();
    format!("{session_id}_tour{}_{title}.mp4", event.tour)
}

#[instrument(skip_all, fields(agent = "capture"))]
pub fn run(ctx: &AgentContext, media: &dyn MediaTool) -> Result<AgentOutcome> {
    let input = ctx.dir(DirRole::Input)?;
    let output = ctx.dir(DirRole::Output)?;

    // --- Find the session pair ---
    let metadata_path = latest(input, &FilePattern::new(format!("*{METADATA_SUFFIX}")))?;
    let Some(metadata_path) = metadata_path else {
        ctx.journal.record(
            "INPUT",
            LogStatus::Failed,
            "incomplete video/metadata pair in input",
            Some("no session metadata".into()),
        )?;
        return Ok(AgentOutcome::idle(ctx.kind, "no session to cut"));
    };
    let metadata_name = file_name(&metadata_path);
    let session_id = metadata_name.trim_end_matches(METADATA_SUFFIX).to_string();

    let preferred = input.join(format!("raw_{session_id}.mp4"));
    let video_path = if preferred.is_file() {
        Some(preferred)
    } else {
        list_files(input, &FilePattern::new("raw_*.mp4"))?.into_iter().next()
    };
    let Some(video_path) = video_path else {
        ctx.journal.record(
            "INPUT",
            LogStatus::Failed,
            format!("session {session_id} has no raw recording"),
            Some("incomplete video/metadata pair in input".into()),
        )?;
        return Ok(AgentOutcome::idle(ctx.kind, "no session to cut"));
    };

    // --- Claim both ---
    let Some(metadata_claim) = ctx.claim(&metadata_path)? else {
        return Ok(AgentOutcome::idle(ctx.kind, "session claimed by another runner"));
    };
    let Some(video_claim) = ctx.claim(&video_path)? else {
        metadata_claim.release()?;
        return Ok(AgentOutcome::idle(ctx.kind, "session claimed by another runner"));
    };

    let metadata: SessionMetadata = match read_json(metadata_claim.path()) {
        Ok(m) => m,
        Err(e) => {
            ctx.journal
                .record("METADATA", LogStatus::Failed, metadata_name, Some(e.to_string()))?;
            metadata_claim.release()?;
            video_claim.release()?;
            return Err(e);
        }
    };

    ctx.journal.note(
        "SESSION",
        LogStatus::Process,
        format!(
            "session {session_id}: {} events, source {}",
            metadata.events_timeline.len(),
            video_claim.name()
        ),
    )?;

    // --- Cut ---
    let mut clips = Vec::new();
    let mut failed = 0;

    for event in &metadata.events_timeline {
        let (start, duration) = clip_window(event, &ctx.config.clipping);
        let name = clip_filename(&session_id, event);
        let target = output.join(&name);
        let temp = output.join(format!(".{}.part.mp4", name.trim_end_matches(".mp4")));

        let request = CutRequest {
            source: video_claim.path().to_path_buf(),
            output: temp.clone(),
            start,
            duration,
        };

        let cut = media.cut(&request).and_then(|()| {
            std::fs::rename(&temp, &target).map_err(|e| KhiveError::io(&target, e))
        });

        match cut {
            Ok(()) => {
                ctx.journal.note(
                    "CLIP_SAVED",
                    LogStatus::Success,
                    format!("{name} (start {start:.1}s, {duration:.1}s)"),
                )?;
                clips.push(ManifestClip {
                    filename: name,
                    tour: event.tour,
                    event: event.event(),
                    answer: event.choix.clone(),
                    duration,
                });
            }
            Err(e) => {
                let _ = std::fs::remove_file(&temp);
                ctx.journal
                    .record("CLIPPING", LogStatus::Failed, name, Some(e.to_string()))?;
                failed += 1;
            }
        }
    }

    // --- Deliver ---
    let manifest = DeliveryManifest {
        session_id: session_id.clone(),
        clips,
    };
    let manifest_path = output.join(format!("{session_id}_DELIVERY_MANIFEST.json"));
    write_json_atomic(&manifest_path, &manifest)?;

    metadata_claim.consume()?;
    video_claim.consume()?;

    let delivered = manifest.clips.len();
    ctx.journal.note(
        "PROCESS_FINAL",
        LogStatus::Success,
        format!("delivered {delivered} clips for session {session_id}"),
    )?;

    Ok(AgentOutcome::ok(
        ctx.kind,
        delivered,
        failed,
        format!("cut {delivered} clips ({failed} failed)"),
    ))
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestRoot;
    use khive_media::testing::ScriptedMedia;
    use khive_shared::AgentKind;

    fn timeline_event(tour: u32, apparition: f64, choice: Option<f64>, notoriety: f64) -> TimelineEvent {
        TimelineEvent {
            tour,
            timecode_apparition: apparition,
            timecode_choix: choice,
            choix: choice.map(|_| "avant".to_string()),
            event_titre: "Prise de la Bastille".into(),
            event_date: "1789-07-14".into(),
            event_description: None,
            event_notoriete: Some(notoriety),
        }
    }

    #[test]
    fn window_pads_and_extends_to_target() {
        let clipping = ClippingConfig::default();

        // Short answer window is extended to the 25 s target.
        let (start, duration) = clip_window(&timeline_event(1, 10.0, Some(14.0), 50.0), &clipping);
        assert_eq!(start, 7.0);
        assert_eq!(duration, 25.0);

        // VIP padding on a long answer window.
        let (start, duration) = clip_window(&timeline_event(2, 100.0, Some(130.0), 95.0), &clipping);
        assert_eq!(start, 97.0);
        assert_eq!(duration, 41.0);

        // Start is clamped at zero; no answer uses the target length.
        let (start, duration) = clip_window(&timeline_event(3, 1.0, None, 10.0), &clipping);
        assert_eq!(start, 0.0);
        assert_eq!(duration, 25.0);
    }

    #[test]
    fn filenames_are_sanitised() {
        let event = timeline_event(4, 0.0, None, 0.0);
        assert_eq!(
            clip_filename("s1", &event),
            "s1_tour4_Prise_de_la_Bastille.mp4"
        );
    }

    #[test]
    fn cuts_every_event_and_writes_manifest() {
        let root = TestRoot::new();
        let input = root.dir(AgentKind::Capture, DirRole::Input);
        let metadata = SessionMetadata {
            events_timeline: vec![
                timeline_event(1, 10.0, Some(14.0), 95.0),
                timeline_event(2, 60.0, None, 40.0),
            ],
        };
        write_json_atomic(&input.join("s1_metadata.json"), &metadata).unwrap();
        ScriptedMedia::write_video(&input.join("raw_s1.mp4"), 300.0).unwrap();

        let ctx = root.context(AgentKind::Capture);
        let media = ScriptedMedia::new();
        let outcome = run(&ctx, &media).unwrap();
        assert_eq!(outcome.processed, 2);

        let output = root.dir(AgentKind::Capture, DirRole::Output);
        let manifest: DeliveryManifest =
            read_json(&output.join("s1_DELIVERY_MANIFEST.json")).unwrap();
        assert_eq!(manifest.clips.len(), 2);
        assert!(output.join(&manifest.clips[0].filename).exists());
        assert!(list_files(&input, &FilePattern::any()).unwrap().is_empty());
        assert_eq!(media.cuts().len(), 2);
    }

    #[test]
    fn incomplete_pair_is_journaled_and_idle() {
        let root = TestRoot::new();
        let input = root.dir(AgentKind::Capture, DirRole::Input);
        std::fs::write(input.join("s1_metadata.json"), r#"{"events_timeline": []}"#).unwrap();

        let ctx = root.context(AgentKind::Capture);
        let outcome = run(&ctx, &ScriptedMedia::new()).unwrap();
        assert_eq!(outcome.processed, 0);
        assert!(input.join("s1_metadata.json").exists());

        let entries = ctx.journal.entries().unwrap();
        assert!(entries.iter().any(|e| e.status == LogStatus::Failed));
    }
}
