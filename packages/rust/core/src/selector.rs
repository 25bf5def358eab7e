//! Content-strategy selector: pick the clips worth producing.
//!
//! Reads the latest delivery manifest, filters and ranks its clips by event
//! notoriety, and writes a `selection_<session>.json` with a hook and a
//! readable file name for every kept clip.

use std::cmp::Ordering;
use std::io::ErrorKind;
use std::path::Path;

use chrono::Utc;
use tracing::{debug, instrument};

use khive_shared::{
    DeliveryManifest, DirRole, KhiveError, ManifestClip, Result, SelectedClip, Selection,
    SelectionConfig,
};
use khive_storage::{FilePattern, LogStatus, latest, read_json, write_json_atomic};

use crate::agent::{AgentContext, AgentOutcome};
use crate::hooks;

const SELECTION_METHOD: &str = "VIP_PRIORITY";

/// Why a clip was left out.
#[derive(Debug, Clone, PartialEq)]
pub enum Exclusion {
    NoAnswer,
    DurationOutOfRange { duration: f64, min: f64, max: f64 },
    BelowThreshold { notoriety: f64, threshold: f64 },
}

impl std::fmt::Display for Exclusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoAnswer => write!(f, "no player answer"),
            Self::DurationOutOfRange { duration, min, max } => {
                write!(f, "duration {duration:.1}s outside [{min}, {max}]s")
            }
            Self::BelowThreshold {
                notoriety,
                threshold,
            } => write!(f, "notoriety {notoriety} <= {threshold}"),
        }
    }
}

/// The first reason `clip` is excluded, if any.
pub fn exclusion(clip: &ManifestClip, config: &SelectionConfig) -> Option<Exclusion> {
    if config.require_answer && clip.answer.as_deref().is_none_or(|a| a.trim().is_empty()) {
        return Some(Exclusion::NoAnswer);
    }
    if clip.duration < config.min_duration || clip.duration > config.max_duration {
        return Some(Exclusion::DurationOutOfRange {
            duration: clip.duration,
            min: config.min_duration,
            max: config.max_duration,
        });
    }
    let notoriety = clip.event.notoriety_or_zero();
    if notoriety <= config.vip_threshold {
        return Some(Exclusion::BelowThreshold {
            notoriety,
            threshold: config.vip_threshold,
        });
    }
    None
}

/// Notoriety descending, then tour, then file name.
fn rank(a: &ManifestClip, b: &ManifestClip) -> Ordering {
    b.event
        .notoriety_or_zero()
        .total_cmp(&a.event.notoriety_or_zero())
        .then(a.tour.cmp(&b.tour))
        .then_with(|| a.filename.cmp(&b.filename))
}

/// Filter, rank, cap and enrich. Exclusions are returned for journaling.
pub fn select(
    manifest: &DeliveryManifest,
    config: &SelectionConfig,
) -> (Selection, Vec<(u32, Exclusion)>) {
    let mut excluded = Vec::new();
    let mut kept: Vec<&ManifestClip> = Vec::new();

    for clip in &manifest.clips {
        match exclusion(clip, config) {
            Some(reason) => excluded.push((clip.tour, reason)),
            None => kept.push(clip),
        }
    }

    kept.sort_by(|a, b| rank(a, b));
    kept.truncate(config.max_clips);

    let clips: Vec<SelectedClip> = kept
        .into_iter()
        .map(|clip| {
            let framing = hooks::framing_for(clip.answer.as_deref());
            SelectedClip {
                original_filename: clip.filename.clone(),
                readable_filename: hooks::readable_filename(&clip.event),
                tour: clip.tour,
                duration: clip.duration,
                event: clip.event.clone(),
                answer: clip.answer.clone(),
                hook: hooks::generate_hook(&clip.event, clip.tour, framing),
                framing,
                is_vip: clip.event.notoriety_or_zero() > config.vip_threshold,
            }
        })
        .collect();

    let selection = Selection {
        session_id: manifest.session_id.clone(),
        selection_date: Utc::now(),
        selection_method: SELECTION_METHOD.into(),
        total_clips_analyzed: manifest.clips.len(),
        clips_selected: clips.len(),
        clips,
    };
    (selection, excluded)
}

#[instrument(skip_all, fields(agent = "selector"))]
pub fn run(ctx: &AgentContext) -> Result<AgentOutcome> {
    let input = ctx.dir(DirRole::Input)?;
    let output = ctx.dir(DirRole::Output)?;

    let Some(manifest_path) = latest(input, &FilePattern::new("*_DELIVERY_MANIFEST.json"))? else {
        ctx.journal.record(
            "SCAN",
            LogStatus::Skip,
            "no delivery manifest in input",
            Some("waiting for capture delivery".into()),
        )?;
        return Ok(AgentOutcome::idle(ctx.kind, "no manifest to select from"));
    };

    let Some(claim) = ctx.claim(&manifest_path)? else {
        return Ok(AgentOutcome::idle(ctx.kind, "manifest claimed by another runner"));
    };

    let manifest: DeliveryManifest = match read_json(claim.path()) {
        Ok(m) => m,
        Err(e) => {
            ctx.journal
                .record("READ", LogStatus::Failed, claim.name().to_string(), Some(e.to_string()))?;
            claim.release()?;
            return Err(e);
        }
    };
    ctx.journal.note(
        "READ",
        LogStatus::Ok,
        format!("session {}, {} clips", manifest.session_id, manifest.clips.len()),
    )?;

    let (selection, excluded) = select(&manifest, &ctx.config.selection);

    for (tour, reason) in &excluded {
        ctx.journal.record(
            "FILTER",
            LogStatus::Skip,
            format!("tour {tour}"),
            Some(reason.to_string()),
        )?;
    }
    for clip in &selection.clips {
        debug!(tour = clip.tour, hook = %clip.hook, "selected clip");
        ctx.journal.note(
            "HOOK",
            LogStatus::Ok,
            format!("\"{}\" for {}", clip.hook, clip.event.title),
        )?;
    }

    let out_path = output.join(format!("selection_{}.json", selection.session_id));
    write_json_atomic(&out_path, &selection)?;
    claim.consume()?;

    let discarded = discard_unselected(input, &manifest, &selection)?;
    if discarded > 0 {
        ctx.journal
            .note("CLEANUP", LogStatus::Ok, format!("discarded {discarded} unselected clips"))?;
    }

    ctx.journal.note(
        "STRATEGY",
        LogStatus::Success,
        format!(
            "{} of {} clips selected (notoriety > {})",
            selection.clips_selected, selection.total_clips_analyzed, ctx.config.selection.vip_threshold
        ),
    )?;

    Ok(AgentOutcome::ok(
        ctx.kind,
        selection.clips_selected,
        excluded.len(),
        format!("selected {} clips", selection.clips_selected),
    ))
}

/// Delete the manifest's clips that did not make the selection.
fn discard_unselected(input: &Path, manifest: &DeliveryManifest, selection: &Selection) -> Result<usize> {
    let mut discarded = 0;
    for clip in &manifest.clips {
        if selection.clips.iter().any(|c| c.original_filename == clip.filename) {
            continue;
        }
        let Some(name) = Path::new(&clip.filename).file_name() else {
            continue;
        };
        let path = input.join(name);
        match std::fs::remove_file(&path) {
            Ok(()) => discarded += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(KhiveError::io(&path, e)),
        }
    }
    Ok(discarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestRoot;
    use khive_shared::{AgentKind, Event, HookFraming};

    fn clip(tour: u32, notoriety: f64, duration: f64, answer: Option<&str>) -> ManifestClip {
        ManifestClip {
            filename: format!("s1_tour{tour}_Event.mp4"),
            tour,
            event: Event {
                title: format!("Événement {tour}"),
                date: "1900-01-01".into(),
                description: None,
                notoriety: Some(notoriety),
            },
            answer: answer.map(String::from),
            duration,
        }
    }

    fn manifest(clips: Vec<ManifestClip>) -> DeliveryManifest {
        DeliveryManifest {
            session_id: "s1".into(),
            clips,
        }
    }

    #[test]
    fn notoriety_at_or_below_threshold_is_excluded() {
        let config = SelectionConfig::default();
        let m = manifest(vec![
            clip(1, 90.0, 25.0, Some("avant")),
            clip(2, 90.5, 25.0, Some("avant")),
            clip(3, 42.0, 25.0, Some("après")),
        ]);
        let (selection, excluded) = select(&m, &config);
        assert_eq!(selection.clips.len(), 1);
        assert_eq!(selection.clips[0].tour, 2);
        assert!(selection.clips.iter().all(|c| c.event.notoriety_or_zero() > 90.0));
        assert_eq!(excluded.len(), 2);
    }

    #[test]
    fn no_fallback_when_nothing_qualifies() {
        let m = manifest(vec![clip(1, 50.0, 25.0, Some("avant"))]);
        let (selection, _) = select(&m, &SelectionConfig::default());
        assert!(selection.clips.is_empty());
        assert_eq!(selection.total_clips_analyzed, 1);
    }

    #[test]
    fn unanswered_and_out_of_band_clips_are_dropped() {
        let config = SelectionConfig::default();
        assert_eq!(
            exclusion(&clip(1, 99.0, 25.0, None), &config),
            Some(Exclusion::NoAnswer)
        );
        assert!(matches!(
            exclusion(&clip(1, 99.0, 1.0, Some("avant")), &config),
            Some(Exclusion::DurationOutOfRange { .. })
        ));
        assert_eq!(exclusion(&clip(1, 99.0, 25.0, Some("avant")), &config), None);
    }

    #[test]
    fn ranking_is_stable_and_capped() {
        let m = manifest(vec![
            clip(4, 95.0, 25.0, Some("avant")),
            clip(2, 99.0, 25.0, Some("après")),
            clip(1, 95.0, 25.0, Some("avant")),
            clip(3, 97.0, 25.0, Some("avant")),
        ]);
        let (selection, _) = select(&m, &SelectionConfig::default());
        let tours: Vec<u32> = selection.clips.iter().map(|c| c.tour).collect();
        assert_eq!(tours, vec![2, 3, 1]);
        assert_eq!(selection.clips[0].framing, HookFraming::PostEvent);
        assert!(selection.clips.iter().all(|c| c.is_vip));
    }

    #[test]
    fn run_consumes_manifest_and_writes_selection() {
        let root = TestRoot::new();
        let input = root.dir(AgentKind::Selector, DirRole::Input);
        write_json_atomic(
            &input.join("s1_DELIVERY_MANIFEST.json"),
            &manifest(vec![
                clip(1, 95.0, 25.0, Some("avant")),
                clip(2, 10.0, 25.0, Some("avant")),
            ]),
        )
        .unwrap();
        std::fs::write(input.join("s1_tour1_Event.mp4"), "v").unwrap();
        std::fs::write(input.join("s1_tour2_Event.mp4"), "v").unwrap();

        let ctx = root.context(AgentKind::Selector);
        let outcome = run(&ctx).unwrap();
        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.failed, 1);

        // the manifest is consumed and only the selected clip is left for production
        assert_eq!(
            root.names(AgentKind::Selector, DirRole::Input),
            vec!["s1_tour1_Event.mp4"]
        );
        let selection: Selection = read_json(
            &root
                .dir(AgentKind::Selector, DirRole::Output)
                .join("selection_s1.json"),
        )
        .unwrap();
        assert_eq!(selection.clips_selected, 1);

        let skips = ctx
            .journal
            .entries()
            .unwrap()
            .into_iter()
            .filter(|e| e.status == LogStatus::Skip)
            .count();
        assert_eq!(skips, 1);
    }

    #[test]
    fn run_without_manifest_is_idle() {
        let root = TestRoot::new();
        let outcome = run(&root.context(AgentKind::Selector)).unwrap();
        assert_eq!(outcome.processed, 0);
        assert!(outcome.success);
    }
}
