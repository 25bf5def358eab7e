//! Text/microcontent production: short posts about the session's events.
//!
//! Template rotation and reference years come from a seeded RNG, so a given
//! seed and input always produce the same posts.

use std::path::Path;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::{info, instrument};

use khive_shared::{
    DeliveryManifest, DirRole, Event, Result, Selection, Tweet, TweetConfig,
    TweetTemplate, year_of,
};
use khive_storage::{FilePattern, LogStatus, latest, list_files, read_json, write_json_atomic};

use crate::agent::{AgentContext, AgentOutcome};

/// Where the events came from, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Selection,
    Manifest,
    EventsFile,
}

impl EventSource {
    const ALL: [EventSource; 3] = [Self::Selection, Self::Manifest, Self::EventsFile];

    fn pattern(&self) -> FilePattern {
        match self {
            Self::Selection => FilePattern::new("selection_*"),
            Self::Manifest => FilePattern::new("*MANIFEST*"),
            Self::EventsFile => FilePattern::new("events_*"),
        }
    }

    fn parse(&self, path: &Path) -> Result<Vec<Event>> {
        match self {
            Self::Selection => {
                let selection: Selection = read_json(path)?;
                Ok(selection.clips.into_iter().map(|c| c.event).collect())
            }
            Self::Manifest => {
                let manifest: DeliveryManifest = read_json(path)?;
                Ok(manifest.clips.into_iter().map(|c| c.event).collect())
            }
            Self::EventsFile => {
                #[derive(Deserialize)]
                #[serde(untagged)]
                enum EventsFile {
                    Wrapped { events: Vec<Event> },
                    Bare(Vec<Event>),
                }
                Ok(match read_json::<EventsFile>(path)? {
                    EventsFile::Wrapped { events } | EventsFile::Bare(events) => events,
                })
            }
        }
    }
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Selection => "selection",
            Self::Manifest => "delivery manifest",
            Self::EventsFile => "events file",
        })
    }
}

/// Events above the threshold, or the first few when none qualify.
pub fn pick_events(events: &[Event], config: &TweetConfig) -> Vec<Event> {
    let vip: Vec<Event> = events
        .iter()
        .filter(|e| e.notoriety_or_zero() > config.vip_threshold)
        .cloned()
        .collect();
    if vip.is_empty() {
        events.iter().take(config.fallback_count).cloned().collect()
    } else {
        vip
    }
}

fn hashtags(config: &TweetConfig) -> Vec<String> {
    config
        .default_hashtags
        .iter()
        .map(|h| {
            if h.starts_with('#') {
                h.clone()
            } else {
                format!("#{h}")
            }
        })
        .collect()
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let mut out: String = text.chars().take(max - 1).collect();
    out.push('…');
    out
}

/// Body plus as many leading hashtags as leave room for a blank line and at
/// least one body character. The result never exceeds `max_length` chars.
fn assemble(body: &str, hashtags: &[String], max_length: usize) -> String {
    let mut kept = hashtags.len();
    let line = loop {
        let line = hashtags[..kept].join(" ");
        if kept == 0 || line.chars().count() + 3 <= max_length {
            break line;
        }
        kept -= 1;
    };
    if line.is_empty() {
        return truncate_chars(body, max_length);
    }
    let budget = max_length - line.chars().count() - 2;
    format!("{}\n\n{line}", truncate_chars(body, budget))
}

fn fill(template: &TweetTemplate, event: &Event, ref_year: &str, app_link: &str) -> String {
    let year = year_of(&event.date);
    let title: String = event.title.chars().take(60).collect();
    let description = event.description.clone().unwrap_or_default();
    let fact = match &event.description {
        Some(d) if !d.trim().is_empty() => d.chars().take(150).collect(),
        _ => format!("En {year}, {}", title.to_lowercase()),
    };

    template
        .text
        .replace("{year}", &year)
        .replace("{title}", &title)
        .replace("{description}", &description)
        .replace("{fact}", &fact)
        .replace("{ref_year}", ref_year)
        .replace("{app_link}", app_link)
}

/// Deterministic post generation for `events`.
pub fn generate(events: &[Event], config: &TweetConfig, seed: u64) -> Vec<Tweet> {
    let defaults;
    let templates: &[TweetTemplate] = if config.templates.is_empty() {
        defaults = TweetConfig::default().templates;
        &defaults
    } else {
        &config.templates
    };

    let mut rng = StdRng::seed_from_u64(seed);
    let offset = rng.gen_range(0..templates.len());
    let hashtags = hashtags(config);

    events
        .iter()
        .enumerate()
        .map(|(i, event)| {
            let template = &templates[(offset + i) % templates.len()];
            let year = year_of(&event.date);
            let shift = if rng.gen_bool(0.5) { 100 } else { -100 };
            let ref_year = year
                .parse::<i64>()
                .map(|y| (y + shift).to_string())
                .unwrap_or_else(|_| year.clone());

            let body = fill(template, event, &ref_year, &config.app_link);
            let content = assemble(&body, &hashtags, config.max_length);
            Tweet {
                length: content.chars().count(),
                content,
                kind: template.kind.to_uppercase(),
                event: event.clone(),
            }
        })
        .collect()
}

fn clock_seed() -> u64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64
}

#[instrument(skip_all, fields(agent = "micro"))]
pub fn run(ctx: &AgentContext, seed: Option<u64>) -> Result<AgentOutcome> {
    let input = ctx.dir(DirRole::Input)?;
    let output = ctx.dir(DirRole::Output)?;
    let ready = ctx.dir(DirRole::Ready)?;
    let config = &ctx.config.tweet;

    // --- Source ---
    let mut found = None;
    for (rank, source) in EventSource::ALL.into_iter().enumerate() {
        if let Some(path) = latest(input, &source.pattern())? {
            found = Some((rank, source, path));
            break;
        }
    }
    let Some((rank, source, path)) = found else {
        ctx.journal.record(
            "SOURCE",
            LogStatus::Failed,
            "no event source in input",
            Some("expected a selection, a delivery manifest or an events file".into()),
        )?;
        return Ok(AgentOutcome::idle(ctx.kind, "no events to write about"));
    };

    let Some(claim) = ctx.claim(&path)? else {
        return Ok(AgentOutcome::idle(ctx.kind, "event source claimed by another runner"));
    };
    let events = match source.parse(claim.path()) {
        Ok(events) => events,
        Err(e) => {
            ctx.journal
                .record("SOURCE", LogStatus::Failed, claim.name().to_string(), Some(e.to_string()))?;
            claim.release()?;
            return Err(e);
        }
    };
    ctx.journal.note(
        "SOURCE",
        LogStatus::Ok,
        format!("{} events from {source} {}", events.len(), claim.name()),
    )?;

    // --- Generate ---
    let seed = seed.unwrap_or_else(clock_seed);
    info!(seed, "microcontent seed");

    let picked = pick_events(&events, config);
    let tweets = generate(&picked, config, seed);

    // --- Publish ---
    let stamp = Utc::now().timestamp_millis();
    for (i, tweet) in tweets.iter().enumerate() {
        let name = format!("tweet_{stamp}_{}_{}.json", i + 1, tweet.kind);
        write_json_atomic(&output.join(&name), tweet)?;
        write_json_atomic(&ready.join(&name), tweet)?;
        ctx.journal.note(
            "GENERATE",
            LogStatus::Ok,
            format!("{} post, {} characters", tweet.kind, tweet.length),
        )?;
    }

    let chosen = claim.name().to_string();
    claim.consume()?;

    // Lower-priority sources cover the same session.
    for lower in &EventSource::ALL[rank + 1..] {
        for path in list_files(input, &lower.pattern())? {
            let Some(stale) = ctx.claim(&path)? else {
                continue;
            };
            ctx.journal.record(
                "SOURCE",
                LogStatus::Skip,
                stale.name().to_string(),
                Some(format!("superseded by {source} {chosen}")),
            )?;
            stale.consume()?;
        }
    }

    if tweets.is_empty() {
        ctx.journal
            .note("EXPORT", LogStatus::Warning, "source held no events")?;
    } else {
        ctx.journal
            .note("EXPORT", LogStatus::Success, format!("{} posts ready", tweets.len()))?;
    }

    let count = tweets.len();
    Ok(AgentOutcome::ok(ctx.kind, count, 0, format!("wrote {count} posts")))
}
