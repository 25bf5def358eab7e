//! ffmpeg / ffprobe subprocess implementation of [`MediaTool`].

use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument, warn};

use khive_shared::{KhiveError, Result, ToolsConfig};

use crate::{CutRequest, MediaTool, VerticalRequest, filter};

const MAX_ATTEMPTS: u32 = 5;

/// `time=HH:MM:SS.cs` from ffmpeg's stderr progress lines.
static PROGRESS_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time=(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("valid progress regex")
});

/// Media tool backed by the ffmpeg command-line binaries.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg: String,
    ffprobe: String,
    attempts: u32,
}

impl Ffmpeg {
    pub fn from_config(tools: &ToolsConfig) -> Self {
        Self {
            ffmpeg: tools.ffmpeg.clone(),
            ffprobe: tools.ffprobe.clone(),
            attempts: tools.attempts.clamp(1, MAX_ATTEMPTS),
        }
    }

    /// Run `program`, retrying non-zero exits up to the configured attempts.
    fn run(&self, program: &str, args: &[String]) -> Result<Output> {
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            debug!(program, attempt, "running media tool");
            let output = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .output()
                .map_err(|e| {
                    KhiveError::tool(program, format!("failed to spawn: {e}. Is `{program}` installed?"))
                })?;

            if output.status.success() {
                return Ok(output);
            }

            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut message = format!("{}: {}", output.status, tail(&stderr, 3));
            if let Some(reached) = last_progress(&stderr) {
                message.push_str(&format!(" (stopped at {reached:.1}s)"));
            }
            warn!(program, attempt, attempts = self.attempts, %message, "media tool failed");
            last_error = Some(KhiveError::tool(program, message));
        }

        Err(last_error.unwrap_or_else(|| KhiveError::tool(program, "no attempt made")))
    }

    fn probe(&self, path: &Path, args: &[&str]) -> Result<String> {
        let mut full: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        full.push(path.display().to_string());
        let output = self.run(&self.ffprobe, &full)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl MediaTool for Ffmpeg {
    fn probe_duration(&self, path: &Path) -> Result<f64> {
        let out = self.probe(
            path,
            &[
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ],
        )?;
        out.lines()
            .next()
            .and_then(|l| l.trim().parse::<f64>().ok())
            .ok_or_else(|| KhiveError::tool(&self.ffprobe, format!("unexpected duration output '{out}'")))
    }

    fn probe_video_stream(&self, path: &Path) -> Result<bool> {
        let out = self.probe(
            path,
            &[
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=codec_name",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ],
        )?;
        Ok(!out.is_empty())
    }

    #[instrument(skip_all, fields(source = %request.source.display(), start = request.start, duration = request.duration))]
    fn cut(&self, request: &CutRequest) -> Result<()> {
        let args: Vec<String> = vec![
            "-y".into(),
            "-hide_banner".into(),
            "-ss".into(),
            format!("{:.3}", request.start),
            "-i".into(),
            request.source.display().to_string(),
            "-t".into(),
            format!("{:.3}", request.duration),
            "-c".into(),
            "copy".into(),
            "-avoid_negative_ts".into(),
            "make_zero".into(),
            request.output.display().to_string(),
        ];
        self.run(&self.ffmpeg, &args).map(|_| ())
    }

    #[instrument(skip_all, fields(source = %request.source.display(), duration = request.duration))]
    fn render_vertical(&self, request: &VerticalRequest) -> Result<()> {
        let args = filter::vertical_args(request);
        self.run(&self.ffmpeg, &args).map(|_| ())
    }
}

/// Last `time=` position reported on stderr, in seconds.
pub fn last_progress(stderr: &str) -> Option<f64> {
    let caps = PROGRESS_TIME.captures_iter(stderr).last()?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

fn tail(text: &str, lines: usize) -> String {
    let collected: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let start = collected.len().saturating_sub(lines);
    collected[start..].join(" | ")
}
