//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use khive_core::pipeline::{PipelineObserver, PipelineRun, StageRecord, StageState};
use khive_core::{
    AgentOptions, InProcessRunner, Mode, SocialMode, StageRunner, SubprocessRunner, orchestrator,
    run_agent,
};
use khive_shared::AgentKind;
use khive_storage::Layout;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// K-Hive: turn game sessions into short-form videos and posts.
#[derive(Parser)]
#[command(
    name = "khive",
    version,
    about = "Run the K-Hive content pipeline or one of its agents.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Pipeline root (contains K_HIVE/, REPORTERS_UNIT/ and PRET_A_PUBLIER/).
    #[arg(long, env = "KHIVE_ROOT", default_value = ".", global = true)]
    pub root: PathBuf,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Run agents inside this process instead of one child per stage.
    #[arg(long, global = true)]
    pub in_process: bool,

    /// Seed for microcontent template rotation.
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    #[command(flatten)]
    pub mode: ModeFlags,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Pipeline mode. Defaults to `--full`.
#[derive(Args, Debug, Default)]
#[group(multiple = false)]
pub(crate) struct ModeFlags {
    /// Capture, selection, production, QC, microcontent, report.
    #[arg(long)]
    pub full: bool,
    /// Selection, production and QC only.
    #[arg(long)]
    pub tiktok: bool,
    /// Microcontent only.
    #[arg(long)]
    pub twitter: bool,
    /// Executive report only.
    #[arg(long)]
    pub report: bool,
    /// Empty the working directories.
    #[arg(long)]
    pub clean: bool,
}

impl ModeFlags {
    fn mode(&self) -> Mode {
        if self.tiktok {
            Mode::Tiktok
        } else if self.twitter {
            Mode::Twitter
        } else if self.report {
            Mode::Report
        } else if self.clean {
            Mode::Clean
        } else {
            Mode::Full
        }
    }
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run a single agent once.
    Agent {
        /// capture, selector, vertical, quality, micro, coordinator or executive.
        kind: AgentKind,

        /// Sub-pipelines the coordinator runs: all, tiktok or twitter.
        #[arg(long, default_value = "all")]
        social_mode: SocialMode,
    },

    /// Write default agent configs and create every directory.
    Init {
        /// Overwrite existing config files.
        #[arg(long)]
        force: bool,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Show an agent's validated configuration.
    Show {
        agent: AgentKind,
    },
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "khive=info",
        1 => "khive=debug",
        _ => "khive=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let layout = Layout::new(&cli.root);
    let options = AgentOptions {
        seed: cli.seed,
        social_mode: SocialMode::default(),
    };

    match &cli.command {
        Some(Command::Agent { kind, social_mode }) => {
            let options = AgentOptions {
                social_mode: *social_mode,
                ..options
            };
            cmd_agent(&cli, &layout, *kind, options).await
        }
        Some(Command::Init { force }) => cmd_init(&layout, *force),
        Some(Command::Config {
            action: ConfigAction::Show { agent },
        }) => cmd_config_show(&layout, *agent),
        None => cmd_pipeline(&cli, &layout, cli.mode.mode(), options).await,
    }
}

fn runner(cli: &Cli, options: AgentOptions) -> Result<Box<dyn StageRunner>> {
    if cli.in_process {
        return Ok(Box::new(InProcessRunner::new(options)));
    }
    let mut args = vec!["--log-format".to_string(), cli.log_format.as_str().to_string()];
    if cli.verbose > 0 {
        args.push(format!("-{}", "v".repeat(cli.verbose as usize)));
    }
    Ok(Box::new(SubprocessRunner::current(options)?.with_args(args)))
}

async fn cmd_agent(cli: &Cli, layout: &Layout, kind: AgentKind, options: AgentOptions) -> Result<()> {
    let runner = runner(cli, options.clone())?;
    let outcome = run_agent(layout, kind, &options, None, runner.as_ref()).await?;
    if !outcome.success {
        return Err(eyre!("{kind} failed: {}", outcome.summary));
    }
    Ok(())
}

async fn cmd_pipeline(cli: &Cli, layout: &Layout, mode: Mode, options: AgentOptions) -> Result<()> {
    let runner = runner(cli, options)?;
    let progress = CliProgress::new(orchestrator::plan(mode).len());
    let run = match orchestrator::run(layout, mode, runner.as_ref(), &progress).await {
        Ok(run) => run,
        Err(e) => {
            progress.bar.abandon();
            return Err(e.into());
        }
    };

    if mode == Mode::Clean {
        progress.bar.finish_and_clear();
        println!("  Working directories cleaned under {}", layout.root().display());
        return Ok(());
    }

    println!();
    for record in &run.records {
        let detail = record.error.as_deref().unwrap_or("");
        println!(
            "  {:<6} {:<8} {:>6.1}s  {detail}",
            record.agent.dir_name(),
            record.state.as_str(),
            record.duration.as_secs_f64()
        );
    }
    println!("  Time:  {:.1}s", run.elapsed.as_secs_f64());
    println!();

    if run.success() {
        Ok(())
    } else {
        let failed: Vec<String> = run
            .failed()
            .map(|r| format!("{} ({})", r.agent.dir_name(), r.state))
            .collect();
        Err(eyre!("{mode} pipeline incomplete: {}", failed.join(", ")))
    }
}

fn cmd_init(layout: &Layout, force: bool) -> Result<()> {
    let report = layout.write_default_configs(force)?;
    info!(
        root = %layout.root().display(),
        written = report.written.len(),
        kept = report.kept.len(),
        "initialised pipeline root"
    );
    for path in &report.written {
        println!("  wrote {}", path.display());
    }
    for path in &report.kept {
        println!("  kept  {} (use --force to overwrite)", path.display());
    }
    Ok(())
}

fn cmd_config_show(layout: &Layout, agent: AgentKind) -> Result<()> {
    let config = layout.load(agent)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Stage progress bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new(stages: usize) -> Self {
        let bar = ProgressBar::new(stages as u64);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{pos}/{len}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }
}

impl PipelineObserver for CliProgress {
    fn stage_started(&self, agent: AgentKind, _index: usize, _total: usize) {
        self.bar.set_message(format!("{agent} running"));
    }

    fn stage_finished(&self, record: &StageRecord) {
        self.bar.inc(1);
        if record.state != StageState::Done {
            self.bar
                .println(format!("  {} {}", record.agent, record.state));
        }
    }

    fn finished(&self, _run: &PipelineRun) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn mode_defaults_to_full() {
        let cli = Cli::parse_from(["khive"]);
        assert_eq!(cli.mode.mode(), Mode::Full);
        let cli = Cli::parse_from(["khive", "--twitter", "--seed", "3"]);
        assert_eq!(cli.mode.mode(), Mode::Twitter);
        assert_eq!(cli.seed, Some(3));
    }

    #[test]
    fn modes_are_exclusive() {
        assert!(Cli::try_parse_from(["khive", "--full", "--clean"]).is_err());
    }

    #[test]
    fn agent_accepts_original_names() {
        let cli = Cli::parse_from(["khive", "agent", "LEA", "--root", "/tmp/k"]);
        match cli.command {
            Some(Command::Agent { kind, social_mode }) => {
                assert_eq!(kind, AgentKind::Quality);
                assert_eq!(social_mode, SocialMode::All);
            }
            _ => panic!("expected agent command"),
        }
        assert_eq!(cli.root, PathBuf::from("/tmp/k"));
    }
}
