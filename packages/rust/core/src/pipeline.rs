//! Stage engine shared by the orchestrator and the coordinator.
//!
//! A plan is an ordered list of [`Stage`]s. Each stage pulls its inbound
//! files from upstream directories, then runs its agent through a
//! [`StageRunner`]. A stage whose dependencies did not finish is skipped.
//!
//! The last stage to read an upstream file moves it, so a file is processed
//! once however often the plan is rerun.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use khive_media::MediaTool;
use khive_shared::{AgentKind, DirRole, KhiveError, Result};
use khive_storage::{FilePattern, Layout, bootstrap, copy_files, move_files};
use uuid::Uuid;

use crate::agent::{AgentOptions, run_agent};

/// How a transfer hands files over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// The upstream directory keeps its files; a later stage may read them too.
    Copy,
    /// The files leave the upstream directory, so a rerun never sees them again.
    Move,
}

/// Bring files matching `pattern` from an upstream agent's directory into
/// the stage's input.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub from: AgentKind,
    pub role: DirRole,
    pub pattern: FilePattern,
    pub mode: TransferMode,
}

#[derive(Debug, Clone)]
pub struct Stage {
    pub agent: AgentKind,
    /// Stages that must be `Done` first. Needs outside the plan are ignored.
    pub needs: Vec<AgentKind>,
    pub inbound: Vec<Transfer>,
}

impl Stage {
    pub fn new(agent: AgentKind) -> Self {
        Self {
            agent,
            needs: Vec::new(),
            inbound: Vec::new(),
        }
    }

    pub fn needs(mut self, agent: AgentKind) -> Self {
        self.needs.push(agent);
        self
    }

    /// Copy `pattern` from `from`'s `role` directory. Implies a need on `from`.
    pub fn pull(self, from: AgentKind, role: DirRole, pattern: &str) -> Self {
        self.transfer(from, role, pattern, TransferMode::Copy)
    }

    /// Move `pattern` out of `from`'s `role` directory. Implies a need on `from`.
    pub fn take(self, from: AgentKind, role: DirRole, pattern: &str) -> Self {
        self.transfer(from, role, pattern, TransferMode::Move)
    }

    pub fn transfer(mut self, from: AgentKind, role: DirRole, pattern: &str, mode: TransferMode) -> Self {
        if !self.needs.contains(&from) {
            self.needs.push(from);
        }
        self.inbound.push(Transfer {
            from,
            role,
            pattern: FilePattern::new(pattern),
            mode,
        });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
}

impl StageState {
    pub fn can_become(self, next: StageState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Skipped)
                | (Self::Running, Self::Done)
                | (Self::Running, Self::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct StageRecord {
    pub agent: AgentKind,
    pub state: StageState,
    pub duration: Duration,
    /// Failure message, or the reason for a skip.
    pub error: Option<String>,
}

impl StageRecord {
    fn pending(agent: AgentKind) -> Self {
        Self {
            agent,
            state: StageState::Pending,
            duration: Duration::ZERO,
            error: None,
        }
    }

    pub fn transition(&mut self, next: StageState) -> Result<()> {
        if !self.state.can_become(next) {
            return Err(KhiveError::stage(
                self.agent.dir_name(),
                format!("invalid transition {} -> {next}", self.state),
            ));
        }
        self.state = next;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub records: Vec<StageRecord>,
    pub elapsed: Duration,
}

impl PipelineRun {
    /// True only when every stage is `Done`.
    pub fn success(&self) -> bool {
        self.records.iter().all(|r| r.state == StageState::Done)
    }

    pub fn failed(&self) -> impl Iterator<Item = &StageRecord> {
        self.records.iter().filter(|r| r.state != StageState::Done)
    }
}

/// Runs one agent to completion. An `Err` marks the stage `Failed`.
#[async_trait]
pub trait StageRunner: Send + Sync {
    async fn run_stage(&self, layout: &Layout, agent: AgentKind) -> Result<()>;
}

/// One child process per stage: `khive agent <name> --root <root>`.
#[derive(Debug, Clone)]
pub struct SubprocessRunner {
    program: PathBuf,
    options: AgentOptions,
    /// Global flags forwarded to every child, e.g. `--log-format json`.
    extra_args: Vec<OsString>,
}

impl SubprocessRunner {
    pub fn new(program: impl Into<PathBuf>, options: AgentOptions) -> Self {
        Self {
            program: program.into(),
            options,
            extra_args: Vec::new(),
        }
    }

    /// Re-invoke the running executable.
    pub fn current(options: AgentOptions) -> Result<Self> {
        let exe = std::env::current_exe().map_err(|e| KhiveError::io("current_exe", e))?;
        Ok(Self::new(exe, options))
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    fn args(&self, layout: &Layout, agent: AgentKind) -> Vec<OsString> {
        let mut args = self.extra_args.clone();
        args.push("agent".into());
        args.push(agent.cli_name().into());
        args.push("--root".into());
        args.push(layout.root().as_os_str().to_owned());
        if let Some(seed) = self.options.seed {
            args.push("--seed".into());
            args.push(seed.to_string().into());
        }
        if agent == AgentKind::Coordinator {
            args.push("--social-mode".into());
            args.push(self.options.social_mode.as_str().into());
        }
        args
    }
}

#[async_trait]
impl StageRunner for SubprocessRunner {
    async fn run_stage(&self, layout: &Layout, agent: AgentKind) -> Result<()> {
        let status = tokio::process::Command::new(&self.program)
            .args(self.args(layout, agent))
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| KhiveError::io(&self.program, e))?;

        if status.success() {
            Ok(())
        } else {
            Err(KhiveError::stage(
                agent.dir_name(),
                match status.code() {
                    Some(code) => format!("agent exited with code {code}"),
                    None => "agent terminated by signal".to_string(),
                },
            ))
        }
    }
}

/// Runs agents inside this process on blocking tasks.
#[derive(Clone, Default)]
pub struct InProcessRunner {
    pub options: AgentOptions,
    /// Overrides the ffmpeg tool; tests pass a scripted one.
    pub media: Option<Arc<dyn MediaTool>>,
}

impl InProcessRunner {
    pub fn new(options: AgentOptions) -> Self {
        Self {
            options,
            media: None,
        }
    }

    pub fn with_media(mut self, media: Arc<dyn MediaTool>) -> Self {
        self.media = Some(media);
        self
    }
}

#[async_trait]
impl StageRunner for InProcessRunner {
    async fn run_stage(&self, layout: &Layout, agent: AgentKind) -> Result<()> {
        let outcome = run_agent(layout, agent, &self.options, self.media.clone(), self).await?;
        if outcome.success {
            Ok(())
        } else {
            Err(KhiveError::stage(agent.dir_name(), outcome.summary))
        }
    }
}

/// Progress callbacks for a plan run.
pub trait PipelineObserver: Send + Sync {
    fn stage_started(&self, agent: AgentKind, index: usize, total: usize);
    fn stage_finished(&self, record: &StageRecord);
    fn finished(&self, run: &PipelineRun);
}

/// No-op observer for headless/test usage.
pub struct SilentObserver;

impl PipelineObserver for SilentObserver {
    fn stage_started(&self, _agent: AgentKind, _index: usize, _total: usize) {}
    fn stage_finished(&self, _record: &StageRecord) {}
    fn finished(&self, _run: &PipelineRun) {}
}

/// Resolves on ctrl-c, or SIGTERM on unix. Never resolves if the handlers
/// cannot be installed.
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn pull_inbound(layout: &Layout, stage: &Stage) -> Result<usize> {
    if stage.inbound.is_empty() {
        return Ok(0);
    }
    let layout = layout.clone();
    let stage = stage.clone();
    let agent = stage.agent;
    tokio::task::spawn_blocking(move || {
        let (_, target_dirs) = layout.open(stage.agent)?;
        let input = target_dirs.require(DirRole::Input)?;
        bootstrap(&[input])?;

        let run_id = Uuid::now_v7().simple().to_string();
        let mut pulled = 0;
        for transfer in &stage.inbound {
            let (_, source_dirs) = layout.open(transfer.from)?;
            let source = source_dirs.require(transfer.role)?;
            pulled += match transfer.mode {
                TransferMode::Copy => copy_files(source, input, &transfer.pattern)?,
                TransferMode::Move => move_files(source, input, &transfer.pattern, &run_id)?,
            };
        }
        Ok(pulled)
    })
    .await
    .map_err(|e| KhiveError::stage(agent.dir_name(), format!("transfer task failed: {e}")))?
}

async fn run_one(layout: &Layout, stage: &Stage, runner: &dyn StageRunner) -> Result<()> {
    let pulled = pull_inbound(layout, stage).await?;
    if pulled > 0 {
        info!(agent = %stage.agent, files = pulled, "inbound transfer done");
    }
    runner.run_stage(layout, stage.agent).await
}

/// Run `plan` in order. Returns `Err(Cancelled)` on ctrl-c/SIGTERM; stage
/// failures are reported in the returned [`PipelineRun`].
pub async fn execute_plan(
    layout: &Layout,
    plan: &[Stage],
    runner: &dyn StageRunner,
    observer: &dyn PipelineObserver,
) -> Result<PipelineRun> {
    execute_plan_until(layout, plan, runner, observer, shutdown_signal()).await
}

/// [`execute_plan`], stopping with `Err(Cancelled)` once `shutdown` resolves.
/// The running stage's future is dropped, which kills a child agent.
#[instrument(skip_all, fields(root = %layout.root().display(), stages = plan.len()))]
pub async fn execute_plan_until(
    layout: &Layout,
    plan: &[Stage],
    runner: &dyn StageRunner,
    observer: &dyn PipelineObserver,
    shutdown: impl Future<Output = ()>,
) -> Result<PipelineRun> {
    let start = Instant::now();
    let mut records: Vec<StageRecord> = plan.iter().map(|s| StageRecord::pending(s.agent)).collect();

    tokio::pin!(shutdown);

    for (index, stage) in plan.iter().enumerate() {
        let blocked = stage.needs.iter().find_map(|need| {
            records
                .iter()
                .find(|r| r.agent == *need && r.state != StageState::Done)
                .map(|r| (r.agent, r.state))
        });

        if let Some((dependency, state)) = blocked {
            let record = &mut records[index];
            record.transition(StageState::Skipped)?;
            record.error = Some(format!("dependency {dependency} is {state}"));
            warn!(agent = %stage.agent, dependency = %dependency, "stage skipped");
            observer.stage_finished(record);
            continue;
        }

        observer.stage_started(stage.agent, index, plan.len());
        records[index].transition(StageState::Running)?;
        let started = Instant::now();

        let result = tokio::select! {
            result = run_one(layout, stage, runner) => result,
            _ = &mut shutdown => {
                warn!(agent = %stage.agent, "interrupted, stopping pipeline");
                return Err(KhiveError::Cancelled);
            }
        };

        let record = &mut records[index];
        record.duration = started.elapsed();
        match result {
            Ok(()) => {
                record.transition(StageState::Done)?;
                info!(agent = %stage.agent, elapsed_ms = record.duration.as_millis() as u64, "stage done");
            }
            Err(e) => {
                record.transition(StageState::Failed)?;
                warn!(agent = %stage.agent, error = %e, "stage failed");
                record.error = Some(e.to_string());
            }
        }
        observer.stage_finished(record);
    }

    let run = PipelineRun {
        records,
        elapsed: start.elapsed(),
    };
    observer.finished(&run);
    Ok(run)
}
