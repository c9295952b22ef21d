//! motec-ci - run the repository's CI workflow locally
//!
//! ## Commands
//!
//! - `run`: execute the workflow for a push or pull request event
//! - `plan`: show the steps a trigger would execute
//! - `validate`: check that a workflow only uses supported actions

mod telemetry;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use motec_ci::{
    Orchestrator, RunGate, RunOutcome, RunPlan, RunnerConfig, Trigger, TriggerEvent, Workflow,
    DEFAULT_WORKFLOW_PATH,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "motec-ci")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run the motec CI workflow locally", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the workflow for a trigger event
    ///
    /// Runs started by any motec-ci process sharing the lock directory obey
    /// the workflow's concurrency groups together: a newer run on the same
    /// ref supersedes a waiting one and, with cancel-in-progress, cancels the
    /// active one.
    Run {
        #[command(flatten)]
        target: TargetArgs,

        /// Directory holding the keyed build caches
        #[arg(long, env = "MOTEC_CI_CACHE_DIR")]
        cache_dir: Option<PathBuf>,

        /// Directory coordinating concurrency groups between processes
        /// (default: <cache-dir>/groups)
        #[arg(long, env = "MOTEC_CI_LOCK_DIR")]
        lock_dir: Option<PathBuf>,

        /// Parent directory for per-run working directories
        #[arg(long, env = "MOTEC_CI_WORK_DIR")]
        work_root: Option<PathBuf>,

        /// Timeout for steps that do not set one, in seconds (0 = none)
        #[arg(long, env = "MOTEC_CI_STEP_TIMEOUT", default_value_t = 0)]
        step_timeout: u64,

        /// Delay before the first retry of a network step, in milliseconds
        #[arg(long, default_value_t = 1_000)]
        backoff_ms: u64,

        /// Keep the run's working directory
        #[arg(long)]
        keep_workdir: bool,

        /// Write the run report as JSON to this file ("-" for stdout; the
        /// summary then goes to stderr)
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Show the steps a trigger would execute
    Plan {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Check a workflow file
    Validate {
        /// Workflow file
        #[arg(default_value = DEFAULT_WORKFLOW_PATH)]
        workflow: PathBuf,
    },
}

#[derive(Args, Clone)]
struct TargetArgs {
    /// Repository to check out from
    #[arg(long, default_value = ".")]
    source: PathBuf,

    /// Workflow file (default: <source>/.github/workflows/ci.yml)
    #[arg(long)]
    workflow: Option<PathBuf>,

    /// Trigger event: push or pull_request
    #[arg(long, default_value = "push")]
    event: String,

    /// Ref the event happened on (default: the source's current branch)
    #[arg(long = "ref")]
    git_ref: Option<String>,

    /// Commit to evaluate (default: the source's HEAD)
    #[arg(long)]
    sha: Option<String>,

    /// Pull request source branch (default: the source's current branch)
    #[arg(long)]
    head_ref: Option<String>,

    /// Job to run when the workflow has several
    #[arg(long)]
    job: Option<String>,
}

impl TargetArgs {
    fn workflow_path(&self) -> PathBuf {
        self.workflow
            .clone()
            .unwrap_or_else(|| self.source.join(DEFAULT_WORKFLOW_PATH))
    }

    fn load(&self) -> Result<(Workflow, Trigger)> {
        let path = self.workflow_path();
        let workflow = Workflow::load(&path)
            .with_context(|| format!("Failed to load workflow {}", path.display()))?;
        let trigger = build_trigger(self, &self.source)?;
        Ok((workflow, trigger))
    }

    fn plan(&self, workflow: &Workflow, trigger: &Trigger) -> Result<RunPlan> {
        let plan = match &self.job {
            Some(job) => workflow.plan_job(trigger, job)?,
            None => workflow.plan(trigger)?,
        };
        Ok(plan)
    }
}

fn git_output(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).current_dir(dir).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn build_trigger(args: &TargetArgs, source: &Path) -> Result<Trigger> {
    let event: TriggerEvent = args.event.parse()?;

    let sha = match &args.sha {
        Some(sha) => sha.clone(),
        None => git_output(source, &["rev-parse", "HEAD"])
            .context("No --sha given and the source has no HEAD commit")?,
    };
    let git_ref = args
        .git_ref
        .clone()
        .or_else(|| git_output(source, &["symbolic-ref", "-q", "HEAD"]))
        .unwrap_or_else(|| "HEAD".to_string());

    Ok(match event {
        TriggerEvent::Push => Trigger::push(git_ref, sha),
        TriggerEvent::PullRequest => {
            let head_ref = args
                .head_ref
                .clone()
                .or_else(|| git_ref.strip_prefix("refs/heads/").map(str::to_string))
                .context("Pull request runs need --head-ref")?;
            Trigger::pull_request(git_ref, head_ref, sha)
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            target,
            cache_dir,
            lock_dir,
            work_root,
            step_timeout,
            backoff_ms,
            keep_workdir,
            report,
        } => {
            let mut config = RunnerConfig::default().with_source(&target.source);
            if let Some(cache_dir) = cache_dir {
                config = config.with_cache_dir(cache_dir);
            }
            let lock_dir = lock_dir.unwrap_or_else(|| config.cache_dir.join("groups"));
            config = config.with_lock_dir(lock_dir);
            if let Some(work_root) = work_root {
                config = config.with_work_root(work_root);
            }
            config.step_timeout_secs = step_timeout;
            config.keep_workdir = keep_workdir;
            config.backoff_base_ms = backoff_ms;

            let code = cmd_run(&target, config, report.as_deref()).await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Commands::Plan { target } => cmd_plan(&target, cli.json),
        Commands::Validate { workflow } => cmd_validate(&workflow),
    }
}

fn report_on_stdout(report: Option<&Path>) -> bool {
    report == Some(Path::new("-"))
}

/// Execute the workflow; returns the process exit code.
async fn cmd_run(target: &TargetArgs, config: RunnerConfig, report: Option<&Path>) -> Result<i32> {
    let (workflow, trigger) = target.load()?;
    let plan = target
        .plan(&workflow, &trigger)?
        .with_backoff(config.backoff_base_ms, config.backoff_max_ms);

    // stdout carries only the JSON report when it is written there.
    let mut out: Box<dyn Write> = if report_on_stdout(report) {
        Box::new(std::io::stderr())
    } else {
        Box::new(std::io::stdout())
    };

    writeln!(
        out,
        "Running {} for {} {}",
        plan.workflow, trigger.event, trigger.git_ref
    )?;
    writeln!(out, "Commit: {}", trigger.sha)?;
    writeln!(out)?;

    let orchestrator = Orchestrator::new(config);
    let outcome = orchestrator
        .run_plan(plan)
        .await
        .context("Run failed to execute")?;
    let events = orchestrator.ledger().get_events(&outcome.run_id).await?;
    let verdict = RunGate::evaluate(&events);

    print_outcome(&mut out, &outcome)?;
    if !verdict.violations.is_empty() {
        writeln!(out, "Violations:")?;
        for violation in &verdict.violations {
            writeln!(out, "  - {}", violation)?;
        }
    }
    out.flush()?;

    if let Some(path) = report {
        let json = outcome.to_json()?;
        if report_on_stdout(report) {
            println!("{}", json);
        } else {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write report {}", path.display()))?;
            info!(path = %path.display(), "Wrote run report");
        }
    }

    Ok(outcome.process_exit_code())
}

fn print_outcome(out: &mut dyn Write, outcome: &RunOutcome) -> std::io::Result<()> {
    writeln!(out, "Run ID: {}", outcome.run_id)?;
    writeln!(out, "Identity: {}", outcome.identity)?;
    for step in &outcome.steps {
        let mark = if step.passed() { "✓" } else { "✗" };
        let retries = if step.attempts > 1 {
            format!(", {} attempts", step.attempts)
        } else {
            String::new()
        };
        writeln!(
            out,
            "  {} {} ({}ms, exit code: {}{})",
            mark, step.step_name, step.duration_ms, step.exit_code, retries
        )?;
    }
    for name in &outcome.skipped {
        writeln!(out, "  - {} (skipped)", name)?;
    }
    if let Some(failed) = outcome.failed_step() {
        writeln!(out)?;
        writeln!(out, "{} step '{}' failed:", failed.category, failed.step_name)?;
        writeln!(out, "{}", failed.output_tail(40))?;
    }
    if let Some(workdir) = &outcome.workdir {
        writeln!(out, "Working directory: {}", workdir.display())?;
    }
    writeln!(out)?;
    writeln!(
        out,
        "Status: {} ({}/{} steps passed, {}ms)",
        outcome.status,
        outcome.passed_count(),
        outcome.steps.len() + outcome.skipped.len(),
        outcome.duration_ms
    )
}

fn cmd_plan(target: &TargetArgs, json: bool) -> Result<()> {
    let (workflow, trigger) = target.load()?;
    let plan = target.plan(&workflow, &trigger)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("Workflow: {} (job {})", plan.workflow, plan.job);
    println!("Trigger: {} {} @ {}", trigger.event, trigger.git_ref, trigger.sha);
    match &plan.group {
        Some(group) => println!(
            "Concurrency group: {}{}",
            group,
            if plan.cancel_in_progress {
                " (cancels in-progress runs)"
            } else {
                ""
            }
        ),
        None => println!("Concurrency group: none"),
    }
    for (key, value) in &plan.env {
        println!("  env {}={}", key, value);
    }
    for (i, step) in plan.steps.iter().enumerate() {
        let retries = if step.retry.max_retries > 0 {
            format!(" [retries: {}]", step.retry.max_retries)
        } else {
            String::new()
        };
        println!(
            "{:>3}. {} - {}{}",
            i + 1,
            step.name,
            step.kind.describe(),
            retries
        );
    }
    Ok(())
}

fn cmd_validate(path: &Path) -> Result<()> {
    let workflow = Workflow::load(path)
        .with_context(|| format!("Failed to load workflow {}", path.display()))?;
    workflow.validate()?;
    let steps: usize = workflow.jobs.values().map(|j| j.steps.len()).sum();
    println!(
        "✓ {} is valid ({} job(s), {} step(s), triggers: {})",
        path.display(),
        workflow.jobs.len(),
        steps,
        workflow.on.events().join(", ")
    );
    Ok(())
}
