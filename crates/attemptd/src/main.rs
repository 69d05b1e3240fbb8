use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use attempt_core::config::{load_sync_config_or_default, SyncConfig};
use attempt_core::state::GitActionKind;
use attempt_core::types::{
    is_attempt_running, ExecutionProcess, ExecutionProcessId, ExecutionProcessRepoState, RepoId,
    RepoBranchStatus, WorkspaceId,
};
use attempt_core::validation::{Validate, ValidationIssue, ValidationLevel};
use attempt_git::{
    BranchStatusSource, LocalRepoBinding, LocalStatusReader, ScriptedGitOps, StatusGit,
};
use attemptd::{
    aggregate_selected, build_resolution_instructions, conflicted_repos, evaluate_gates,
    load_restore_inputs, ActivePulses, ConflictController, ConflictSnapshot, GateInput,
    InFlightFlags, RestoreSession,
};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "config/attempt-sync.toml";

#[derive(Debug, Parser)]
#[command(
    name = "attempt-sync",
    version,
    about = "Inspect git action gates, conflicts and restore plans for task attempts"
)]
struct Cli {
    /// Sets the level of verbosity (can be used multiple times)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Label, conflict display and timing configuration
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH, global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Evaluate the merge, push, rebase and change-target controls
    Gates(GatesArgs),
    /// Show conflict banners and default resolution instructions
    Conflicts(ConflictsArgs),
    /// Assess restoring the attempt to the start of a process
    RestorePlan(RestorePlanArgs),
    /// Read branch status of a local worktree with the git CLI
    Status(StatusArgs),
    /// Validate the configuration file
    CheckConfig,
}

#[derive(Debug, Args)]
struct GatesArgs {
    /// JSON array of repository branch statuses
    #[arg(long, value_name = "PATH")]
    status: PathBuf,
    /// Selected repository; defaults to the first one
    #[arg(long)]
    repo: Option<String>,
    /// JSON array of execution processes, used to detect a running attempt
    #[arg(long, value_name = "PATH")]
    processes: Option<PathBuf>,
    /// Actions currently in flight for the repository
    #[arg(long = "in-flight", value_parser = parse_action)]
    in_flight: Vec<GitActionKind>,
    /// Actions whose success window is still open
    #[arg(long = "pulse", value_parser = parse_action)]
    pulses: Vec<GitActionKind>,
}

#[derive(Debug, Args)]
struct ConflictsArgs {
    #[arg(long, value_name = "PATH")]
    status: PathBuf,
    /// Branch of the attempt, used in resolution instructions
    #[arg(long, default_value = "HEAD")]
    attempt_branch: String,
}

#[derive(Debug, Args)]
struct RestorePlanArgs {
    #[arg(long, default_value = "cli")]
    workspace: String,
    /// Process whose start is the restore point
    #[arg(long)]
    target: String,
    #[arg(long, value_name = "PATH")]
    processes: PathBuf,
    /// JSON array of checkpoints recorded for the target process
    #[arg(long, value_name = "PATH")]
    states: PathBuf,
    #[arg(long, value_name = "PATH")]
    status: PathBuf,
    #[arg(long)]
    worktree_reset: bool,
    #[arg(long)]
    acknowledge: bool,
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Args)]
struct StatusArgs {
    #[arg(long, value_name = "PATH")]
    worktree: PathBuf,
    #[arg(long)]
    target: String,
    /// Defaults to the worktree directory name
    #[arg(long)]
    repo_id: Option<String>,
    #[arg(long, default_value = "git")]
    git: PathBuf,
}

#[derive(Debug, Serialize)]
struct ConflictReport {
    #[serde(flatten)]
    snapshot: ConflictSnapshot,
    instructions: String,
}

#[derive(Debug, Serialize)]
struct RestoreReport {
    #[serde(flatten)]
    session: RestoreSession,
    confirm_disabled: bool,
    decision: Option<attemptd::RestoreDecision>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        eprintln!("attempt-sync failed: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_sync_config_or_default(&cli.config)
        .with_context(|| format!("failed to load config at {}", cli.config.display()))?;

    match cli.command {
        CliCommand::CheckConfig => check_config(&config),
        CliCommand::Gates(args) => {
            ensure_valid_config(&config.validate())?;
            run_gates(&config, args)
        }
        CliCommand::Conflicts(args) => {
            ensure_valid_config(&config.validate())?;
            run_conflicts(&config, args)
        }
        CliCommand::RestorePlan(args) => run_restore_plan(args).await,
        CliCommand::Status(args) => run_status(args).await,
    }
}

fn check_config(config: &SyncConfig) -> Result<()> {
    let issues = config.validate();
    print_json(&issues)?;
    ensure_valid_config(&issues)
}

fn ensure_valid_config(issues: &[ValidationIssue]) -> Result<()> {
    let errors = issues
        .iter()
        .filter(|issue| issue.level == ValidationLevel::Error)
        .map(|issue| format!("{}: {}", issue.code, issue.message))
        .collect::<Vec<_>>();

    if errors.is_empty() {
        return Ok(());
    }
    bail!("config validation failed ({})", errors.join("; "))
}

fn run_gates(config: &SyncConfig, args: GatesArgs) -> Result<()> {
    let statuses: Vec<RepoBranchStatus> = read_json(&args.status)?;
    warn_on_status_issues(&statuses);

    let selected = args.repo.map(RepoId::new);
    let Some(status) = aggregate_selected(&statuses, selected.as_ref()) else {
        bail!("status file {} lists no repositories", args.status.display());
    };

    let attempt_running = match &args.processes {
        Some(path) => is_attempt_running(&read_json::<Vec<ExecutionProcess>>(path)?),
        None => false,
    };
    let mut in_flight = InFlightFlags::default();
    for action in args.in_flight {
        in_flight.set(action, true);
    }
    let pulses = args.pulses.into_iter().collect::<ActivePulses>();

    let gates = evaluate_gates(
        &GateInput {
            status: &status,
            attempt_running,
            in_flight,
            pulses: &pulses,
        },
        &config.labels,
    );
    print_json(&serde_json::json!({
        "repo_id": status.repo_id,
        "gates": gates,
    }))
}

fn run_conflicts(config: &SyncConfig, args: ConflictsArgs) -> Result<()> {
    let statuses: Vec<RepoBranchStatus> = read_json(&args.status)?;
    warn_on_status_issues(&statuses);

    let reports = conflicted_repos(&statuses)
        .into_iter()
        .map(|status| {
            let instructions = build_resolution_instructions(
                status.conflict_op,
                &args.attempt_branch,
                &status.status.target_branch_name,
                &status.status.conflicted_files,
                (statuses.len() > 1).then_some(status.repo_name.as_str()),
            );
            let mut controller =
                ConflictController::new(status.repo_id.clone(), status.repo_name.clone());
            controller.observe(&status);
            ConflictReport {
                snapshot: controller.snapshot(Some(&instructions), &config.conflict),
                instructions,
            }
        })
        .collect::<Vec<_>>();
    print_json(&reports)
}

async fn run_restore_plan(args: RestorePlanArgs) -> Result<()> {
    let workspace = WorkspaceId::new(args.workspace);
    let target = ExecutionProcessId::new(args.target);
    let processes: Vec<ExecutionProcess> = read_json(&args.processes)?;
    let states: Vec<ExecutionProcessRepoState> = read_json(&args.states)?;
    let statuses: Vec<RepoBranchStatus> = read_json(&args.status)?;

    let fixtures = ScriptedGitOps::new();
    fixtures.set_processes(&workspace, processes);
    fixtures.set_repo_states(&target, states);
    fixtures.set_statuses(&workspace, statuses);

    let mut session = RestoreSession::loading(target, args.worktree_reset);
    load_restore_inputs(&fixtures, &fixtures, &workspace, &mut session)
        .await
        .context("failed to load restore inputs")?;

    session.set_acknowledge_uncommitted(args.acknowledge);
    if args.force {
        session.set_force_reset(true);
    }

    print_json(&RestoreReport {
        confirm_disabled: session.is_confirm_disabled(),
        decision: session.confirm(),
        session,
    })
}

async fn run_status(args: StatusArgs) -> Result<()> {
    let worktree = fs::canonicalize(&args.worktree)
        .with_context(|| format!("failed to resolve worktree {}", args.worktree.display()))?;
    let repo_id = args.repo_id.unwrap_or_else(|| {
        worktree
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "repo".to_string())
    });

    let reader = LocalStatusReader::new(
        StatusGit::new(args.git),
        vec![LocalRepoBinding {
            repo_id: RepoId::new(repo_id.clone()),
            repo_name: repo_id,
            worktree_path: worktree,
            target_branch: args.target,
            merges: Vec::new(),
        }],
    );
    let statuses = reader
        .branch_status(&WorkspaceId::new("local"))
        .await
        .context("failed to read branch status")?;
    warn_on_status_issues(&statuses);
    print_json(&statuses)
}

fn warn_on_status_issues(statuses: &[RepoBranchStatus]) {
    for status in statuses {
        for issue in status.validate() {
            tracing::warn!(repo = %status.repo_id, code = issue.code, "{}", issue.message);
        }
    }
}

fn parse_action(value: &str) -> Result<GitActionKind, String> {
    match value.trim().to_lowercase().replace('-', "_").as_str() {
        "merge" => Ok(GitActionKind::Merge),
        "push" => Ok(GitActionKind::Push),
        "create_pr" => Ok(GitActionKind::CreatePr),
        "rebase" => Ok(GitActionKind::Rebase),
        "change_target_branch" | "change_target" => Ok(GitActionKind::ChangeTargetBranch),
        "abort_conflicts" | "abort" => Ok(GitActionKind::AbortConflicts),
        other => Err(format!(
            "invalid action '{other}'. valid values: merge, push, create-pr, rebase, change-target-branch, abort-conflicts"
        )),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{rendered}");
    Ok(())
}
