use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use guardrail_engine::{
    AutoApproveConfirmer, Collaborators, Confirmer, ConsoleConfirmer, DenyConfirmer,
    EMERGENCY_STOP_FILE_NAME, EngineConfig, IntegrityVerifier, NoopSyntaxChecker, OperationKind,
    OperationOptions, OperationOutcome, OperationRunner, OperationSafetyController, OutcomeStatus,
    RepoState, RepoStateProvider, RollbackEngine, RollbackPlan, SnapshotMetadata, SnapshotStore,
    Verdict, VerificationLevel,
};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "guardrail")]
#[command(about = "Snapshot-protected runner for destructive quality commands")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run an external command under risk gating, snapshot, and verification.
    Run(RunArgs),
    /// List snapshots for a target root, newest first.
    List(ListArgs),
    /// Delete old snapshots, keeping bases of retained differentials.
    Prune(PruneArgs),
    /// Delete one snapshot; refused while a differential depends on it.
    Delete(DeleteArgs),
    /// Restore files from a snapshot.
    Rollback(RollbackArgs),
    /// Verify the working tree against a snapshot baseline.
    Verify(VerifyArgs),
    /// Place the emergency stop marker; further runs are refused.
    Stop(RootArg),
    /// Remove the emergency stop marker.
    Resume(RootArg),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    #[arg(long, default_value = ".")]
    root: PathBuf,
    #[arg(long, value_enum)]
    operation: OperationArg,
    /// Program to run inside the target root.
    #[arg(long)]
    cmd: String,
    /// Arguments passed to the program before the target paths.
    #[arg(long = "cmd-arg")]
    cmd_args: Vec<String>,
    /// Target paths, relative to the root. Appended to the command line.
    #[arg(required = true)]
    paths: Vec<PathBuf>,
    /// Skip the confirmation gate.
    #[arg(long, action = ArgAction::SetTrue)]
    yes: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    skip_snapshot: bool,
    /// Take a differential snapshot against this base instead of a full one.
    #[arg(long)]
    differential_base: Option<String>,
    #[arg(long, value_enum, default_value_t = LevelArg::Standard)]
    verification_level: LevelArg,
    #[arg(long, value_enum, default_value_t = ConfirmerMode::Auto)]
    confirmer: ConfirmerMode,
}

#[derive(clap::Args, Debug)]
struct ListArgs {
    #[arg(long, default_value = ".")]
    root: PathBuf,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(clap::Args, Debug)]
struct PruneArgs {
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// How many recent snapshots to keep.
    #[arg(long)]
    retain: Option<usize>,
    /// Delete snapshots older than this many days instead of counting.
    #[arg(long)]
    max_age_days: Option<u64>,
}

#[derive(clap::Args, Debug)]
struct DeleteArgs {
    #[arg(long, default_value = ".")]
    root: PathBuf,
    #[arg(long)]
    snapshot: String,
}

#[derive(clap::Args, Debug)]
struct RollbackArgs {
    #[arg(long, default_value = ".")]
    root: PathBuf,
    #[arg(long)]
    snapshot: String,
    /// Glob patterns for a selective rollback; omit for a full one.
    #[arg(long = "pattern")]
    patterns: Vec<String>,
    /// Overwrite files modified after the snapshot was taken.
    #[arg(long, action = ArgAction::SetTrue)]
    force: bool,
}

#[derive(clap::Args, Debug)]
struct VerifyArgs {
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// Baseline snapshot id; defaults to the newest snapshot.
    #[arg(long)]
    snapshot: Option<String>,
    #[arg(long, value_enum, default_value_t = LevelArg::Standard)]
    level: LevelArg,
}

#[derive(clap::Args, Debug)]
struct RootArg {
    #[arg(long, default_value = ".")]
    root: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OperationArg {
    Format,
    Cleanup,
    Dedupe,
    Verify,
}

impl From<OperationArg> for OperationKind {
    fn from(arg: OperationArg) -> Self {
        match arg {
            OperationArg::Format => OperationKind::Format,
            OperationArg::Cleanup => OperationKind::Cleanup,
            OperationArg::Dedupe => OperationKind::Dedupe,
            OperationArg::Verify => OperationKind::Verify,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LevelArg {
    Basic,
    Standard,
    Comprehensive,
}

impl From<LevelArg> for VerificationLevel {
    fn from(arg: LevelArg) -> Self {
        match arg {
            LevelArg::Basic => VerificationLevel::Basic,
            LevelArg::Standard => VerificationLevel::Standard,
            LevelArg::Comprehensive => VerificationLevel::Comprehensive,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ConfirmerMode {
    Auto,
    Console,
    Approve,
    Deny,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(args) => run_command(args).await,
        Commands::List(args) => list_command(args),
        Commands::Prune(args) => prune_command(args),
        Commands::Delete(args) => delete_command(args),
        Commands::Rollback(args) => rollback_command(args),
        Commands::Verify(args) => verify_command(args).await,
        Commands::Stop(args) => stop_command(args, true),
        Commands::Resume(args) => stop_command(args, false),
    };

    match result {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run_command(args: RunArgs) -> Result<ExitCode, String> {
    let root = canonical_root(&args.root)?;
    let config = EngineConfig::default();

    let controller = OperationSafetyController::new(
        &root,
        config,
        Collaborators {
            repo_state: Arc::new(GitRepoState),
            confirmer: build_confirmer(args.confirmer),
            runner: Arc::new(CommandRunner {
                root: root.clone(),
                program: args.cmd,
                args: args.cmd_args,
            }),
            syntax: Arc::new(NoopSyntaxChecker),
        },
    );

    let options = OperationOptions {
        pre_authorized: args.yes,
        skip_snapshot: args.skip_snapshot,
        differential_base: args.differential_base,
        verification_level: args.verification_level.into(),
    };
    let outcome = controller
        .run_protected(args.operation.into(), &args.paths, &options)
        .await
        .map_err(|error| error.to_string())?;

    print_outcome(&outcome);
    Ok(exit_code_for_outcome(&outcome))
}

fn list_command(args: ListArgs) -> Result<ExitCode, String> {
    let root = canonical_root(&args.root)?;
    let store = SnapshotStore::new(&root, &EngineConfig::default());
    let snapshots = store.list().map_err(|error| error.to_string())?;

    if args.json {
        let json = serde_json::to_string_pretty(&snapshots).map_err(|error| error.to_string())?;
        println!("{json}");
    } else if snapshots.is_empty() {
        println!("no snapshots under {}", store.snapshots_dir().display());
    } else {
        for snapshot in &snapshots {
            print_snapshot_line(snapshot);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn prune_command(args: PruneArgs) -> Result<ExitCode, String> {
    let root = canonical_root(&args.root)?;
    let config = EngineConfig::default();
    let retain = args.retain.unwrap_or(config.retain_count);
    let store = SnapshotStore::new(&root, &config);

    let removed = match args.max_age_days {
        Some(days) => store
            .prune_older_than(Duration::from_secs(days * 24 * 60 * 60))
            .map_err(|error| error.to_string())?,
        None => store.prune(retain).map_err(|error| error.to_string())?,
    };

    if removed.is_empty() {
        println!("nothing to prune");
    } else {
        for id in &removed {
            println!("removed: {id}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn delete_command(args: DeleteArgs) -> Result<ExitCode, String> {
    let root = canonical_root(&args.root)?;
    let store = SnapshotStore::new(&root, &EngineConfig::default());
    store
        .delete(&args.snapshot)
        .map_err(|error| error.to_string())?;
    println!("removed: {}", args.snapshot);
    Ok(ExitCode::SUCCESS)
}

fn rollback_command(args: RollbackArgs) -> Result<ExitCode, String> {
    let root = canonical_root(&args.root)?;
    let store = SnapshotStore::new(&root, &EngineConfig::default());
    let engine = RollbackEngine::new(store);

    let mut plan = if args.patterns.is_empty() {
        RollbackPlan::full(args.snapshot)
    } else {
        RollbackPlan::selective(args.snapshot, args.patterns)
    };
    plan.force_overwrite_newer = args.force;

    let result = engine.rollback(&plan).map_err(|error| error.to_string())?;
    println!("files_restored: {}", result.files_restored.len());
    for path in &result.files_restored {
        println!("  {path}");
    }
    if !result.files_skipped.is_empty() {
        println!("files_skipped (newer than snapshot): {}", result.files_skipped.len());
        for path in &result.files_skipped {
            println!("  {path}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn verify_command(args: VerifyArgs) -> Result<ExitCode, String> {
    let root = canonical_root(&args.root)?;
    let config = EngineConfig::default();
    let store = SnapshotStore::new(&root, &config);

    let baseline = match &args.snapshot {
        Some(id) => store.find(id).map_err(|error| error.to_string())?,
        None => store
            .list()
            .map_err(|error| error.to_string())?
            .into_iter()
            .next(),
    };
    if args.snapshot.is_some() && baseline.is_none() {
        return Err(format!(
            "snapshot not found: {}",
            args.snapshot.as_deref().unwrap_or_default()
        ));
    }

    let verifier = IntegrityVerifier::new(&config);
    let report = verifier
        .verify(&root, baseline.as_ref(), args.level.into(), &NoopSyntaxChecker)
        .await;

    for error in &report.errors {
        println!("error: {error}");
    }
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    let verdict = report.verdict();
    println!("verdict: {}", verdict_label(verdict));
    Ok(match verdict {
        Verdict::Failed => ExitCode::from(1),
        Verdict::Passed | Verdict::Warned => ExitCode::SUCCESS,
    })
}

fn stop_command(args: RootArg, engage: bool) -> Result<ExitCode, String> {
    let root = canonical_root(&args.root)?;
    let marker = root
        .join(&EngineConfig::default().reserved_dir)
        .join(EMERGENCY_STOP_FILE_NAME);

    if engage {
        if let Some(dir) = marker.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|error| format!("create '{}' failed: {error}", dir.display()))?;
        }
        std::fs::write(&marker, b"")
            .map_err(|error| format!("write '{}' failed: {error}", marker.display()))?;
        println!("emergency stop engaged: {}", marker.display());
    } else {
        match std::fs::remove_file(&marker) {
            Ok(()) => println!("emergency stop cleared"),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                println!("emergency stop was not engaged");
            }
            Err(error) => {
                return Err(format!("remove '{}' failed: {error}", marker.display()));
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn canonical_root(root: &Path) -> Result<PathBuf, String> {
    root.canonicalize()
        .map_err(|error| format!("cannot resolve root '{}': {error}", root.display()))
}

fn build_confirmer(mode: ConfirmerMode) -> Arc<dyn Confirmer> {
    match mode {
        ConfirmerMode::Auto => {
            if is_interactive_terminal() {
                Arc::new(ConsoleConfirmer)
            } else {
                // Non-interactive runs must opt in with --yes.
                Arc::new(DenyConfirmer)
            }
        }
        ConfirmerMode::Console => Arc::new(ConsoleConfirmer),
        ConfirmerMode::Approve => Arc::new(AutoApproveConfirmer),
        ConfirmerMode::Deny => Arc::new(DenyConfirmer),
    }
}

/// Repo state read through libgit2. A root outside any repository yields
/// the default state rather than an error.
struct GitRepoState;

#[async_trait::async_trait]
impl RepoStateProvider for GitRepoState {
    async fn repo_state(&self, target_root: &Path) -> RepoState {
        let repo = match git2::Repository::discover(target_root) {
            Ok(repo) => repo,
            Err(_) => return RepoState::default(),
        };

        let mut status_options = git2::StatusOptions::new();
        status_options.include_untracked(true);
        let has_uncommitted_changes = repo
            .statuses(Some(&mut status_options))
            .map(|statuses| !statuses.is_empty())
            .unwrap_or(false);

        let (current_commit, current_branch) = match repo.head() {
            Ok(head) => (
                head.target().map(|oid| oid.to_string()),
                head.shorthand().map(str::to_string),
            ),
            Err(_) => (None, None),
        };

        RepoState {
            has_uncommitted_changes,
            current_commit,
            current_branch,
        }
    }
}

/// Runs the external quality command in the target root with the target
/// paths appended.
struct CommandRunner {
    root: PathBuf,
    program: String,
    args: Vec<String>,
}

#[async_trait::async_trait]
impl OperationRunner for CommandRunner {
    async fn perform(&self, kind: OperationKind, paths: &[PathBuf]) -> bool {
        let status = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .args(paths)
            .current_dir(&self.root)
            .status()
            .await;
        match status {
            Ok(status) => status.success(),
            Err(error) => {
                tracing::error!(
                    kind = kind.as_str(),
                    program = %self.program,
                    %error,
                    "failed to spawn operation command"
                );
                false
            }
        }
    }
}

fn print_snapshot_line(snapshot: &SnapshotMetadata) {
    let kind = match snapshot.kind {
        guardrail_engine::SnapshotKind::Full => "full",
        guardrail_engine::SnapshotKind::Differential => "differential",
    };
    let base = snapshot
        .base_snapshot_id
        .as_deref()
        .map(|base| format!(" base={base}"))
        .unwrap_or_default();
    println!(
        "{}  {}  op={} files={} bytes={} created_at_ms={}{}",
        snapshot.id,
        kind,
        snapshot.operation.as_str(),
        snapshot.file_count,
        snapshot.total_bytes,
        snapshot.created_at_ms,
        base
    );
}

fn print_outcome(outcome: &OperationOutcome) {
    println!(
        "status: {}",
        match outcome.status {
            OutcomeStatus::Completed => "completed",
            OutcomeStatus::Cancelled => "cancelled",
        }
    );
    if let Some(verdict) = outcome.verdict {
        println!("verdict: {}", verdict_label(verdict));
    }
    if let Some(id) = outcome.snapshot_id.as_deref() {
        println!("snapshot: {id}");
    }
    println!("rollback_performed: {}", outcome.rollback_performed);
    if outcome.residual_failure {
        println!("residual_failure: true (inspect the snapshot above to recover)");
    }
}

fn exit_code_for_outcome(outcome: &OperationOutcome) -> ExitCode {
    if outcome.residual_failure {
        return ExitCode::from(1);
    }
    match (outcome.status, outcome.verdict) {
        (OutcomeStatus::Cancelled, _) => ExitCode::SUCCESS,
        (OutcomeStatus::Completed, Some(Verdict::Failed)) if !outcome.rollback_performed => {
            ExitCode::from(1)
        }
        (OutcomeStatus::Completed, _) => ExitCode::SUCCESS,
    }
}

fn verdict_label(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Passed => "passed",
        Verdict::Warned => "warned",
        Verdict::Failed => "failed",
    }
}

fn is_interactive_terminal() -> bool {
    std::io::stdin().is_terminal() && std::io::stdout().is_terminal()
}
