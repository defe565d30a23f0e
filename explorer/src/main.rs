//! Command-line driver for navigation-graph exploration.
//!
//! `explorer explore` runs one session against the exploration service:
//! start, show the plan or proposals, and (with `--yes`) carry the session
//! through to a committed graph. Ctrl-C cancels the session.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use explorer::core::ids::validate_identifier;
use explorer::core::phase::Phase;
use explorer::core::types::{DeviceRef, Depth, ExplorationMode, Rejection, SessionTarget};
use explorer::exit_codes;
use explorer::io::client::{ExplorationClient, HttpExplorationClient};
use explorer::io::config::{DEFAULT_CONFIG_PATH, ExplorerConfig, load_config, write_config};
use explorer::io::device::{DeclaredLock, DeviceControl};
use explorer::io::report::{SessionReport, write_report};
use explorer::logging;
use explorer::workflow::{CommandOutcome, Workflow, WorkflowSettings, WorkflowView};

#[derive(Parser)]
#[command(
    name = "explorer",
    version,
    about = "Drive AI-guided navigation-graph exploration of a device"
)]
struct Cli {
    /// Config file path.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Debug-level diagnostics on stderr (when `RUST_LOG` is unset).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config file if missing.
    Init {
        /// Overwrite an existing config file.
        #[arg(short, long)]
        force: bool,
    },
    /// Run one exploration session end to end.
    Explore(ExploreArgs),
}

#[derive(Args, Clone)]
struct ExploreArgs {
    /// Navigation tree to extend.
    #[arg(long = "tree")]
    tree_id: String,

    /// Host the device is attached to.
    #[arg(long = "host")]
    host_name: String,

    #[arg(long = "device")]
    device_id: String,

    /// Exploration depth (1-10). Defaults to `default_depth` from config.
    #[arg(long)]
    depth: Option<u8>,

    /// Explore everything first, then approve a selection of proposals.
    #[arg(long)]
    single_shot: bool,

    /// Assert that the device lock is held by this operator.
    #[arg(long)]
    lock_held: bool,

    /// Continue past the plan or proposals instead of cancelling after showing them.
    #[arg(short, long)]
    yes: bool,

    /// Retry a failed call up to this many times.
    #[arg(long, default_value_t = 0)]
    retries: u32,

    /// Deselect a proposed node before approval (single-shot).
    #[arg(long = "exclude-node", value_name = "ID")]
    exclude_nodes: Vec<String>,

    /// Deselect a proposed edge before approval (single-shot).
    #[arg(long = "exclude-edge", value_name = "ID")]
    exclude_edges: Vec<String>,

    /// Write a JSON session report here when the session ends.
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Explore(args) => cmd_explore(&cli.config, args),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        println!("{} already exists (use --force to overwrite)", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(path, &ExplorerConfig::default())
        .with_context(|| format!("write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_explore(config_path: &Path, args: ExploreArgs) -> Result<i32> {
    validate_identifier("tree", &args.tree_id)?;
    validate_identifier("host", &args.host_name)?;
    validate_identifier("device", &args.device_id)?;
    let cfg = load_config(config_path)?;
    let depth = args.depth.unwrap_or(cfg.default_depth);
    Depth::new(depth)?;

    let mode = if args.single_shot {
        ExplorationMode::SingleShot
    } else {
        ExplorationMode::Incremental
    };
    let target = SessionTarget::new(
        args.tree_id.clone(),
        DeviceRef::new(args.host_name.clone(), args.device_id.clone()),
    );
    let client = HttpExplorationClient::from_config(&cfg)?;
    let workflow = Arc::new(Workflow::new(
        client,
        DeclaredLock::new(args.lock_held),
        target,
        WorkflowSettings::from_config(&cfg, mode),
    ));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    let started_at = Utc::now();
    let outcome = runtime.block_on(explore(Arc::clone(&workflow), args.clone(), depth));
    runtime.shutdown_background();
    outcome?;

    let view = workflow.snapshot();
    if let Some(path) = &args.report {
        let report = SessionReport::from_view(&view, started_at, Utc::now());
        write_report(path, &report)?;
    }
    Ok(exit_code(&view))
}

async fn explore<C, D>(workflow: Arc<Workflow<C, D>>, args: ExploreArgs, depth: u8) -> Result<()>
where
    C: ExplorationClient + 'static,
    D: DeviceControl + 'static,
{
    let watcher = tokio::spawn(watch_phases(Arc::clone(&workflow)));
    let mut drive = tokio::spawn({
        let workflow = Arc::clone(&workflow);
        async move { drive(&workflow, &args, depth).await }
    });

    let interrupted = tokio::select! {
        joined = &mut drive => {
            joined.context("explore task")?;
            false
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("listen for ctrl-c")?;
            true
        }
    };
    if interrupted {
        eprintln!("interrupted; cancelling");
        workflow.cancel().await;
        if workflow.phase() == Phase::Cancelling {
            // A validation step is still in flight; the loop settles the cancel.
            drive.await.context("explore task")?;
        } else {
            drive.abort();
        }
    }
    watcher.abort();
    Ok(())
}

/// Carry the session forward until it reaches a phase that needs no further
/// command from us.
async fn drive<C: ExplorationClient, D: DeviceControl>(
    workflow: &Workflow<C, D>,
    args: &ExploreArgs,
    depth: u8,
) {
    let mut retries_left = args.retries;
    let mut exclusions_applied = false;
    note(workflow.start(depth).await);
    loop {
        let outcome = match workflow.phase() {
            Phase::AwaitingApproval => {
                print_plan(&workflow.snapshot());
                if !args.yes {
                    println!("re-run with --yes to create, validate and finalize this structure");
                    workflow.cancel().await
                } else {
                    workflow.continue_exploration().await
                }
            }
            Phase::StructureCreated => workflow.start_validation().await,
            Phase::ValidationComplete => workflow.finalize().await,
            Phase::ResultsReady => {
                if !exclusions_applied {
                    exclude(workflow, args);
                    exclusions_applied = true;
                }
                print_proposals(&workflow.snapshot());
                if !args.yes {
                    println!("re-run with --yes to approve the selected proposals");
                    workflow.cancel().await
                } else {
                    match workflow.approve().await {
                        CommandOutcome::Rejected(Rejection::EmptySelection) => {
                            eprintln!("nothing selected; cancelling");
                            workflow.cancel().await
                        }
                        other => other,
                    }
                }
            }
            Phase::Failed if retries_left > 0 => {
                retries_left -= 1;
                eprintln!("retrying ({retries_left} retries left)");
                workflow.retry().await
            }
            _ => return,
        };
        note(outcome);
    }
}

fn exclude<C: ExplorationClient, D: DeviceControl>(workflow: &Workflow<C, D>, args: &ExploreArgs) {
    for id in &args.exclude_nodes {
        note(workflow.toggle_node(id));
    }
    for id in &args.exclude_edges {
        note(workflow.toggle_edge(id));
    }
}

fn note(outcome: CommandOutcome) {
    match outcome {
        CommandOutcome::Rejected(rejection) => eprintln!("rejected: {rejection}"),
        CommandOutcome::Failed { message } => eprintln!("failed: {message}"),
        other => debug!(?other, "command outcome"),
    }
}

async fn watch_phases<C, D>(workflow: Arc<Workflow<C, D>>)
where
    C: ExplorationClient,
    D: DeviceControl,
{
    let mut changes = workflow.subscribe();
    loop {
        let change = match changes.recv().await {
            Ok(change) => change,
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "phase watcher lagged");
                continue;
            }
            Err(RecvError::Closed) => return,
        };
        eprintln!("{} -> {}", change.from, change.to);
        if !matches!(change.to, Phase::AwaitingValidation | Phase::ValidationComplete) {
            continue;
        }
        if let Some(progress) = workflow.snapshot().progress.validation {
            eprintln!("validated {}/{}", progress.current, progress.total);
        }
    }
}

fn print_plan(view: &WorkflowView) {
    let Some(plan) = &view.plan else {
        return;
    };
    println!(
        "plan: {} menu, predicted depth {}, strategy: {}",
        plan.menu_type, plan.predicted_depth, plan.strategy
    );
    if !plan.reasoning.is_empty() {
        println!("reasoning: {}", plan.reasoning);
    }
    match &plan.lines {
        Some(lines) => {
            for (row, items) in lines.iter().enumerate() {
                println!("  row {}: {}", row + 1, items.join(", "));
            }
        }
        None => {
            for (index, item) in plan.items.iter().enumerate() {
                println!("  {}. {item}", index + 1);
            }
        }
    }
}

fn print_proposals(view: &WorkflowView) {
    let (Some(proposals), Some(selection)) = (&view.proposals, &view.selection) else {
        return;
    };
    println!(
        "proposals: {} nodes, {} edges",
        proposals.nodes.len(),
        proposals.edges.len()
    );
    for (node, pick) in proposals.nodes.iter().zip(&selection.nodes) {
        let mark = if pick.included { 'x' } else { ' ' };
        println!("  [{mark}] node {} ({}) {}", node.id, node.screen_type, node.name);
    }
    for (edge, pick) in proposals.edges.iter().zip(&selection.edges) {
        let mark = if pick.included { 'x' } else { ' ' };
        println!("  [{mark}] edge {}: {} -> {}", edge.id, edge.source, edge.target);
    }
}

fn exit_code(view: &WorkflowView) -> i32 {
    match view.phase {
        Phase::Committed => exit_codes::OK,
        Phase::Cancelled | Phase::Cancelling => exit_codes::CANCELLED,
        // Start was rejected locally; nothing reached the service.
        Phase::Configuring => exit_codes::INVALID,
        _ => exit_codes::FAILED,
    }
}
