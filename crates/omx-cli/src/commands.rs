//! Argument types and handlers for each `omx` subcommand.

use clap::Args;
use omx_core::config::{Config, RuntimeEnv};
use omx_core::paths::StateRoot;
use omx_core::schema::LeaderInfo;
use omx_core::lifecycle::{self, StartTeamRequest};
use omx_core::StateStore;
use omx_orchestrator::adapter::tmux::TmuxAdapter;
use omx_orchestrator::adapter::MultiplexerAdapter;
use omx_orchestrator::{monitor, shutdown};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

fn store_for(project: &PathBuf, config: &Config) -> anyhow::Result<StateStore> {
    let root = StateRoot::new(project)?;
    Ok(StateStore::new(root, config.locks.clone()))
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Project root containing (or to hold) the `.omx/state` tree.
    #[arg(long)]
    project: PathBuf,
    /// Team name.
    #[arg(long)]
    team: String,
    /// One-line task description handed to the team.
    #[arg(long)]
    task: String,
    /// Number of workers to materialize.
    #[arg(long)]
    workers: u32,
    /// Agent type launched in each worker pane.
    #[arg(long, default_value = "codex")]
    agent_type: String,
    /// Ceiling on concurrent workers; defaults to `workers`.
    #[arg(long)]
    max_workers: Option<u32>,
}

pub async fn start(args: StartArgs) -> anyhow::Result<()> {
    let config = Config::load(&args.project);
    let env = RuntimeEnv::from_process_env();
    let store = store_for(&args.project, &config)?;
    let adapter = TmuxAdapter;

    let leader_pane_id = adapter.current_leader_pane_id().await.ok().flatten();
    let session_id = env.session_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let manifest = lifecycle::start_team(
        &store,
        &env,
        StartTeamRequest {
            team: args.team.clone(),
            task: args.task,
            agent_type: args.agent_type,
            worker_count: args.workers,
            max_workers: args.max_workers.unwrap_or(args.workers),
            tmux_session: format!("omx-{}", args.team),
            leader_pane_id,
            hud_pane_id: None,
            leader: LeaderInfo {
                session_id,
                worker_id: "leader".to_string(),
                role: "leader".to_string(),
            },
            delegation_only: false,
            plan_approval_required: false,
        },
    )?;

    println!("{}", serde_json::to_string_pretty(&manifest)?);
    Ok(())
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[arg(long)]
    project: PathBuf,
    #[arg(long)]
    team: String,
}

pub async fn status(args: StatusArgs) -> anyhow::Result<()> {
    let config = Config::load(&args.project);
    let store = store_for(&args.project, &config)?;

    let Some(team_config) = store.read_config(&args.team)? else {
        println!("{}", json!({ "team": args.team, "found": false }));
        return Ok(());
    };
    let tasks = store.list_tasks(&args.team)?;

    let mut workers = Vec::new();
    for worker in &team_config.workers {
        let status = store.read_worker_status(&args.team, &worker.name)?;
        let heartbeat = store.read_worker_heartbeat(&args.team, &worker.name)?;
        workers.push(json!({
            "name": worker.name,
            "state": status.state.as_wire_string(),
            "current_task_id": status.current_task_id,
            "heartbeat": heartbeat,
        }));
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "team": args.team,
            "found": true,
            "task_count": tasks.len(),
            "tasks": tasks,
            "workers": workers,
        }))?
    );
    Ok(())
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    #[arg(long)]
    project: PathBuf,
    #[arg(long)]
    team: String,
    /// Run a single cycle and exit instead of looping until completion.
    #[arg(long)]
    once: bool,
}

pub async fn monitor(args: MonitorArgs) -> anyhow::Result<()> {
    let config = Config::load(&args.project);
    let store = store_for(&args.project, &config)?;
    let adapter = TmuxAdapter;
    let horizon = Duration::from_secs(config.bootstrap.mailbox_retry_horizon_secs);

    loop {
        let report = monitor::monitor_team(&store, &config.locks, &adapter, &args.team, horizon).await?;
        let Some(report) = report else {
            println!("{}", json!({ "team": args.team, "found": false }));
            return Ok(());
        };

        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "pending": report.pending_count,
                "in_progress": report.in_progress_count,
                "completed": report.completed_count,
                "failed": report.failed_count,
                "all_tasks_terminal": report.all_tasks_terminal,
                "dead_workers": report.dead_workers,
                "non_reporting_workers": report.non_reporting_workers,
                "recommendations": report.recommendations,
            }))?
        );

        if args.once || report.all_tasks_terminal {
            return Ok(());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[derive(Args, Debug)]
pub struct ShutdownArgs {
    #[arg(long)]
    project: PathBuf,
    #[arg(long)]
    team: String,
    /// Bypass worker rejections (never bypasses leader/HUD pane protection).
    #[arg(long)]
    force: bool,
}

pub async fn shutdown(args: ShutdownArgs) -> anyhow::Result<()> {
    let config = Config::load(&args.project);
    let store = store_for(&args.project, &config)?;
    let adapter = TmuxAdapter;

    let report = shutdown::shutdown_team(&store, &config.locks, &adapter, "cli", &args.team, args.force).await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "accepted": report.accepted,
            "rejected": report.rejected,
            "force_killed": report.force_killed,
        }))?
    );
    Ok(())
}
