mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use arch_config::ArchConfig;
use arch_orchestrator::Orchestrator;
use arch_state::{StateStore, ARCHIE, BROADCAST};
use arch_usage::TokenTracker;
use arch_workspace::GitWorkspaceProvider;
use cli::{Cli, Commands, OutputFormatArg};

const PID_FILE: &str = "arch.pid";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Init { config, keep_workspaces } => run_init(config, keep_workspaces).await,
        Commands::Status { state_dir, output_format } => run_status(state_dir, output_format).await,
        Commands::Send { state_dir, recipient, content } => run_send(state_dir, recipient, content).await,
        Commands::Down { state_dir } => run_down(state_dir).await,
        Commands::Completions { shell } => {
            cli::print_completions(shell);
            Ok(())
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "arch=info",
        1 => "arch=debug",
        _ => "arch=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
}

/// Startup pipeline gates 1-2, then hands off to [`Orchestrator`]: parse and
/// validate the config document, open the State Store, run gates 3-6, start
/// the Tool Server, write Archie's brief and spawn it, then block on the
/// shutdown signal.
async fn run_init(config_path: std::path::PathBuf, keep_workspaces: bool) -> anyhow::Result<()> {
    let mut config = ArchConfig::load(&config_path).context("failed to load configuration")?;
    if keep_workspaces {
        config.keep_workspaces = true;
    }

    let repo_path = config.project.repo.clone();
    let state = Arc::new(StateStore::open(&config.state_dir).await.context("failed to open state store")?);
    state.init_project(&config.project.name, &config.project.description, &repo_path.display().to_string()).await;

    let tracker = Arc::new(TokenTracker::new(Some(config.state_dir.clone()), config.pricing_file.as_deref()));
    let workspace = Arc::new(GitWorkspaceProvider::new(repo_path.clone()));

    let bind: std::net::SocketAddr = config.tool_server.bind.parse().context("invalid tool_server.bind address")?;
    let (orchestrator, exit_rx) = Orchestrator::new(
        config.clone(),
        repo_path,
        state.clone(),
        tracker.clone(),
        workspace.clone(),
        bind.port(),
    );

    orchestrator.run_startup_gates().await.context("startup gate failed")?;

    let router = arch_tools::router(Arc::new(arch_tools::ToolServer::new(
        state.clone(),
        workspace.clone(),
        orchestrator.clone(),
        None,
    )));
    let listener = tokio::net::TcpListener::bind(bind).await.context("failed to bind tool server")?;
    tracing::info!(%bind, "tool server listening");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router).await {
            tracing::error!(%err, "tool server exited");
        }
    });

    write_pid_file(&config.state_dir)?;

    tokio::spawn(orchestrator.clone().run_exit_watcher(exit_rx));
    tokio::spawn(orchestrator.clone().run_auto_resume_poll());

    orchestrator.spawn_archie().await.context("failed to spawn archie")?;

    wait_for_shutdown_signal().await;
    orchestrator.shutdown(std::time::Duration::from_secs(30)).await;
    let _ = std::fs::remove_file(config.state_dir.join(PID_FILE));
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
            _ = sigint.recv() => tracing::info!("received SIGINT"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn write_pid_file(state_dir: &std::path::Path) -> anyhow::Result<()> {
    std::fs::write(state_dir.join(PID_FILE), std::process::id().to_string())?;
    Ok(())
}

async fn run_status(state_dir: std::path::PathBuf, format: OutputFormatArg) -> anyhow::Result<()> {
    let state = StateStore::open(&state_dir).await.context("failed to open state directory")?;
    let full = state.full_state().await;

    match format {
        OutputFormatArg::Json => {
            println!("{}", serde_json::to_string_pretty(&full)?);
        }
        OutputFormatArg::Table => {
            println!("Project: {} ({})", full.project.name, full.project.repo);
            println!();
            println!("{:<12} {:<10} {:<10} {:<30}", "AGENT", "ROLE", "STATUS", "TASK");
            for agent in full.agents.values() {
                println!("{:<12} {:<10} {:<10?} {:<30}", agent.id, agent.role, agent.status, agent.task);
            }
            println!();
            let pending: Vec<_> = full.pending_decisions.iter().filter(|d| d.answer.is_none()).collect();
            println!("Pending decisions: {}", pending.len());
            for decision in pending {
                println!("  [{}] {}", decision.id, decision.question);
            }
            println!();
            println!("Messages: {}", full.messages.len());
        }
    }
    Ok(())
}

async fn run_send(state_dir: std::path::PathBuf, recipient: String, content: String) -> anyhow::Result<()> {
    let state = StateStore::open(&state_dir).await.context("failed to open state directory")?;
    if recipient != ARCHIE && recipient != BROADCAST && state.get_agent(&recipient).await.is_none() {
        anyhow::bail!("unknown recipient '{recipient}' (not a registered agent, 'archie', or 'broadcast')");
    }
    let message = state.add_message("cli", &recipient, &content).await;
    println!("sent message {} to {}", message.id, recipient);
    Ok(())
}

async fn run_down(state_dir: std::path::PathBuf) -> anyhow::Result<()> {
    let pid_text = std::fs::read_to_string(state_dir.join(PID_FILE))
        .with_context(|| format!("no running instance found at {}", state_dir.join(PID_FILE).display()))?;
    let pid: i32 = pid_text.trim().parse().context("arch.pid did not contain a valid pid")?;

    // SAFETY: pid was written by a previous invocation of this same binary;
    // a stale/reused pid would signal an unrelated process, which is the
    // same best-effort tradeoff the running instance itself accepts.
    let ret = unsafe { libc::kill(pid, libc::SIGTERM) };
    if ret != 0 {
        anyhow::bail!("failed to signal pid {pid}: {}", std::io::Error::last_os_error());
    }
    println!("sent SIGTERM to pid {pid}");
    Ok(())
}
