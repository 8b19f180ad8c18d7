use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arch_config::ArchConfig;
use arch_state::{Message, ProcessHandle, SavedContext, StateStore, ARCHIE, BROADCAST};
use arch_supervisor::{AgentConfig, AgentSupervisor, ContainerRuntimeConfig, ContainerSupervisor, LocalSupervisor};
use arch_tools::{MergeResult, OrchestratorHandle, SpawnResult, ToolError};
use arch_usage::TokenTracker;
use arch_workspace::{AgentBrief, PriorContext, TeamMember, WorkspaceProvider};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::error::OrchestratorError;
use crate::gates;

const INITIAL_PROMPT: &str = "Read AGENT_BRIEF.md in your workspace root and begin your assignment.";
const RESUME_PROMPT: &str = "Resume your prior session and drain your message queue.";
const DEFAULT_GRACE: Duration = Duration::from_secs(15);
const MAX_ARCHIE_RESTARTS: u32 = 1;
const ARCHIE_RESUME_COOLDOWN_SECS: i64 = 30;

struct RunningAgent {
    role: String,
    reaper: tokio::task::JoinHandle<()>,
}

struct Inner {
    /// Active instance count per role, used to enforce `max_instances`.
    /// Incremented on spawn, decremented on teardown/launch-failure.
    role_counts: HashMap<String, u32>,
    /// Monotonic per-role id-mint counter. Never decremented, so a
    /// torn-down instance's id is never reused while the role still has
    /// other instances alive.
    role_next_id: HashMap<String, u32>,
    running: HashMap<String, RunningAgent>,
    archie_restart_count: u32,
    archie_last_exit: Option<chrono::DateTime<Utc>>,
    shutdown_requested: bool,
}

/// Drives the whole system (C7): startup gates, spawn/teardown flows, Archie
/// crash-restart and auto-resume, and the shutdown sequence.
///
/// Every running agent's [`arch_supervisor::AgentSupervisor`] is owned
/// exclusively by the background task that reaps it (spawned in `launch`) —
/// nothing else ever calls `stop()`/`wait()` on that instance. Termination
/// instead signals the OS process directly using the pid/container name
/// recorded in the state store, then waits on the reaper's `JoinHandle` to
/// confirm the exit was observed and bookkeeping completed. Racing a shared
/// supervisor between `wait()` and `stop()` drops the child handle without
/// killing it the moment `wait()`'s first poll takes it.
pub struct Orchestrator {
    config: ArchConfig,
    repo_path: PathBuf,
    state: Arc<StateStore>,
    tracker: Arc<TokenTracker>,
    workspace: Arc<dyn WorkspaceProvider>,
    tool_server_port: u16,
    exit_tx: mpsc::UnboundedSender<(String, i32)>,
    inner: Mutex<Inner>,
}

impl Orchestrator {
    pub fn new(
        config: ArchConfig,
        repo_path: PathBuf,
        state: Arc<StateStore>,
        tracker: Arc<TokenTracker>,
        workspace: Arc<dyn WorkspaceProvider>,
        tool_server_port: u16,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<(String, i32)>) {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let orchestrator = Arc::new(Self {
            config,
            repo_path,
            state,
            tracker,
            workspace,
            tool_server_port,
            exit_tx,
            inner: Mutex::new(Inner {
                role_counts: HashMap::new(),
                role_next_id: HashMap::new(),
                running: HashMap::new(),
                archie_restart_count: 0,
                archie_last_exit: None,
                shutdown_requested: false,
            }),
        });
        (orchestrator, exit_rx)
    }

    /// Startup gates 3-6 (1-2 — config parsing and State Store init — are the
    /// caller's responsibility, since they happen before an `Orchestrator`
    /// can be constructed at all).
    pub async fn run_startup_gates(&self) -> Result<(), OrchestratorError> {
        gates::check_repo_gate(&self.repo_path).await?;

        let skip_permission_roles = gates::check_permission_gate(&self.config);
        if !skip_permission_roles.is_empty() {
            info!(?skip_permission_roles, "pool entries request skip-permissions; confirm to continue");
        }

        gates::check_container_gate(&self.config).await?;
        let _tracker_ok = gates::check_tracker_gate(&self.config).await;
        Ok(())
    }

    /// Spawn Archie. Never sandboxed, never subject to the pool's
    /// max-instance bookkeeping.
    pub async fn spawn_archie(&self) -> Result<(), OrchestratorError> {
        let persona = std::fs::read_to_string(&self.config.archie.persona).unwrap_or_else(|_| {
            warn!(path = ?self.config.archie.persona, "persona file unreadable, using empty persona");
            String::new()
        });

        let workspace_path = self.workspace.create(ARCHIE, None).await?;
        let brief = AgentBrief {
            agent_id: ARCHIE.to_string(),
            persona_text: persona,
            project_name: self.config.project.name.clone(),
            project_description: self.config.project.description.clone(),
            workspace_path: workspace_path.display().to_string(),
            assignment: "Coordinate the project and the agent pool.".to_string(),
            active_team: Vec::new(),
            available_tools: arch_tools::ARCHIE_TOOLS.iter().map(|s| s.to_string()).collect(),
            prior_context: None,
        };
        self.workspace.write_agent_brief(ARCHIE, &brief).await?;

        self.state
            .register_agent(ARCHIE, "archie", &workspace_path.display().to_string(), false, false, None)
            .await?;

        let agent_config = AgentConfig {
            agent_id: ARCHIE.to_string(),
            role: "archie".to_string(),
            model: self.config.archie.model.clone(),
            workspace: workspace_path.display().to_string(),
            skip_permissions: false,
        };
        self.launch(agent_config, false, None, INITIAL_PROMPT, None).await
    }

    async fn launch(
        &self,
        agent_config: AgentConfig,
        sandboxed: bool,
        runtime: Option<ContainerRuntimeConfig>,
        prompt: &str,
        resume_from: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        let agent_id = agent_config.agent_id.clone();
        let role = agent_config.role.clone();

        let (ok, reaper) = if sandboxed {
            let mut supervisor = ContainerSupervisor::new(
                agent_config,
                runtime.unwrap_or_default(),
                self.state.clone(),
                self.tracker.clone(),
                self.config.state_dir.clone(),
                self.tool_server_port,
            )
            .on_exit(self.exit_tx.clone());
            let ok = supervisor.spawn(prompt, resume_from).await;
            (ok, spawn_reaper(supervisor))
        } else {
            let mut supervisor = LocalSupervisor::new(
                agent_config,
                self.state.clone(),
                self.tracker.clone(),
                self.config.state_dir.clone(),
                self.tool_server_port,
            )
            .on_exit(self.exit_tx.clone());
            let ok = supervisor.spawn(prompt, resume_from).await;
            (ok, spawn_reaper(supervisor))
        };

        if !ok {
            reaper.abort();
            self.state.remove_agent(&agent_id).await;
            return Err(OrchestratorError::SpawnFailed(agent_id));
        }

        self.inner.lock().await.running.insert(agent_id, RunningAgent { role, reaper });
        Ok(())
    }

    /// Background loop reacting to child exits: Archie crash-restart (§4.7).
    pub async fn run_exit_watcher(self: Arc<Self>, mut exit_rx: mpsc::UnboundedReceiver<(String, i32)>) {
        while let Some((agent_id, code)) = exit_rx.recv().await {
            let mut inner = self.inner.lock().await;
            inner.running.remove(&agent_id);
            let shutting_down = inner.shutdown_requested;
            if agent_id == ARCHIE {
                inner.archie_last_exit = Some(Utc::now());
            }
            drop(inner);

            if agent_id != ARCHIE || shutting_down {
                continue;
            }
            warn!(code, "archie exited, evaluating restart policy");
            self.attempt_archie_crash_restart().await;
        }
    }

    async fn attempt_archie_crash_restart(&self) {
        let mut inner = self.inner.lock().await;
        if inner.archie_restart_count >= MAX_ARCHIE_RESTARTS {
            drop(inner);
            warn!("archie crashed twice, initiating shutdown");
            self.begin_shutdown().await;
            return;
        }
        inner.archie_restart_count += 1;
        drop(inner);

        let resume_from = self.state.get_agent(ARCHIE).await.and_then(|a| a.session_id);
        if let Err(err) = self.respawn_archie(resume_from, INITIAL_PROMPT).await {
            error!(%err, "archie crash-restart failed");
        }
    }

    async fn respawn_archie(&self, resume_from: Option<String>, prompt: &str) -> Result<(), OrchestratorError> {
        let agent = self.state.get_agent(ARCHIE).await.ok_or_else(|| OrchestratorError::AgentNotFound(ARCHIE.to_string()))?;
        let agent_config = AgentConfig {
            agent_id: ARCHIE.to_string(),
            role: "archie".to_string(),
            model: self.config.archie.model.clone(),
            workspace: agent.workspace,
            skip_permissions: false,
        };
        self.launch(agent_config, false, None, prompt, resume_from.as_deref()).await
    }

    /// Background poll: respawn Archie if it has been down past the cooldown
    /// and an undelivered message is addressed to it. Uses the `read` flag
    /// directly as a non-consuming peek, so this never advances Archie's own
    /// read cursor the way a `get_messages` call would.
    pub async fn run_auto_resume_poll(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            ticker.tick().await;
            let mut inner = self.inner.lock().await;
            if inner.shutdown_requested || inner.running.contains_key(ARCHIE) {
                continue;
            }
            let Some(last_exit) = inner.archie_last_exit else { continue };
            if inner.archie_restart_count >= MAX_ARCHIE_RESTARTS {
                continue;
            }
            if Utc::now().signed_duration_since(last_exit).num_seconds() < ARCHIE_RESUME_COOLDOWN_SECS {
                continue;
            }
            inner.archie_restart_count += 1;
            drop(inner);

            let has_unread = unread_for_archie(&self.state.get_all_messages().await);
            if !has_unread {
                self.inner.lock().await.archie_restart_count -= 1;
                continue;
            }

            let resume_from = self.state.get_agent(ARCHIE).await.and_then(|a| a.session_id);
            if let Err(err) = self.respawn_archie(resume_from, RESUME_PROMPT).await {
                error!(%err, "archie auto-resume failed");
            }
        }
    }

    async fn begin_shutdown(&self) {
        {
            let mut inner = self.inner.lock().await;
            if inner.shutdown_requested {
                return;
            }
            inner.shutdown_requested = true;
        }
        self.shutdown(DEFAULT_GRACE).await;
    }

    /// Stop every supervisor in parallel, remove workspaces unless
    /// `keep_workspaces` is set, and emit a cost summary. Idempotent.
    pub async fn shutdown(&self, grace: Duration) {
        let agent_ids: Vec<String> = {
            let mut inner = self.inner.lock().await;
            inner.shutdown_requested = true;
            inner.running.keys().cloned().collect()
        };

        let mut terminations = Vec::new();
        for agent_id in &agent_ids {
            let agent = self.state.get_agent(agent_id).await;
            terminations.push(tokio::spawn(terminate(agent, grace)));
        }
        for handle in terminations {
            let _ = handle.await;
        }

        let reapers: Vec<_> = {
            let mut inner = self.inner.lock().await;
            agent_ids.iter().filter_map(|id| inner.running.remove(id)).collect()
        };
        for running in reapers {
            let _ = tokio::time::timeout(grace, running.reaper).await;
        }

        if !self.config.keep_workspaces {
            for agent in self.state.list_agents().await {
                if let Err(err) = self.workspace.remove(&agent.id, true).await {
                    warn!(agent_id = %agent.id, %err, "failed to remove workspace during shutdown");
                }
            }
        }

        let total_cost = self.tracker.total_cost().await;
        info!(total_cost_usd = total_cost, "shutdown complete");
    }

    async fn next_agent_id(&self, role: &str) -> String {
        let mut inner = self.inner.lock().await;
        *inner.role_counts.entry(role.to_string()).or_insert(0) += 1;
        let next_id = inner.role_next_id.entry(role.to_string()).or_insert(0);
        *next_id += 1;
        format!("{role}-{next_id}")
    }

    async fn decrement_role_count(&self, role: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(count) = inner.role_counts.get_mut(role) {
            *count = count.saturating_sub(1);
        }
    }
}

/// True if any message addressed to Archie (or broadcast) is unread.
fn unread_for_archie(messages: &[Message]) -> bool {
    messages.iter().any(|m| !m.read && (m.to == ARCHIE || m.to == BROADCAST))
}

fn spawn_reaper<S: AgentSupervisor + 'static>(mut supervisor: S) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        supervisor.wait().await;
    })
}

async fn terminate(agent: Option<arch_state::Agent>, grace: Duration) {
    let Some(agent) = agent else { return };
    let Some(process) = agent.process else { return };
    terminate_process(&process, grace).await;
}

async fn terminate_process(process: &ProcessHandle, grace: Duration) {
    if let Some(container_name) = &process.container_name {
        let _ = tokio::process::Command::new("docker")
            .args(["stop", "-t", &grace.as_secs().to_string(), container_name])
            .output()
            .await;
    } else if let Some(pid) = process.pid {
        // SAFETY: pid was recorded by our own supervisor at spawn time. A
        // stale pid (already reaped and reused by the OS) would signal an
        // unrelated process; acceptable best-effort behavior at shutdown.
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
}

#[async_trait]
impl OrchestratorHandle for Orchestrator {
    async fn spawn_agent(
        &self,
        role: &str,
        assignment: &str,
        context: Option<Value>,
        skip_permissions: bool,
    ) -> Result<SpawnResult, ToolError> {
        let entry = self
            .config
            .pool_entry(role)
            .ok_or_else(|| ToolError::InvalidArgument { field: "role", reason: format!("unknown role '{role}'") })?
            .clone();

        {
            let inner = self.inner.lock().await;
            let count = inner.role_counts.get(role).copied().unwrap_or(0);
            if count >= entry.max_instances {
                return Err(ToolError::InvalidArgument {
                    field: "role",
                    reason: format!("role '{role}' has reached its max-instance limit"),
                });
            }
        }
        if skip_permissions && !entry.allow_skip_permissions {
            return Err(ToolError::InvalidArgument {
                field: "skip_permissions",
                reason: format!("skip_permissions forbidden for role '{role}'"),
            });
        }

        let agent_id = self.next_agent_id(role).await;
        let workspace_path = self
            .workspace
            .create(&agent_id, None)
            .await
            .map_err(|e| ToolError::Orchestrator(e.to_string()))?;

        let prior_context = context
            .and_then(|v| serde_json::from_value::<SavedContext>(v).ok())
            .map(|sc| PriorContext {
                progress: sc.progress,
                files_modified: sc.files_modified,
                next_steps: sc.next_steps,
                blockers: sc.blockers,
                decisions: sc.decisions,
            });

        let team = self
            .state
            .list_agents()
            .await
            .into_iter()
            .map(|a| TeamMember { agent_id: a.id, role: a.role })
            .collect();

        let brief = AgentBrief {
            agent_id: agent_id.clone(),
            persona_text: std::fs::read_to_string(&entry.persona).unwrap_or_default(),
            project_name: self.config.project.name.clone(),
            project_description: self.config.project.description.clone(),
            workspace_path: workspace_path.display().to_string(),
            assignment: assignment.to_string(),
            active_team: team,
            available_tools: arch_tools::WORKER_TOOLS.iter().map(|s| s.to_string()).collect(),
            prior_context,
        };
        self.workspace
            .write_agent_brief(&agent_id, &brief)
            .await
            .map_err(|e| ToolError::Orchestrator(e.to_string()))?;

        self.state
            .register_agent(&agent_id, role, &workspace_path.display().to_string(), entry.sandboxed, skip_permissions, None)
            .await?;

        let agent_config = AgentConfig {
            agent_id: agent_id.clone(),
            role: role.to_string(),
            model: entry.model.clone(),
            workspace: workspace_path.display().to_string(),
            skip_permissions,
        };
        let runtime = ContainerRuntimeConfig {
            image: entry.container.image.clone(),
            memory_limit: entry.container.memory_limit.clone(),
            cpus: entry.container.cpus,
            network: entry.container.network.clone(),
            extra_mounts: entry.container.extra_mounts.clone(),
        };

        if let Err(err) = self.launch(agent_config, entry.sandboxed, Some(runtime), INITIAL_PROMPT, None).await {
            self.decrement_role_count(role).await;
            self.state.remove_agent(&agent_id).await;
            return Err(ToolError::Orchestrator(err.to_string()));
        }

        Ok(SpawnResult {
            agent_id,
            workspace_path: workspace_path.display().to_string(),
            sandboxed: entry.sandboxed,
            status: "spawning",
        })
    }

    async fn teardown_agent(&self, agent_id: &str, _reason: Option<&str>) -> Result<(), ToolError> {
        if agent_id == ARCHIE {
            return Err(ToolError::InvalidArgument { field: "agent_id", reason: "archie cannot be torn down".into() });
        }
        let agent = self
            .state
            .get_agent(agent_id)
            .await
            .ok_or_else(|| ToolError::InvalidArgument { field: "agent_id", reason: format!("unknown agent '{agent_id}'") })?;

        terminate(Some(agent.clone()), DEFAULT_GRACE).await;

        let reaper = {
            let mut inner = self.inner.lock().await;
            inner.running.remove(agent_id).map(|r| r.reaper)
        };
        if let Some(reaper) = reaper {
            let _ = tokio::time::timeout(DEFAULT_GRACE, reaper).await;
        }

        if !self.config.keep_workspaces {
            if let Err(err) = self.workspace.remove(agent_id, true).await {
                warn!(agent_id, %err, "failed to remove workspace");
            }
        }
        self.decrement_role_count(&agent.role).await;
        self.state.remove_agent(agent_id).await;
        Ok(())
    }

    async fn request_merge(
        &self,
        agent_id: &str,
        target_branch: Option<&str>,
        pr_title: Option<&str>,
        pr_body: Option<&str>,
    ) -> Result<MergeResult, ToolError> {
        let target = target_branch.unwrap_or("main");
        match pr_title {
            None => {
                self.workspace
                    .merge(agent_id, target, pr_body)
                    .await
                    .map_err(|e| ToolError::Orchestrator(e.to_string()))?;
                Ok(MergeResult::Merged { agent_id: agent_id.to_string() })
            }
            Some(title) => {
                let review = self
                    .workspace
                    .request_upstream_review(agent_id, title, pr_body.unwrap_or(""), target)
                    .await
                    .map_err(|e| ToolError::Orchestrator(e.to_string()))?;
                Ok(MergeResult::UpstreamReview { url: review.url, number: review.number })
            }
        }
    }

    async fn close_project(&self, summary: &str) -> Result<(), ToolError> {
        info!(summary, "close_project requested");
        self.begin_shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unread_for_archie_ignores_read_messages() {
        let msgs = vec![Message {
            id: 1,
            from: "fe-1".into(),
            to: ARCHIE.to_string(),
            content: "done".into(),
            timestamp: Utc::now(),
            read: true,
        }];
        assert!(!unread_for_archie(&msgs));
    }

    #[test]
    fn unread_for_archie_sees_broadcast() {
        let msgs = vec![Message {
            id: 1,
            from: "fe-1".into(),
            to: BROADCAST.to_string(),
            content: "done".into(),
            timestamp: Utc::now(),
            read: false,
        }];
        assert!(unread_for_archie(&msgs));
    }

    #[test]
    fn unread_for_archie_ignores_other_recipients() {
        let msgs = vec![Message {
            id: 1,
            from: "fe-1".into(),
            to: "be-1".into(),
            content: "done".into(),
            timestamp: Utc::now(),
            read: false,
        }];
        assert!(!unread_for_archie(&msgs));
    }
}
