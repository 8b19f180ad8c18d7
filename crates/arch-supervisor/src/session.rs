use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use arch_state::{AgentPatch, AgentStatus, StateStore, ARCHIE};
use arch_usage::TokenTracker;

use crate::config::AgentConfig;
use crate::mcp_config::{generate_mcp_config, log_permissions_audit};
use crate::supervisor::{build_claude_args, AgentSupervisor};

/// Local (non-containerized) Session Supervisor (C4): spawns the agent CLI
/// as a direct child process in its workspace directory.
pub struct LocalSupervisor {
    config: AgentConfig,
    state: Arc<StateStore>,
    tracker: Arc<TokenTracker>,
    state_dir: PathBuf,
    tool_server_port: u16,
    on_output: Option<UnboundedSender<serde_json::Value>>,
    on_exit: Option<UnboundedSender<(String, i32)>>,
    child: Option<Child>,
    output_task: Option<JoinHandle<()>>,
    session_id: Arc<Mutex<Option<String>>>,
}

impl LocalSupervisor {
    pub fn new(
        config: AgentConfig,
        state: Arc<StateStore>,
        tracker: Arc<TokenTracker>,
        state_dir: PathBuf,
        tool_server_port: u16,
    ) -> Self {
        Self {
            config,
            state,
            tracker,
            state_dir,
            tool_server_port,
            on_output: None,
            on_exit: None,
            child: None,
            output_task: None,
            session_id: Arc::new(Mutex::new(None)),
        }
    }

    pub fn on_output(mut self, sender: UnboundedSender<serde_json::Value>) -> Self {
        self.on_output = Some(sender);
        self
    }

    pub fn on_exit(mut self, sender: UnboundedSender<(String, i32)>) -> Self {
        self.on_exit = Some(sender);
        self
    }
}

#[async_trait]
impl AgentSupervisor for LocalSupervisor {
    async fn spawn(&mut self, initial_prompt: &str, resume_from: Option<&str>) -> bool {
        if self.child.is_some() {
            warn!(agent_id = %self.config.agent_id, "session already running");
            return false;
        }

        let mcp_config_path = match generate_mcp_config(
            &self.config.agent_id,
            self.tool_server_port,
            &self.state_dir,
            false,
        ) {
            Ok(path) => path,
            Err(err) => {
                error!(agent_id = %self.config.agent_id, %err, "failed to write mcp config");
                return false;
            }
        };

        if self.config.skip_permissions {
            if let Err(err) =
                log_permissions_audit(&self.state_dir, &self.config.agent_id, &self.config.role, "user")
            {
                warn!(%err, "failed to append permissions audit log");
            }
        }

        let args = build_claude_args(
            &self.config.model,
            &mcp_config_path.to_string_lossy(),
            self.config.skip_permissions,
            initial_prompt,
            resume_from,
        );

        info!(agent_id = %self.config.agent_id, "spawning session");
        let mut child = match Command::new("claude")
            .args(&args)
            .current_dir(&self.config.workspace)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                error!(agent_id = %self.config.agent_id, %err, "failed to spawn claude CLI");
                return false;
            }
        };

        let pid = child.id();
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                error!(agent_id = %self.config.agent_id, "child has no stdout");
                return false;
            }
        };

        if let Some(pid) = pid {
            let _ = self
                .state
                .update_agent(
                    &self.config.agent_id,
                    AgentPatch {
                        status: Some(AgentStatus::Working),
                        pid: Some(pid),
                        ..Default::default()
                    },
                )
                .await;
        }
        self.tracker.register_agent(&self.config.agent_id, &self.config.model).await;

        self.output_task = Some(tokio::spawn(process_output(
            self.config.agent_id.clone(),
            self.tracker.clone(),
            stdout,
            self.session_id.clone(),
            self.on_output.clone(),
        )));
        self.child = Some(child);
        true
    }

    async fn stop(&mut self, grace: Duration) -> bool {
        let Some(mut child) = self.child.take() else {
            return true;
        };

        info!(agent_id = %self.config.agent_id, "stopping session");
        if let Some(pid) = child.id() {
            // SAFETY: pid came from this tokio::process::Child we still own;
            // SIGTERM is a non-destructive request for orderly shutdown.
            let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if ret != 0 {
                warn!(agent_id = %self.config.agent_id, "SIGTERM delivery failed, will force kill on timeout");
            }
        }

        if tokio::time::timeout(grace, child.wait()).await.is_err() {
            warn!(agent_id = %self.config.agent_id, "did not terminate gracefully, killing");
            let _ = child.kill().await;
            let _ = child.wait().await;
        }

        if let Some(task) = self.output_task.take() {
            task.abort();
        }
        true
    }

    async fn wait(&mut self) -> Option<i32> {
        let mut child = self.child.take()?;
        let status = child.wait().await.ok()?;
        let exit_code = status.code().unwrap_or(-1);

        if let Some(task) = self.output_task.take() {
            let _ = task.await;
        }

        let session_id = self.session_id.lock().await.clone();
        if let Some(session_id) = session_id {
            let _ = self
                .state
                .update_agent(
                    &self.config.agent_id,
                    AgentPatch { session_id: Some(session_id), ..Default::default() },
                )
                .await;
        }

        if exit_code == 0 {
            let _ = self
                .state
                .update_agent(&self.config.agent_id, AgentPatch::status(AgentStatus::Done))
                .await;
        } else {
            let _ = self
                .state
                .update_agent(&self.config.agent_id, AgentPatch::status(AgentStatus::Error))
                .await;
            self.state
                .add_message(
                    "harness",
                    ARCHIE,
                    &format!(
                        "Agent {} exited unexpectedly with code {}. Check state/agents.json for details.",
                        self.config.agent_id, exit_code
                    ),
                )
                .await;
        }

        if let Some(sender) = &self.on_exit {
            let _ = sender.send((self.config.agent_id.clone(), exit_code));
        }

        Some(exit_code)
    }
}

/// Reads stdout line by line until the child closes it, forwarding every
/// non-`usage` event to `on_output` and capturing the latest `result`
/// event's session id. Malformed lines are discarded silently.
async fn process_output(
    agent_id: String,
    tracker: Arc<TokenTracker>,
    stdout: tokio::process::ChildStdout,
    session_id: Arc<Mutex<Option<String>>>,
    on_output: Option<UnboundedSender<serde_json::Value>>,
) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                if let Some(result_session_id) = tracker.parse_stream_line(&agent_id, line).await {
                    *session_id.lock().await = Some(result_session_id);
                }

                if let Ok(event) = serde_json::from_str::<serde_json::Value>(line) {
                    let kind = event.get("type").and_then(|v| v.as_str()).unwrap_or("");
                    if kind != "usage" {
                        if let Some(sender) = &on_output {
                            let _ = sender.send(event);
                        }
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                error!(agent_id, %err, "error reading child stdout");
                break;
            }
        }
    }
}
