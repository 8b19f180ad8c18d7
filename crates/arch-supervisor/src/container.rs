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

use crate::config::{container_name, AgentConfig, ContainerRuntimeConfig};
use crate::error::SupervisorError;
use crate::mcp_config::{generate_mcp_config, log_permissions_audit};
use crate::supervisor::{build_claude_args, AgentSupervisor};

const PULL_TIMEOUT: Duration = Duration::from_secs(300);
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// `docker info`; fails fast when the daemon isn't reachable.
pub async fn check_docker_available() -> Result<(), SupervisorError> {
    let output = tokio::time::timeout(PROBE_TIMEOUT, Command::new("docker").arg("info").output())
        .await
        .map_err(|_| SupervisorError::DockerUnavailable("docker info timed out".into()))?
        .map_err(|err| SupervisorError::DockerUnavailable(format!("docker CLI not found: {err}")))?;

    if output.status.success() {
        Ok(())
    } else {
        Err(SupervisorError::DockerUnavailable(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}

pub async fn check_image_exists(image: &str) -> bool {
    tokio::time::timeout(PROBE_TIMEOUT, Command::new("docker").args(["image", "inspect", image]).output())
        .await
        .ok()
        .and_then(|r| r.ok())
        .map(|output| output.status.success())
        .unwrap_or(false)
}

pub async fn pull_image(image: &str) -> Result<(), SupervisorError> {
    info!(image, "pulling docker image");
    let output = tokio::time::timeout(PULL_TIMEOUT, Command::new("docker").args(["pull", image]).output())
        .await
        .map_err(|_| SupervisorError::DockerUnavailable(format!("pull timed out for {image}")))?
        .map_err(|err| SupervisorError::DockerUnavailable(format!("pull failed: {err}")))?;

    if output.status.success() {
        Ok(())
    } else {
        Err(SupervisorError::DockerUnavailable(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}

fn build_docker_command(
    agent_id: &str,
    runtime: &ContainerRuntimeConfig,
    workspace: &str,
    mcp_config_path: &str,
    claude_args: &[String],
) -> Vec<String> {
    let mut cmd = vec![
        "run".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        container_name(agent_id),
        "-v".to_string(),
        format!("{workspace}:/workspace"),
        "-v".to_string(),
        format!("{mcp_config_path}:/arch/mcp-config.json:ro"),
        "-w".to_string(),
        "/workspace".to_string(),
        "--add-host".to_string(),
        "host.docker.internal:host-gateway".to_string(),
    ];

    if let Ok(api_key) = std::env::var("ANTHROPIC_API_KEY") {
        if !api_key.is_empty() {
            cmd.push("-e".to_string());
            cmd.push(format!("ANTHROPIC_API_KEY={api_key}"));
        }
    } else {
        warn!("ANTHROPIC_API_KEY not set in environment");
    }

    if let Some(memory) = &runtime.memory_limit {
        cmd.push("--memory".to_string());
        cmd.push(memory.clone());
    }
    if let Some(cpus) = runtime.cpus {
        cmd.push("--cpus".to_string());
        cmd.push(cpus.to_string());
    }
    match runtime.network.as_str() {
        "none" => {
            cmd.push("--network".to_string());
            cmd.push("none".to_string());
        }
        "host" => {
            cmd.push("--network".to_string());
            cmd.push("host".to_string());
        }
        _ => {}
    }
    for mount in &runtime.extra_mounts {
        cmd.push("-v".to_string());
        cmd.push(format!("{mount}:{mount}:ro"));
    }

    cmd.push(runtime.image.clone());
    cmd.extend(claude_args.iter().cloned());
    cmd
}

/// Container Adapter (C5): behaviorally identical to [`crate::LocalSupervisor`]
/// but runs the child inside a Docker container via the external `docker`
/// binary.
pub struct ContainerSupervisor {
    config: AgentConfig,
    runtime: ContainerRuntimeConfig,
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

impl ContainerSupervisor {
    pub fn new(
        config: AgentConfig,
        runtime: ContainerRuntimeConfig,
        state: Arc<StateStore>,
        tracker: Arc<TokenTracker>,
        state_dir: PathBuf,
        tool_server_port: u16,
    ) -> Self {
        Self {
            config,
            runtime,
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
impl AgentSupervisor for ContainerSupervisor {
    async fn spawn(&mut self, initial_prompt: &str, resume_from: Option<&str>) -> bool {
        if self.child.is_some() {
            warn!(agent_id = %self.config.agent_id, "container already running");
            return false;
        }

        if let Err(err) = check_docker_available().await {
            error!(agent_id = %self.config.agent_id, %err, "docker unavailable");
            return false;
        }

        if !check_image_exists(&self.runtime.image).await {
            warn!(image = %self.runtime.image, "image not found locally, attempting pull");
            if let Err(err) = pull_image(&self.runtime.image).await {
                error!(%err, "image pull failed");
                return false;
            }
        }

        let mcp_config_path = match generate_mcp_config(
            &self.config.agent_id,
            self.tool_server_port,
            &self.state_dir,
            true,
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

        let claude_args = build_claude_args(
            &self.config.model,
            "/arch/mcp-config.json",
            self.config.skip_permissions,
            initial_prompt,
            resume_from,
        );
        let docker_args = build_docker_command(
            &self.config.agent_id,
            &self.runtime,
            &self.config.workspace,
            &mcp_config_path.to_string_lossy(),
            &claude_args,
        );

        info!(agent_id = %self.config.agent_id, container = %container_name(&self.config.agent_id), "spawning container");
        let mut child = match Command::new("docker")
            .args(&docker_args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                error!(agent_id = %self.config.agent_id, %err, "failed to spawn container");
                return false;
            }
        };

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                error!(agent_id = %self.config.agent_id, "container has no stdout");
                return false;
            }
        };

        let _ = self
            .state
            .update_agent(
                &self.config.agent_id,
                AgentPatch {
                    status: Some(AgentStatus::Working),
                    container_name: Some(container_name(&self.config.agent_id)),
                    ..Default::default()
                },
            )
            .await;
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
        if self.child.is_none() {
            return true;
        }

        let name = container_name(&self.config.agent_id);
        info!(agent_id = %self.config.agent_id, container = %name, "stopping container");

        let stopped = Command::new("docker")
            .args(["stop", "-t", &grace.as_secs().to_string(), &name])
            .output()
            .await;
        if let Err(err) = stopped {
            warn!(%err, "docker stop failed to launch");
        }

        if let Some(mut child) = self.child.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
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
                error!(agent_id, %err, "error reading container stdout");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_command_mounts_workspace_and_config() {
        let runtime = ContainerRuntimeConfig::default();
        let args = build_docker_command(
            "fe-1",
            &runtime,
            "/repo/.worktrees/fe-1",
            "/state/fe-1-mcp.json",
            &["--print".to_string()],
        );
        assert!(args.contains(&"/repo/.worktrees/fe-1:/workspace".to_string()));
        assert!(args.contains(&"arch-agent:latest".to_string()));
        assert!(args.contains(&"--add-host".to_string()));
    }

    #[test]
    fn docker_command_applies_resource_limits() {
        let runtime = ContainerRuntimeConfig {
            memory_limit: Some("2g".to_string()),
            cpus: Some(1.5),
            network: "none".to_string(),
            ..ContainerRuntimeConfig::default()
        };
        let args = build_docker_command("fe-1", &runtime, "/ws", "/cfg.json", &[]);
        assert!(args.contains(&"--memory".to_string()));
        assert!(args.contains(&"2g".to_string()));
        assert!(args.contains(&"--network".to_string()));
        assert!(args.contains(&"none".to_string()));
    }
}
