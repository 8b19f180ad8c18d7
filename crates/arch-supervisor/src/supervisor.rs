use std::time::Duration;

use async_trait::async_trait;

/// Owns one child-process lifecycle (C4 Session Supervisor / C5 Container
/// Adapter). Both concrete implementations expose the same interface so the
/// Orchestrator can pick an adapter per agent purely from configuration.
#[async_trait]
pub trait AgentSupervisor: Send + Sync {
    /// Spawn the child. Returns `false` (not an error) if already running or
    /// if the child failed to start; the caller is expected to surface that
    /// as a tool-error payload rather than treat it as fatal.
    async fn spawn(&mut self, initial_prompt: &str, resume_from: Option<&str>) -> bool;

    /// Request orderly termination; force-kill if the child outlives `grace`.
    async fn stop(&mut self, grace: Duration) -> bool;

    /// Wait for the child to exit and return its status code, if it was
    /// ever spawned.
    async fn wait(&mut self) -> Option<i32>;
}

pub(crate) fn build_claude_args(
    model: &str,
    mcp_config_path: &str,
    skip_permissions: bool,
    prompt: &str,
    resume_from: Option<&str>,
) -> Vec<String> {
    let mut args = vec![
        "--model".to_string(),
        model.to_string(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--mcp-config".to_string(),
        mcp_config_path.to_string(),
        "--print".to_string(),
    ];
    if skip_permissions {
        args.push("--dangerously-skip-permissions".to_string());
    }
    match resume_from {
        Some(session_id) => {
            args.push("--resume".to_string());
            args.push(session_id.to_string());
        }
        None => args.push(prompt.to_string()),
    }
    args
}
