use async_trait::async_trait;
use serde::Serialize;

use crate::error::ToolError;

#[derive(Debug, Serialize)]
pub struct SpawnResult {
    pub agent_id: String,
    pub workspace_path: String,
    pub sandboxed: bool,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum MergeResult {
    Merged { agent_id: String },
    UpstreamReview { url: String, number: String },
}

/// The orchestrator-owned operations Archie-only tools invoke. Kept as a
/// trait here rather than a direct dependency so `arch-tools` does not need
/// to depend on `arch-orchestrator` (which depends on `arch-tools` for its
/// Tool Server).
#[async_trait]
pub trait OrchestratorHandle: Send + Sync {
    async fn spawn_agent(
        &self,
        role: &str,
        assignment: &str,
        context: Option<serde_json::Value>,
        skip_permissions: bool,
    ) -> Result<SpawnResult, ToolError>;

    async fn teardown_agent(&self, agent_id: &str, reason: Option<&str>) -> Result<(), ToolError>;

    async fn request_merge(
        &self,
        agent_id: &str,
        target_branch: Option<&str>,
        pr_title: Option<&str>,
        pr_body: Option<&str>,
    ) -> Result<MergeResult, ToolError>;

    async fn close_project(&self, summary: &str) -> Result<(), ToolError>;
}
