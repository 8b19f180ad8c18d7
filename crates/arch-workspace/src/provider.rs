use std::path::PathBuf;

use async_trait::async_trait;

use crate::brief::AgentBrief;
use crate::error::WorkspaceError;

/// Result of opening an out-of-band review request for an agent's branch.
#[derive(Debug, Clone)]
pub struct UpstreamReview {
    pub url: String,
    pub number: String,
}

/// Isolation primitive the Orchestrator depends on (C3). Implementations own
/// the lifecycle of one working copy per agent; the Orchestrator never
/// touches the filesystem or VCS directly.
#[async_trait]
pub trait WorkspaceProvider: Send + Sync {
    /// Create a fresh isolated working copy for `agent_id`, branched from
    /// `base_ref` (or the provider's default base when `None`). Fails if a
    /// workspace already exists for this id.
    async fn create(&self, agent_id: &str, base_ref: Option<&str>) -> Result<PathBuf, WorkspaceError>;

    /// Write the brief document into an existing workspace, returning its path.
    async fn write_agent_brief(&self, agent_id: &str, brief: &AgentBrief) -> Result<PathBuf, WorkspaceError>;

    /// Remove the workspace. Idempotent: returns `Ok(false)` if none existed.
    /// `force` drops uncommitted work.
    async fn remove(&self, agent_id: &str, force: bool) -> Result<bool, WorkspaceError>;

    /// Integrate the agent's branch into `target_ref` with a non-fast-forward
    /// commit.
    async fn merge(&self, agent_id: &str, target_ref: &str, summary: Option<&str>) -> Result<(), WorkspaceError>;

    /// Push the agent's branch and open an out-of-band review request
    /// against `target_ref`. Optional: a provider may not support this.
    async fn request_upstream_review(
        &self,
        agent_id: &str,
        title: &str,
        body: &str,
        target_ref: &str,
    ) -> Result<UpstreamReview, WorkspaceError>;

    /// Path to an existing workspace, or `None` if not created.
    fn workspace_path(&self, agent_id: &str) -> Option<PathBuf>;
}
