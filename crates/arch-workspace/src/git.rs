use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::brief::AgentBrief;
use crate::error::WorkspaceError;
use crate::provider::{UpstreamReview, WorkspaceProvider};

const WORKTREE_DIR: &str = ".worktrees";
const BRANCH_PREFIX: &str = "agent";
pub const BRIEF_FILENAME: &str = "AGENT_BRIEF.md";

/// Default [`WorkspaceProvider`]: one git worktree per agent, on a branch
/// named `agent/<agent_id>`, managed by shelling out to the `git` binary.
pub struct GitWorkspaceProvider {
    repo_path: PathBuf,
}

impl GitWorkspaceProvider {
    /// `repo_path` must already be a git checkout; callers run a
    /// version-control gate at startup before constructing this.
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self { repo_path: repo_path.into() }
    }

    fn worktree_base(&self) -> PathBuf {
        self.repo_path.join(WORKTREE_DIR)
    }

    fn worktree_path(&self, agent_id: &str) -> PathBuf {
        self.worktree_base().join(agent_id)
    }

    fn branch_name(agent_id: &str) -> String {
        format!("{BRANCH_PREFIX}/{agent_id}")
    }

    async fn git(&self, cwd: &Path, args: &[&str], op: &'static str) -> Result<Output, WorkspaceError> {
        debug!(?args, op, "git");
        let output = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .output()
            .await
            .map_err(WorkspaceError::Spawn)?;
        if !output.status.success() {
            return Err(WorkspaceError::GitCommand {
                op,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl WorkspaceProvider for GitWorkspaceProvider {
    async fn create(&self, agent_id: &str, base_ref: Option<&str>) -> Result<PathBuf, WorkspaceError> {
        let worktree_path = self.worktree_path(agent_id);
        if worktree_path.exists() {
            return Err(WorkspaceError::AlreadyExists(agent_id.to_string()));
        }
        std::fs::create_dir_all(self.worktree_base())?;

        let branch = Self::branch_name(agent_id);
        let path_str = worktree_path.to_string_lossy().into_owned();
        let mut args = vec!["worktree", "add", path_str.as_str(), "-b", branch.as_str()];
        if let Some(base) = base_ref {
            args.push(base);
        }
        self.git(&self.repo_path, &args, "worktree add").await?;

        Ok(worktree_path)
    }

    async fn write_agent_brief(&self, agent_id: &str, brief: &AgentBrief) -> Result<PathBuf, WorkspaceError> {
        let worktree_path = self.worktree_path(agent_id);
        if !worktree_path.exists() {
            return Err(WorkspaceError::NotFound(agent_id.to_string()));
        }
        let brief_path = worktree_path.join(BRIEF_FILENAME);
        std::fs::write(&brief_path, brief.render())?;
        Ok(brief_path)
    }

    async fn remove(&self, agent_id: &str, force: bool) -> Result<bool, WorkspaceError> {
        let worktree_path = self.worktree_path(agent_id);
        if !worktree_path.exists() {
            return Ok(false);
        }

        let path_str = worktree_path.to_string_lossy().into_owned();
        let mut args = vec!["worktree", "remove", path_str.as_str()];
        if force {
            args.push("--force");
        }
        self.git(&self.repo_path, &args, "worktree remove").await?;

        let branch = Self::branch_name(agent_id);
        if let Err(err) = self.git(&self.repo_path, &["branch", "-D", &branch], "branch -D").await {
            warn!(%err, agent_id, "branch deletion failed, ignoring");
        }

        Ok(true)
    }

    async fn merge(&self, agent_id: &str, target_ref: &str, summary: Option<&str>) -> Result<(), WorkspaceError> {
        let worktree_path = self.worktree_path(agent_id);
        if !worktree_path.exists() {
            return Err(WorkspaceError::NotFound(agent_id.to_string()));
        }
        let branch = Self::branch_name(agent_id);

        self.git(&self.repo_path, &["checkout", target_ref], "checkout").await?;

        let mut message = format!("Merge {agent_id}");
        if let Some(summary) = summary {
            message.push_str(": ");
            message.push_str(summary);
        }
        self.git(
            &self.repo_path,
            &["merge", "--no-ff", &branch, "-m", &message],
            "merge",
        )
        .await?;

        Ok(())
    }

    async fn request_upstream_review(
        &self,
        agent_id: &str,
        title: &str,
        body: &str,
        target_ref: &str,
    ) -> Result<UpstreamReview, WorkspaceError> {
        let worktree_path = self.worktree_path(agent_id);
        if !worktree_path.exists() {
            return Err(WorkspaceError::NotFound(agent_id.to_string()));
        }
        let branch = Self::branch_name(agent_id);

        self.git(&self.repo_path, &["push", "-u", "origin", &branch], "push").await?;

        let gh_output = Command::new("gh")
            .args([
                "pr", "create", "--title", title, "--body", body, "--head", &branch, "--base", target_ref,
            ])
            .current_dir(&self.repo_path)
            .output()
            .await
            .map_err(WorkspaceError::Spawn)?;

        if !gh_output.status.success() {
            return Err(WorkspaceError::GitCommand {
                op: "gh pr create",
                stderr: String::from_utf8_lossy(&gh_output.stderr).trim().to_string(),
            });
        }

        let url = String::from_utf8_lossy(&gh_output.stdout).trim().to_string();
        let number = url.rsplit('/').next().unwrap_or_default().to_string();
        Ok(UpstreamReview { url, number })
    }

    fn workspace_path(&self, agent_id: &str) -> Option<PathBuf> {
        let path = self.worktree_path(agent_id);
        path.join(".git").exists().then_some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::process::Command as TokioCommand;

    async fn init_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let run = |args: &'static [&'static str]| {
            let dir = dir.path().to_path_buf();
            async move {
                TokioCommand::new("git")
                    .args(args)
                    .current_dir(&dir)
                    .output()
                    .await
                    .unwrap()
            }
        };
        run(&["init", "-q"]).await;
        run(&["config", "user.email", "test@example.com"]).await;
        run(&["config", "user.name", "Test"]).await;
        std::fs::write(dir.path().join("README.md"), "hello").unwrap();
        run(&["add", "."]).await;
        run(&["commit", "-q", "-m", "initial"]).await;
        run(&["branch", "-M", "main"]).await;
        dir
    }

    #[tokio::test]
    async fn create_then_remove_round_trips() {
        let repo = init_repo().await;
        let provider = GitWorkspaceProvider::new(repo.path());

        let path = provider.create("fe-1", Some("main")).await.unwrap();
        assert!(path.join(".git").exists());
        assert!(provider.workspace_path("fe-1").is_some());

        assert!(provider.remove("fe-1", true).await.unwrap());
        assert!(provider.workspace_path("fe-1").is_none());
    }

    #[tokio::test]
    async fn create_twice_fails() {
        let repo = init_repo().await;
        let provider = GitWorkspaceProvider::new(repo.path());
        provider.create("fe-1", Some("main")).await.unwrap();
        let err = provider.create("fe-1", Some("main")).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn remove_nonexistent_returns_false() {
        let repo = init_repo().await;
        let provider = GitWorkspaceProvider::new(repo.path());
        assert!(!provider.remove("ghost", true).await.unwrap());
    }

    #[tokio::test]
    async fn write_agent_brief_requires_existing_workspace() {
        let repo = init_repo().await;
        let provider = GitWorkspaceProvider::new(repo.path());
        let brief = AgentBrief {
            agent_id: "fe-1".into(),
            persona_text: "persona".into(),
            project_name: "P".into(),
            project_description: "d".into(),
            workspace_path: "/x".into(),
            assignment: "do it".into(),
            active_team: vec![],
            available_tools: vec![],
            prior_context: None,
        };
        let err = provider.write_agent_brief("fe-1", &brief).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::NotFound(_)));
    }

    #[tokio::test]
    async fn merge_integrates_agent_branch() {
        let repo = init_repo().await;
        let provider = GitWorkspaceProvider::new(repo.path());
        let path = provider.create("fe-1", Some("main")).await.unwrap();
        std::fs::write(path.join("feature.txt"), "work").unwrap();
        TokioCommand::new("git")
            .args(["add", "."])
            .current_dir(&path)
            .output()
            .await
            .unwrap();
        TokioCommand::new("git")
            .args(["commit", "-q", "-m", "feature work"])
            .current_dir(&path)
            .output()
            .await
            .unwrap();

        provider.merge("fe-1", "main", Some("adds feature")).await.unwrap();
        assert!(repo.path().join("feature.txt").exists());
    }
}
