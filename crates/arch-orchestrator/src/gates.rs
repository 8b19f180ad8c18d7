use std::time::Duration;

use arch_config::ArchConfig;
use arch_supervisor::{check_docker_available, check_image_exists, pull_image};
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::OrchestratorError;

/// Startup gate 3: the configured repo must be a version-controlled working
/// tree. Fatal if not.
pub async fn check_repo_gate(repo: &std::path::Path) -> Result<(), OrchestratorError> {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(["rev-parse", "--is-inside-work-tree"])
        .output()
        .await?;
    if output.status.success() {
        Ok(())
    } else {
        Err(OrchestratorError::NotARepo(repo.to_path_buf()))
    }
}

/// Startup gate 4: pool entries allowed to skip permissions. An empty result
/// means the interactive confirmation step is skipped entirely.
pub fn check_permission_gate(config: &ArchConfig) -> Vec<String> {
    config
        .agent_pool
        .iter()
        .filter(|e| e.allow_skip_permissions)
        .map(|e| e.id.clone())
        .collect()
}

/// Startup gate 5: every sandboxed pool entry needs a reachable runtime and
/// an available image (pulling it if missing). Fatal on runtime absence.
pub async fn check_container_gate(config: &ArchConfig) -> Result<(), OrchestratorError> {
    let sandboxed: Vec<_> = config.agent_pool.iter().filter(|e| e.sandboxed).collect();
    if sandboxed.is_empty() {
        return Ok(());
    }

    check_docker_available()
        .await
        .map_err(|e| OrchestratorError::ContainerGate(e.to_string()))?;

    for entry in sandboxed {
        let image = &entry.container.image;
        if !check_image_exists(image).await {
            info!(image, "pulling missing container image");
            pull_image(image)
                .await
                .map_err(|e| OrchestratorError::ContainerGate(e.to_string()))?;
        }
    }
    Ok(())
}

/// Startup gate 6: tracker integration. Failure here is non-fatal — it only
/// disables the `issue_*`/`milestone_*` tools, so this returns a plain bool
/// rather than a `Result`.
pub async fn check_tracker_gate(config: &ArchConfig) -> bool {
    let Some(repo) = &config.github_repo else {
        return false;
    };
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        Command::new("gh").args(["repo", "view", repo]).output(),
    )
    .await;
    match result {
        Ok(Ok(output)) if output.status.success() => true,
        Ok(Ok(output)) => {
            warn!(repo, stderr = %String::from_utf8_lossy(&output.stderr), "tracker gate failed, disabling tracker tools");
            false
        }
        _ => {
            warn!(repo, "gh not reachable, disabling tracker tools");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use arch_config::{ArchConfig, ContainerConfig, PoolEntry, ProjectConfig};

    use super::*;

    fn config_with_entries(entries: Vec<PoolEntry>) -> ArchConfig {
        ArchConfig {
            project: ProjectConfig { name: "Test".into(), description: String::new(), repo: ".".into() },
            state_dir: "./state".into(),
            tool_server: Default::default(),
            agent_pool: entries,
            archie: Default::default(),
            keep_workspaces: false,
            pricing_file: None,
            github_repo: None,
        }
    }

    fn entry(id: &str) -> PoolEntry {
        PoolEntry {
            id: id.into(),
            persona: "p.md".into(),
            model: "claude-sonnet-4-6".into(),
            max_instances: 1,
            sandboxed: false,
            allow_skip_permissions: false,
            container: ContainerConfig::default(),
        }
    }

    #[test]
    fn permission_gate_is_empty_with_no_skip_permission_entries() {
        let config = config_with_entries(vec![entry("a"), entry("b")]);
        assert!(check_permission_gate(&config).is_empty());
    }

    #[test]
    fn permission_gate_lists_entries_allowing_skip() {
        let mut dangerous = entry("dangerous");
        dangerous.allow_skip_permissions = true;
        let config = config_with_entries(vec![entry("safe"), dangerous]);
        assert_eq!(check_permission_gate(&config), vec!["dangerous".to_string()]);
    }

    #[tokio::test]
    async fn container_gate_is_a_noop_with_no_sandboxed_entries() {
        let config = config_with_entries(vec![entry("a")]);
        assert!(check_container_gate(&config).await.is_ok());
    }

    #[tokio::test]
    async fn tracker_gate_is_false_when_unconfigured() {
        let config = config_with_entries(vec![]);
        assert!(!check_tracker_gate(&config).await);
    }
}
