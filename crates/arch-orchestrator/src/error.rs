use thiserror::Error;

/// Only the variants reachable from the startup gates are fatal; everything
/// else is converted to a `{error: "..."}` tool-result payload before it
/// crosses the Tool Server boundary (§7).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("configuration error: {0}")]
    Config(#[from] arch_config::ConfigError),
    #[error("{0} is not a version-controlled working tree")]
    NotARepo(std::path::PathBuf),
    #[error("container runtime unavailable: {0}")]
    ContainerGate(String),
    #[error("state store error: {0}")]
    State(#[from] arch_state::StateError),
    #[error("tool server failed to bind {0}: {1}")]
    Bind(String, std::io::Error),
    #[error("unknown role '{0}'")]
    UnknownRole(String),
    #[error("role '{0}' has reached its max-instance limit")]
    MaxInstances(String),
    #[error("skip_permissions requested but forbidden for role '{0}'")]
    SkipPermissionsForbidden(String),
    #[error("agent '{0}' not found")]
    AgentNotFound(String),
    #[error("archie cannot be torn down")]
    CannotTeardownArchie,
    #[error("failed to spawn agent '{0}'")]
    SpawnFailed(String),
    #[error("workspace error: {0}")]
    Workspace(#[from] arch_workspace::WorkspaceError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
