use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("{0}")]
    SpawnFailed(String),
    #[error("docker is not available: {0}")]
    DockerUnavailable(String),
    #[error("failed to write mcp config: {0}")]
    Io(#[from] std::io::Error),
}
