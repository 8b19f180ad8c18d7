use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("workspace already exists for agent '{0}'")]
    AlreadyExists(String),
    #[error("workspace does not exist for agent '{0}'")]
    NotFound(String),
    #[error("not a git repository: {0}")]
    NotARepo(String),
    #[error("git {op} failed: {stderr}")]
    GitCommand { op: &'static str, stderr: String },
    #[error("failed to spawn git: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
