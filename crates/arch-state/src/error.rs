use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("agent '{0}' is already registered")]
    AgentAlreadyRegistered(String),
    #[error("agent '{0}' not found")]
    AgentNotFound(String),
    #[error("invalid agent status '{0}'")]
    InvalidAgentStatus(String),
    #[error("invalid task status '{0}'")]
    InvalidTaskStatus(String),
    #[error("failed to snapshot {collection}: {source}")]
    SnapshotWrite {
        collection: &'static str,
        #[source]
        source: std::io::Error,
    },
}
