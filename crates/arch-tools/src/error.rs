use thiserror::Error;

/// Returned as a structured `{error: "..."}` tool-result payload; never
/// surfaced as an HTTP error status, per the tool-server's framing.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("access denied")]
    AccessDenied,
    #[error("missing required argument '{0}'")]
    MissingArgument(&'static str),
    #[error("invalid value for '{field}': {reason}")]
    InvalidArgument { field: &'static str, reason: String },
    #[error("{0}")]
    State(#[from] arch_state::StateError),
    #[error("{0}")]
    Workspace(#[from] arch_workspace::WorkspaceError),
    #[error("orchestrator callback not configured for '{0}'")]
    CallbackNotConfigured(&'static str),
    #[error("{0}")]
    Orchestrator(String),
}

impl ToolError {
    /// Render as the `{error: "..."}` payload the spec mandates for every
    /// tool failure, including access-denial (which never reveals whether
    /// the name exists in the larger capability set).
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.to_string() })
    }
}
