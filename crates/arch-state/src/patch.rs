//! Patch types for `update_agent`/`update_task`.
//!
//! A patch only touches the fields it sets. `usage` and `context` are merged
//! into the existing sub-record rather than replacing it, matching the
//! source model's `agent["usage"].update(...)` / dict-merge behavior.

use crate::entities::{AgentStatus, SavedContext, TaskStatus, Usage};

#[derive(Debug, Clone, Default)]
pub struct AgentPatch {
    pub status: Option<AgentStatus>,
    pub task: Option<String>,
    pub session_id: Option<String>,
    pub pid: Option<u32>,
    pub container_name: Option<String>,
    /// Replacement usage record. The caller (the usage sink) is expected to
    /// supply the already-accumulated totals; the store does not add to a
    /// prior value itself — it merges this sub-record into the agent row
    /// without disturbing the agent's other fields.
    pub usage: Option<Usage>,
    pub context: Option<SavedContext>,
}

impl AgentPatch {
    pub fn status(status: AgentStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub description: Option<String>,
}
