//! Entity types held by the [`crate::StateStore`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Agent status. Transitions are validated before every mutation (invariant a).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Working,
    Blocked,
    WaitingReview,
    Done,
    Error,
}

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub description: String,
    pub repo: String,
    pub started_at: Option<DateTime<Utc>>,
}

/// Running token/cost accumulator for one agent. Mirrors the four counters
/// a usage event carries plus a derived cost, per §4.2.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub turns: u64,
    pub cost_usd: f64,
}

/// Structured blob written by a worker via `save_progress`. All fields are
/// optional; an update *merges* into the existing blob rather than replacing
/// it (§4.1, `update_agent`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SavedContext {
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub progress: Option<String>,
    #[serde(default)]
    pub next_steps: Option<String>,
    #[serde(default)]
    pub blockers: Option<String>,
    #[serde(default)]
    pub decisions: Vec<String>,
}

impl SavedContext {
    /// Merge `other` into `self`: scalar fields overwrite when present,
    /// vector fields extend.
    pub fn merge(&mut self, other: SavedContext) {
        self.files_modified.extend(other.files_modified);
        if other.progress.is_some() {
            self.progress = other.progress;
        }
        if other.next_steps.is_some() {
            self.next_steps = other.next_steps;
        }
        if other.blockers.is_some() {
            self.blockers = other.blockers;
        }
        self.decisions.extend(other.decisions);
    }
}

/// How an agent's child process is being run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessHandle {
    pub pid: Option<u32>,
    pub container_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub role: String,
    pub status: AgentStatus,
    pub task: String,
    pub session_id: Option<String>,
    pub workspace: String,
    pub process: Option<ProcessHandle>,
    pub sandboxed: bool,
    pub skip_permissions: bool,
    pub spawned_at: DateTime<Utc>,
    pub usage: Usage,
    pub context: Option<SavedContext>,
}

/// A single entry in the ordered message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub from: String,
    pub to: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

/// The reserved recipient name that fans a message out to every agent.
pub const BROADCAST: &str = "broadcast";
/// Archie's fixed agent id.
pub const ARCHIE: &str = "archie";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingDecision {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    pub asked_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub answer: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub assigned_to: String,
    pub description: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Everything the store holds, as it appears on disk and in memory.
/// `agents` is keyed by agent id to give O(1) `update_agent`/`remove_agent`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FullState {
    pub project: Project,
    pub agents: HashMap<String, Agent>,
    pub messages: Vec<Message>,
    pub pending_decisions: Vec<PendingDecision>,
    pub tasks: Vec<Task>,
}
