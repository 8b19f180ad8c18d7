use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::entities::{
    Agent, AgentStatus, FullState, Message, PendingDecision, ProcessHandle, Project, Task,
    TaskStatus, BROADCAST,
};
use crate::error::StateError;
use crate::patch::{AgentPatch, TaskPatch};

fn generate_short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Single source of truth for all runtime state (C1).
///
/// Held behind one `tokio::sync::Mutex`: every operation is short, never
/// awaits while the guard is held, and snapshots the affected collections to
/// `state_dir` via temp-file-then-rename before returning.
pub struct StateStore {
    state_dir: PathBuf,
    inner: Mutex<Inner>,
}

struct Inner {
    state: FullState,
    cursors: HashMap<String, u64>,
    next_message_id: AtomicU64,
}

impl StateStore {
    /// Open (and, if present, reload) the store rooted at `state_dir`.
    pub async fn open(state_dir: impl Into<PathBuf>) -> Result<Self, StateError> {
        let state_dir = state_dir.into();
        std::fs::create_dir_all(&state_dir).map_err(|source| StateError::SnapshotWrite {
            collection: "state_dir",
            source,
        })?;

        let mut state = FullState::default();
        if let Some(project) = load_json(&state_dir, "project") {
            state.project = project;
        }
        if let Some(agents) = load_json(&state_dir, "agents") {
            state.agents = agents;
        }
        if let Some(messages) = load_json(&state_dir, "messages") {
            state.messages = messages;
        }
        if let Some(decisions) = load_json(&state_dir, "pending_decisions") {
            state.pending_decisions = decisions;
        }
        if let Some(tasks) = load_json(&state_dir, "tasks") {
            state.tasks = tasks;
        }
        let cursors = load_json::<HashMap<String, u64>>(&state_dir, "cursors").unwrap_or_default();
        let next_id = state.messages.iter().map(|m| m.id).max().unwrap_or(0) + 1;

        Ok(Self {
            state_dir,
            inner: Mutex::new(Inner {
                state,
                cursors,
                next_message_id: AtomicU64::new(next_id),
            }),
        })
    }

    // --- Project ---

    pub async fn init_project(&self, name: &str, description: &str, repo: &str) {
        let mut guard = self.inner.lock().await;
        guard.state.project = Project {
            name: name.to_string(),
            description: description.to_string(),
            repo: repo.to_string(),
            started_at: Some(Utc::now()),
        };
        self.flush(&guard.state);
    }

    pub async fn get_project(&self) -> Project {
        self.inner.lock().await.state.project.clone()
    }

    // --- Agents ---

    pub async fn register_agent(
        &self,
        id: &str,
        role: &str,
        workspace: &str,
        sandboxed: bool,
        skip_permissions: bool,
        process: Option<ProcessHandle>,
    ) -> Result<Agent, StateError> {
        let mut guard = self.inner.lock().await;
        if guard.state.agents.contains_key(id) {
            return Err(StateError::AgentAlreadyRegistered(id.to_string()));
        }
        let agent = Agent {
            id: id.to_string(),
            role: role.to_string(),
            status: AgentStatus::Idle,
            task: String::new(),
            session_id: None,
            workspace: workspace.to_string(),
            process,
            sandboxed,
            skip_permissions,
            spawned_at: Utc::now(),
            usage: Default::default(),
            context: None,
        };
        guard.state.agents.insert(id.to_string(), agent.clone());
        self.flush(&guard.state);
        Ok(agent)
    }

    pub async fn get_agent(&self, id: &str) -> Option<Agent> {
        self.inner.lock().await.state.agents.get(id).cloned()
    }

    pub async fn list_agents(&self) -> Vec<Agent> {
        self.inner.lock().await.state.agents.values().cloned().collect()
    }

    pub async fn update_agent(
        &self,
        id: &str,
        patch: AgentPatch,
    ) -> Result<Agent, StateError> {
        let mut guard = self.inner.lock().await;
        let agent = guard
            .state
            .agents
            .get_mut(id)
            .ok_or_else(|| StateError::AgentNotFound(id.to_string()))?;

        if let Some(status) = patch.status {
            agent.status = status;
        }
        if let Some(task) = patch.task {
            agent.task = task;
        }
        if let Some(session_id) = patch.session_id {
            agent.session_id = Some(session_id);
        }
        if let Some(pid) = patch.pid {
            let handle = agent.process.get_or_insert(ProcessHandle {
                pid: None,
                container_name: None,
            });
            handle.pid = Some(pid);
        }
        if let Some(container_name) = patch.container_name {
            let handle = agent.process.get_or_insert(ProcessHandle {
                pid: None,
                container_name: None,
            });
            handle.container_name = Some(container_name);
        }
        if let Some(usage) = patch.usage {
            agent.usage = usage;
        }
        if let Some(context) = patch.context {
            agent
                .context
                .get_or_insert_with(Default::default)
                .merge(context);
        }

        let updated = agent.clone();
        self.flush(&guard.state);
        Ok(updated)
    }

    pub async fn remove_agent(&self, id: &str) -> bool {
        let mut guard = self.inner.lock().await;
        let removed = guard.state.agents.remove(id).is_some();
        if removed {
            self.flush(&guard.state);
        }
        removed
    }

    // --- Messages ---

    pub async fn add_message(&self, from: &str, to: &str, content: &str) -> Message {
        let mut guard = self.inner.lock().await;
        let id = guard.next_message_id.fetch_add(1, Ordering::SeqCst);
        let message = Message {
            id,
            from: from.to_string(),
            to: to.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
            read: false,
        };
        guard.state.messages.push(message.clone());
        self.flush(&guard.state);
        message
    }

    /// Returns messages addressed to `recipient` (or broadcast) strictly
    /// after the effective cursor, and the new cursor value.
    pub async fn get_messages(
        &self,
        recipient: &str,
        since_id: Option<u64>,
        mark_read: bool,
    ) -> (Vec<Message>, Option<u64>) {
        let mut guard = self.inner.lock().await;
        let effective_since = since_id.or_else(|| guard.cursors.get(recipient).copied());

        let mut delivered = Vec::new();
        for msg in guard.state.messages.iter_mut() {
            let after_cursor = match effective_since {
                Some(cursor) => msg.id > cursor,
                None => true,
            };
            if !after_cursor {
                continue;
            }
            if msg.to == recipient || msg.to == BROADCAST {
                if mark_read {
                    msg.read = true;
                }
                delivered.push(msg.clone());
            }
        }

        let cursor = delivered.last().map(|m| m.id).or(effective_since);
        if let Some(cursor) = cursor {
            guard.cursors.insert(recipient.to_string(), cursor);
        }

        if mark_read {
            self.flush(&guard.state);
        }
        self.flush_cursors(&guard.cursors);

        (delivered, cursor)
    }

    pub async fn get_all_messages(&self) -> Vec<Message> {
        self.inner.lock().await.state.messages.clone()
    }

    // --- Pending decisions ---

    pub async fn add_pending_decision(
        &self,
        question: &str,
        options: Vec<String>,
    ) -> PendingDecision {
        let mut guard = self.inner.lock().await;
        let decision = PendingDecision {
            id: generate_short_id(),
            question: question.to_string(),
            options,
            asked_at: Utc::now(),
            answered_at: None,
            answer: None,
        };
        guard.state.pending_decisions.push(decision.clone());
        self.flush(&guard.state);
        decision
    }

    pub async fn get_pending_decisions(&self) -> Vec<PendingDecision> {
        self.inner
            .lock()
            .await
            .state
            .pending_decisions
            .iter()
            .filter(|d| d.answer.is_none())
            .cloned()
            .collect()
    }

    pub async fn answer_decision(&self, id: &str, answer: &str) -> bool {
        let mut guard = self.inner.lock().await;
        let found = guard
            .state
            .pending_decisions
            .iter_mut()
            .find(|d| d.id == id);
        match found {
            Some(decision) => {
                decision.answer = Some(answer.to_string());
                decision.answered_at = Some(Utc::now());
                self.flush(&guard.state);
                true
            }
            None => false,
        }
    }

    // --- Tasks ---

    pub async fn add_task(&self, assigned_to: &str, description: &str) -> Task {
        let mut guard = self.inner.lock().await;
        let task = Task {
            id: generate_short_id(),
            assigned_to: assigned_to.to_string(),
            description: description.to_string(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        };
        guard.state.tasks.push(task.clone());
        self.flush(&guard.state);
        task
    }

    pub async fn get_tasks(&self, assigned_to: Option<&str>, status: Option<TaskStatus>) -> Vec<Task> {
        self.inner
            .lock()
            .await
            .state
            .tasks
            .iter()
            .filter(|t| assigned_to.map_or(true, |a| t.assigned_to == a))
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect()
    }

    pub async fn update_task(&self, id: &str, patch: TaskPatch) -> Option<Task> {
        let mut guard = self.inner.lock().await;
        let task = guard.state.tasks.iter_mut().find(|t| t.id == id)?;
        if let Some(status) = patch.status {
            task.status = status;
            if status == TaskStatus::Done && task.completed_at.is_none() {
                task.completed_at = Some(Utc::now());
            }
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        let updated = task.clone();
        self.flush(&guard.state);
        Some(updated)
    }

    // --- Snapshots ---

    pub async fn full_state(&self) -> FullState {
        self.inner.lock().await.state.clone()
    }

    /// Snapshot every top-level collection. Each file is individually
    /// atomic (temp-then-rename); a reader never observes a partial file,
    /// though a crash between two of these writes can leave the files out
    /// of sync with each other — acceptable per §4.1's availability-over-
    /// durability policy.
    fn flush(&self, state: &FullState) {
        let mut errors = Vec::new();
        if let Err(e) = write_json_atomic(&self.state_dir, "project", &state.project) {
            errors.push(("project", e));
        }
        if let Err(e) = write_json_atomic(&self.state_dir, "agents", &state.agents) {
            errors.push(("agents", e));
        }
        if let Err(e) = write_json_atomic(&self.state_dir, "messages", &state.messages) {
            errors.push(("messages", e));
        }
        if let Err(e) = write_json_atomic(&self.state_dir, "pending_decisions", &state.pending_decisions) {
            errors.push(("pending_decisions", e));
        }
        if let Err(e) = write_json_atomic(&self.state_dir, "tasks", &state.tasks) {
            errors.push(("tasks", e));
        }
        for (collection, error) in errors {
            warn!(collection, %error, "failed to snapshot state");
        }
    }

    fn flush_cursors(&self, cursors: &HashMap<String, u64>) {
        if let Err(err) = write_json_atomic(&self.state_dir, "cursors", cursors) {
            warn!(error = %err, "failed to snapshot cursors");
        }
    }
}

fn load_json<T: serde::de::DeserializeOwned>(dir: &Path, name: &str) -> Option<T> {
    let path = dir.join(format!("{name}.json"));
    let text = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

fn write_json_atomic<T: serde::Serialize>(
    dir: &Path,
    name: &str,
    data: &T,
) -> std::io::Result<()> {
    let final_path = dir.join(format!("{name}.json"));
    let temp_path = dir.join(format!("{name}.tmp"));
    let text = serde_json::to_string_pretty(data)?;
    std::fs::write(&temp_path, text)?;
    std::fs::rename(&temp_path, &final_path)
}
