use std::collections::HashMap;
use std::sync::Arc;

use arch_state::{AgentPatch, AgentStatus, StateStore, ARCHIE};
use arch_workspace::{rewrite_section, BriefSection, WorkspaceProvider};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::capability::is_allowed;
use crate::error::ToolError;
use crate::issue_tracker::IssueTracker;
use crate::orchestrator::OrchestratorHandle;
use crate::session::AgentSession;

/// Owns every per-agent [`AgentSession`] and dispatches tool invocations
/// against the State Store, the Workspace Provider, and the orchestrator
/// callbacks. One instance backs the whole HTTP layer.
pub struct ToolServer {
    state: Arc<StateStore>,
    workspace: Arc<dyn WorkspaceProvider>,
    orchestrator: Arc<dyn OrchestratorHandle>,
    issue_tracker: Option<Arc<dyn IssueTracker>>,
    sessions: Mutex<HashMap<String, Arc<AgentSession>>>,
}

impl ToolServer {
    pub fn new(
        state: Arc<StateStore>,
        workspace: Arc<dyn WorkspaceProvider>,
        orchestrator: Arc<dyn OrchestratorHandle>,
        issue_tracker: Option<Arc<dyn IssueTracker>>,
    ) -> Self {
        Self {
            state,
            workspace,
            orchestrator,
            issue_tracker,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn session_for(&self, agent_id: &str) -> Arc<AgentSession> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(AgentSession::new(agent_id)))
            .clone()
    }

    /// Cancel every outstanding blocking call across every session. Called
    /// once, at server shutdown.
    pub async fn cancel_all(&self) {
        let sessions = self.sessions.lock().await;
        for session in sessions.values() {
            session.cancel_all_escalations().await;
        }
    }

    pub async fn dispatch(&self, agent_id: &str, tool: &str, args: Value) -> Value {
        match self.dispatch_inner(agent_id, tool, args).await {
            Ok(value) => value,
            Err(err) => err.to_payload(),
        }
    }

    async fn dispatch_inner(&self, agent_id: &str, tool: &str, args: Value) -> Result<Value, ToolError> {
        if crate::issue_tracker_tool(tool) && self.issue_tracker.is_none() {
            return Err(ToolError::UnknownTool(tool.to_string()));
        }
        if !is_allowed(agent_id, tool) {
            return Err(if known_tool(tool) {
                ToolError::AccessDenied
            } else {
                ToolError::UnknownTool(tool.to_string())
            });
        }

        match tool {
            "send_message" => self.send_message(agent_id, args).await,
            "get_messages" => self.get_messages(agent_id, args).await,
            "update_status" => self.update_status(agent_id, args).await,
            "report_completion" => self.report_completion(agent_id, args).await,
            "save_progress" => self.save_progress(agent_id, args).await,
            "spawn_agent" => self.spawn_agent(args).await,
            "teardown_agent" => self.teardown_agent(args).await,
            "list_agents" => self.list_agents().await,
            "escalate_to_user" => self.escalate_to_user(agent_id, args).await,
            "request_merge" => self.request_merge(args).await,
            "get_project_context" => self.get_project_context().await,
            "close_project" => self.close_project(args).await,
            "update_brief" => self.update_brief(agent_id, args).await,
            "issue_create" => {
                let title = require_str(&args, "title")?;
                let body = args.get("body").and_then(Value::as_str);
                self.issue_tracker.as_ref().unwrap().issue_create(title, body).await
            }
            "issue_list" => self.issue_tracker.as_ref().unwrap().issue_list().await,
            "issue_close" => {
                let id = require_str(&args, "id")?;
                self.issue_tracker.as_ref().unwrap().issue_close(id).await
            }
            "issue_update" => {
                let id = require_str(&args, "id")?;
                self.issue_tracker.as_ref().unwrap().issue_update(id, args.clone()).await
            }
            "issue_comment" => {
                let id = require_str(&args, "id")?;
                let body = require_str(&args, "body")?;
                self.issue_tracker.as_ref().unwrap().issue_comment(id, body).await
            }
            "milestone_create" => {
                let title = require_str(&args, "title")?;
                self.issue_tracker.as_ref().unwrap().milestone_create(title).await
            }
            "milestone_list" => self.issue_tracker.as_ref().unwrap().milestone_list().await,
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    // --- worker tools ---

    async fn send_message(&self, agent_id: &str, args: Value) -> Result<Value, ToolError> {
        let to = require_str(&args, "to")?;
        let content = require_str(&args, "content")?;
        let message = self.state.add_message(agent_id, to, content).await;
        Ok(json!({ "sent": true, "id": message.id }))
    }

    async fn get_messages(&self, agent_id: &str, args: Value) -> Result<Value, ToolError> {
        let since_id = args.get("since_id").and_then(Value::as_u64);
        let (messages, cursor) = self.state.get_messages(agent_id, since_id, true).await;
        Ok(json!({ "messages": messages, "cursor": cursor }))
    }

    async fn update_status(&self, agent_id: &str, args: Value) -> Result<Value, ToolError> {
        let task = require_str(&args, "task")?;
        let status = parse_agent_status(&args)?;
        let updated = self
            .state
            .update_agent(agent_id, AgentPatch { task: Some(task.to_string()), ..AgentPatch::status(status) })
            .await?;
        Ok(serde_json::to_value(updated).unwrap_or(Value::Null))
    }

    async fn report_completion(&self, agent_id: &str, args: Value) -> Result<Value, ToolError> {
        let summary = require_str(&args, "summary")?;
        let artifacts: Vec<String> = args
            .get("artifacts")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        self.state
            .update_agent(agent_id, AgentPatch::status(AgentStatus::Done))
            .await?;
        let content = if artifacts.is_empty() {
            format!("{agent_id} reports completion: {summary}")
        } else {
            format!("{agent_id} reports completion: {summary} (artifacts: {})", artifacts.join(", "))
        };
        self.state.add_message(agent_id, ARCHIE, &content).await;
        Ok(json!({ "acknowledged": true }))
    }

    async fn save_progress(&self, agent_id: &str, args: Value) -> Result<Value, ToolError> {
        let context: arch_state::SavedContext = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidArgument { field: "context", reason: e.to_string() })?;
        let updated = self
            .state
            .update_agent(agent_id, AgentPatch { context: Some(context), ..Default::default() })
            .await?;
        Ok(serde_json::to_value(updated).unwrap_or(Value::Null))
    }

    // --- archie-only tools ---

    async fn spawn_agent(&self, args: Value) -> Result<Value, ToolError> {
        let role = require_str(&args, "role")?;
        let assignment = require_str(&args, "assignment")?;
        let context = args.get("context").cloned();
        let skip_permissions = args.get("skip_permissions").and_then(Value::as_bool).unwrap_or(false);
        let result = self
            .orchestrator
            .spawn_agent(role, assignment, context, skip_permissions)
            .await?;
        Ok(serde_json::to_value(result).unwrap_or(Value::Null))
    }

    async fn teardown_agent(&self, args: Value) -> Result<Value, ToolError> {
        let agent_id = require_str(&args, "agent_id")?;
        let reason = args.get("reason").and_then(Value::as_str);
        self.orchestrator.teardown_agent(agent_id, reason).await?;
        Ok(json!({ "torn_down": true }))
    }

    async fn list_agents(&self) -> Result<Value, ToolError> {
        let agents = self.state.list_agents().await;
        Ok(json!({ "agents": agents }))
    }

    async fn escalate_to_user(&self, agent_id: &str, args: Value) -> Result<Value, ToolError> {
        let question = require_str(&args, "question")?;
        let options: Vec<String> = args
            .get("options")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let decision = self.state.add_pending_decision(question, options).await;
        let session = self.session_for(agent_id).await;
        let rx = session.register_escalation(&decision.id).await;

        match rx.await {
            Ok(answer) if !answer.is_empty() => {
                self.state.answer_decision(&decision.id, &answer).await;
                Ok(json!({ "answer": answer }))
            }
            _ => Ok(json!({ "answer": "", "error": "cancelled" })),
        }
    }

    async fn request_merge(&self, args: Value) -> Result<Value, ToolError> {
        let agent_id = require_str(&args, "agent_id")?;
        let target_branch = args.get("target_branch").and_then(Value::as_str);
        let pr_title = args.get("pr_title").and_then(Value::as_str);
        let pr_body = args.get("pr_body").and_then(Value::as_str);
        let result = self
            .orchestrator
            .request_merge(agent_id, target_branch, pr_title, pr_body)
            .await?;
        Ok(serde_json::to_value(result).unwrap_or(Value::Null))
    }

    async fn get_project_context(&self) -> Result<Value, ToolError> {
        let project = self.state.get_project().await;
        let agents = self.state.list_agents().await;
        let brief_path = self.workspace.workspace_path(ARCHIE);
        let brief_text = match &brief_path {
            Some(path) => tokio::fs::read_to_string(path.join(arch_workspace::BRIEF_FILENAME))
                .await
                .ok(),
            None => None,
        };
        Ok(json!({
            "project": project,
            "agents": agents,
            "brief": brief_text,
        }))
    }

    async fn close_project(&self, args: Value) -> Result<Value, ToolError> {
        let summary = require_str(&args, "summary")?;
        self.orchestrator.close_project(summary).await?;
        Ok(json!({ "closing": true }))
    }

    async fn update_brief(&self, agent_id: &str, args: Value) -> Result<Value, ToolError> {
        let target = args
            .get("agent_id")
            .and_then(Value::as_str)
            .unwrap_or(agent_id);
        let section_name = require_str(&args, "section")?;
        let content = require_str(&args, "content")?;
        let section = BriefSection::parse(section_name).ok_or_else(|| ToolError::InvalidArgument {
            field: "section",
            reason: format!("unknown brief section '{section_name}'"),
        })?;

        let workspace_path = self
            .workspace
            .workspace_path(target)
            .ok_or_else(|| ToolError::InvalidArgument { field: "agent_id", reason: format!("no workspace for '{target}'") })?;
        let brief_path = workspace_path.join(arch_workspace::BRIEF_FILENAME);
        let document = tokio::fs::read_to_string(&brief_path)
            .await
            .map_err(|e| ToolError::Orchestrator(format!("reading brief: {e}")))?;
        let updated = rewrite_section(&document, section, content);
        tokio::fs::write(&brief_path, updated)
            .await
            .map_err(|e| ToolError::Orchestrator(format!("writing brief: {e}")))?;
        Ok(json!({ "updated": true }))
    }
}

fn known_tool(tool: &str) -> bool {
    crate::capability::WORKER_TOOLS.contains(&tool) || crate::capability::ARCHIE_TOOLS.contains(&tool)
}

fn require_str<'a>(args: &'a Value, field: &'static str) -> Result<&'a str, ToolError> {
    args.get(field).and_then(Value::as_str).ok_or(ToolError::MissingArgument(field))
}

fn parse_agent_status(args: &Value) -> Result<AgentStatus, ToolError> {
    let raw = require_str(args, "status")?;
    serde_json::from_value(Value::String(raw.to_string()))
        .map_err(|_| ToolError::InvalidArgument { field: "status", reason: format!("unknown status '{raw}'") })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use arch_workspace::{AgentBrief, UpstreamReview, WorkspaceError};
    use async_trait::async_trait;

    use crate::orchestrator::{MergeResult, SpawnResult};

    use super::*;

    struct NoopWorkspace;

    #[async_trait]
    impl WorkspaceProvider for NoopWorkspace {
        async fn create(&self, _agent_id: &str, _base_ref: Option<&str>) -> Result<PathBuf, WorkspaceError> {
            Ok(PathBuf::from("/tmp/noop"))
        }
        async fn write_agent_brief(&self, _agent_id: &str, _brief: &AgentBrief) -> Result<PathBuf, WorkspaceError> {
            Ok(PathBuf::from("/tmp/noop/AGENT_BRIEF.md"))
        }
        async fn remove(&self, _agent_id: &str, _force: bool) -> Result<bool, WorkspaceError> {
            Ok(true)
        }
        async fn merge(&self, _agent_id: &str, _target_ref: &str, _summary: Option<&str>) -> Result<(), WorkspaceError> {
            Ok(())
        }
        async fn request_upstream_review(
            &self,
            _agent_id: &str,
            _title: &str,
            _body: &str,
            _target_ref: &str,
        ) -> Result<UpstreamReview, WorkspaceError> {
            Ok(UpstreamReview { url: "https://example.invalid/pr/1".into(), number: "1".into() })
        }
        fn workspace_path(&self, _agent_id: &str) -> Option<PathBuf> {
            None
        }
    }

    struct StubOrchestrator;

    #[async_trait]
    impl OrchestratorHandle for StubOrchestrator {
        async fn spawn_agent(
            &self,
            role: &str,
            _assignment: &str,
            _context: Option<Value>,
            _skip_permissions: bool,
        ) -> Result<SpawnResult, ToolError> {
            Ok(SpawnResult {
                agent_id: format!("{role}-1"),
                workspace_path: "/tmp/noop".into(),
                sandboxed: false,
                status: "spawning",
            })
        }
        async fn teardown_agent(&self, _agent_id: &str, _reason: Option<&str>) -> Result<(), ToolError> {
            Ok(())
        }
        async fn request_merge(
            &self,
            agent_id: &str,
            _target_branch: Option<&str>,
            _pr_title: Option<&str>,
            _pr_body: Option<&str>,
        ) -> Result<MergeResult, ToolError> {
            Ok(MergeResult::Merged { agent_id: agent_id.to_string() })
        }
        async fn close_project(&self, _summary: &str) -> Result<(), ToolError> {
            Ok(())
        }
    }

    async fn server() -> (ToolServer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(StateStore::open(dir.path()).await.unwrap());
        let server = ToolServer::new(state, Arc::new(NoopWorkspace), Arc::new(StubOrchestrator), None);
        (server, dir)
    }

    #[tokio::test]
    async fn send_message_then_get_messages_round_trips() {
        let (server, _dir) = server().await;
        server.state.register_agent("archie", "lead", "/ws", false, false, None).await.unwrap();
        server.state.register_agent("fe-1", "frontend", "/ws", false, false, None).await.unwrap();

        let sent = server.dispatch("archie", "send_message", json!({"to": "fe-1", "content": "go"})).await;
        assert_eq!(sent["sent"], json!(true));

        let got = server.dispatch("fe-1", "get_messages", json!({})).await;
        assert_eq!(got["messages"][0]["content"], json!("go"));
    }

    #[tokio::test]
    async fn worker_cannot_spawn_agent() {
        let (server, _dir) = server().await;
        let result = server.dispatch("fe-1", "spawn_agent", json!({"role": "frontend", "assignment": "x"})).await;
        assert_eq!(result["error"], json!("access denied"));
    }

    #[tokio::test]
    async fn unknown_tool_is_denied_without_revealing_existence() {
        let (server, _dir) = server().await;
        let result = server.dispatch("fe-1", "delete_everything", json!({})).await;
        assert_eq!(result["error"], json!("unknown tool 'delete_everything'"));
    }

    #[tokio::test]
    async fn archie_can_spawn_agent_via_orchestrator_handle() {
        let (server, _dir) = server().await;
        let result = server.dispatch("archie", "spawn_agent", json!({"role": "frontend", "assignment": "build"})).await;
        assert_eq!(result["agent_id"], json!("frontend-1"));
        assert_eq!(result["status"], json!("spawning"));
    }

    #[tokio::test]
    async fn escalate_to_user_blocks_until_answered() {
        let (server, _dir) = server().await;
        server.state.register_agent("archie", "lead", "/ws", false, false, None).await.unwrap();
        let session = server.session_for("archie").await;

        let escalate = server.dispatch("archie", "escalate_to_user", json!({"question": "ok?"}));
        tokio::pin!(escalate);

        // Give the escalation a moment to register itself before we answer it.
        tokio::task::yield_now().await;
        let pending = server.state.get_pending_decisions().await;
        assert_eq!(pending.len(), 1);
        assert!(session.answer_escalation(&pending[0].id, "yes").await);

        let result = escalate.await;
        assert_eq!(result["answer"], json!("yes"));
    }

    #[tokio::test]
    async fn shutdown_cancels_outstanding_escalations() {
        let (server, _dir) = server().await;
        server.state.register_agent("archie", "lead", "/ws", false, false, None).await.unwrap();

        let escalate = server.dispatch("archie", "escalate_to_user", json!({"question": "ok?"}));
        tokio::pin!(escalate);
        tokio::task::yield_now().await;

        server.cancel_all().await;
        let result = escalate.await;
        assert_eq!(result["error"], json!("cancelled"));
    }

    #[tokio::test]
    async fn issue_tools_are_unknown_without_a_configured_tracker() {
        let (server, _dir) = server().await;
        let result = server.dispatch("archie", "issue_create", json!({"title": "bug"})).await;
        assert_eq!(result["error"], json!("unknown tool 'issue_create'"));
    }
}
