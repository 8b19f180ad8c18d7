//! Tool Server (C6).
//!
//! One HTTP server, two routes (SSE + paired POST, see [`http::router`]),
//! dispatching each tool invocation against the State Store, the Workspace
//! Provider, and orchestrator-supplied callbacks ([`OrchestratorHandle`]).
//! Archie-only tools are gated by [`capability::is_allowed`].

mod capability;
mod error;
mod http;
mod issue_tracker;
mod orchestrator;
mod server;
mod session;

pub use capability::{is_allowed, ARCHIE_TOOLS, WORKER_TOOLS};
pub use error::ToolError;
pub use http::router;
pub use issue_tracker::IssueTracker;
pub use orchestrator::{MergeResult, OrchestratorHandle, SpawnResult};
pub use server::ToolServer;
pub use session::AgentSession;

const ISSUE_TRACKER_TOOLS: &[&str] = &[
    "issue_create",
    "issue_list",
    "issue_close",
    "issue_update",
    "issue_comment",
    "milestone_create",
    "milestone_list",
];

pub(crate) fn issue_tracker_tool(tool: &str) -> bool {
    ISSUE_TRACKER_TOOLS.contains(&tool)
}
