use async_trait::async_trait;
use serde_json::Value;

use crate::error::ToolError;

/// Pass-through to an out-of-band issue tracker. No implementation ships;
/// when no tracker is configured the `issue_*`/`milestone_*` tool names are
/// simply absent from Archie's capability set rather than erroring.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn issue_create(&self, title: &str, body: Option<&str>) -> Result<Value, ToolError>;
    async fn issue_list(&self) -> Result<Value, ToolError>;
    async fn issue_close(&self, id: &str) -> Result<Value, ToolError>;
    async fn issue_update(&self, id: &str, patch: Value) -> Result<Value, ToolError>;
    async fn issue_comment(&self, id: &str, body: &str) -> Result<Value, ToolError>;
    async fn milestone_create(&self, title: &str) -> Result<Value, ToolError>;
    async fn milestone_list(&self) -> Result<Value, ToolError>;
}
