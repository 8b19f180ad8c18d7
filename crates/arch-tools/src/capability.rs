use arch_state::ARCHIE;

/// Tools every agent may call.
pub const WORKER_TOOLS: &[&str] = &[
    "send_message",
    "get_messages",
    "update_status",
    "report_completion",
    "save_progress",
];

/// Tools restricted to Archie, including the optional tracker pass-throughs.
pub const ARCHIE_TOOLS: &[&str] = &[
    "spawn_agent",
    "teardown_agent",
    "list_agents",
    "escalate_to_user",
    "request_merge",
    "get_project_context",
    "close_project",
    "update_brief",
    "issue_create",
    "issue_list",
    "issue_close",
    "issue_update",
    "issue_comment",
    "milestone_create",
    "milestone_list",
];

/// The capability set is derived purely from whether `agent_id` equals the
/// literal `archie` — there is no separate role registry to consult.
pub fn is_allowed(agent_id: &str, tool: &str) -> bool {
    if WORKER_TOOLS.contains(&tool) {
        return true;
    }
    if agent_id == ARCHIE && ARCHIE_TOOLS.contains(&tool) {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workers_can_call_worker_tools() {
        assert!(is_allowed("fe-1", "send_message"));
        assert!(is_allowed("archie", "send_message"));
    }

    #[test]
    fn only_archie_can_spawn_agents() {
        assert!(is_allowed("archie", "spawn_agent"));
        assert!(!is_allowed("fe-1", "spawn_agent"));
    }

    #[test]
    fn unknown_tool_is_denied_for_everyone() {
        assert!(!is_allowed("archie", "delete_everything"));
        assert!(!is_allowed("fe-1", "delete_everything"));
    }
}
