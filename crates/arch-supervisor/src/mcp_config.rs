use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

#[derive(Serialize)]
struct McpConfig {
    #[serde(rename = "mcpServers")]
    mcp_servers: McpServers,
}

#[derive(Serialize)]
struct McpServers {
    arch: ArchServer,
}

#[derive(Serialize)]
struct ArchServer {
    #[serde(rename = "type")]
    kind: &'static str,
    url: String,
}

/// Write `<agent_id>-mcp.json` pointing the child at the Tool Server's
/// per-agent SSE endpoint. `host.docker.internal` is used for containerized
/// children so they can reach the harness on the host.
pub fn generate_mcp_config(
    agent_id: &str,
    tool_server_port: u16,
    state_dir: &Path,
    is_container: bool,
) -> std::io::Result<PathBuf> {
    let host = if is_container { "host.docker.internal" } else { "localhost" };
    let config = McpConfig {
        mcp_servers: McpServers {
            arch: ArchServer {
                kind: "sse",
                url: format!("http://{host}:{tool_server_port}/sse/{agent_id}"),
            },
        },
    };

    let path = state_dir.join(format!("{agent_id}-mcp.json"));
    std::fs::create_dir_all(state_dir)?;
    std::fs::write(&path, serde_json::to_string_pretty(&config)?)?;
    Ok(path)
}

/// Append a line to `permissions_audit.log` whenever an agent is spawned
/// with the skip-permissions waiver.
pub fn log_permissions_audit(
    state_dir: &Path,
    agent_id: &str,
    role: &str,
    approved_by: &str,
) -> std::io::Result<()> {
    use std::io::Write;

    std::fs::create_dir_all(state_dir)?;
    let path = state_dir.join("permissions_audit.log");
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    writeln!(
        file,
        "{timestamp}  SKIP_PERMISSIONS  agent_id={agent_id}  role={role}  approved_by={approved_by}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_local_url_with_localhost() {
        let dir = tempfile::tempdir().unwrap();
        let path = generate_mcp_config("fe-1", 3999, dir.path(), false).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("localhost:3999/sse/fe-1"));
    }

    #[test]
    fn generates_container_url_with_bridge_host() {
        let dir = tempfile::tempdir().unwrap();
        let path = generate_mcp_config("fe-1", 3999, dir.path(), true).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("host.docker.internal:3999/sse/fe-1"));
    }

    #[test]
    fn audit_log_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        log_permissions_audit(dir.path(), "fe-1", "fe", "user").unwrap();
        log_permissions_audit(dir.path(), "fe-2", "fe", "user").unwrap();
        let text = std::fs::read_to_string(dir.path().join("permissions_audit.log")).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("agent_id=fe-1"));
    }
}
