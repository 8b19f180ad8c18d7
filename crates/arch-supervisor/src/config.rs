/// Static configuration for one agent's child process, independent of
/// whether it runs locally or inside a container.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub agent_id: String,
    pub role: String,
    pub model: String,
    pub workspace: String,
    pub skip_permissions: bool,
}

/// Resource and mount settings applied when a [`crate::ContainerSupervisor`]
/// spawns the child.
#[derive(Debug, Clone)]
pub struct ContainerRuntimeConfig {
    pub image: String,
    pub memory_limit: Option<String>,
    pub cpus: Option<f64>,
    pub network: String,
    pub extra_mounts: Vec<String>,
}

impl Default for ContainerRuntimeConfig {
    fn default() -> Self {
        Self {
            image: "arch-agent:latest".to_string(),
            memory_limit: None,
            cpus: None,
            network: "bridge".to_string(),
            extra_mounts: Vec::new(),
        }
    }
}

pub fn container_name(agent_id: &str) -> String {
    format!("arch-{agent_id}")
}
