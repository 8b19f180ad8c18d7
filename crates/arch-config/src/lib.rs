//! Configuration schema for the ARCH harness.
//!
//! Loaded from a single YAML document. Every field carries a production-safe
//! default so a minimal `project: {name: ...}` document is enough to start.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("project.name is required")]
    MissingProjectName,
    #[error("pool entry at index {0} is missing an id")]
    PoolEntryMissingId(usize),
    #[error("pool entry '{0}' is missing a persona reference")]
    PoolEntryMissingPersona(String),
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("./state")
}

fn default_tool_server_bind() -> String {
    "127.0.0.1:3999".to_string()
}

fn default_archie_model() -> String {
    "claude-opus-4-5".to_string()
}

fn default_archie_persona() -> PathBuf {
    PathBuf::from("personas/archie.md")
}

/// Top-level ARCH configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchConfig {
    pub project: ProjectConfig,

    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub tool_server: ToolServerConfig,

    #[serde(default)]
    pub agent_pool: Vec<PoolEntry>,

    #[serde(default)]
    pub archie: ArchieConfig,

    /// Keep agent workspaces on disk after teardown/shutdown instead of
    /// removing them. Useful for post-mortem inspection.
    #[serde(default)]
    pub keep_workspaces: bool,

    /// Optional path to a YAML rate table consumed by the usage sink.
    #[serde(default)]
    pub pricing_file: Option<PathBuf>,

    /// Optional "owner/repo" enabling the issue-tracker pass-through tools.
    /// Left unconfigured, `issue_*`/`milestone_*` are simply absent from
    /// Archie's capability set.
    #[serde(default)]
    pub github_repo: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_repo")]
    pub repo: PathBuf,
}

fn default_repo() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerConfig {
    #[serde(default = "default_tool_server_bind")]
    pub bind: String,
}

impl Default for ToolServerConfig {
    fn default() -> Self {
        Self {
            bind: default_tool_server_bind(),
        }
    }
}

/// A reusable agent template: role id, persona, model, concurrency limit,
/// and isolation requirements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolEntry {
    #[serde(default)]
    pub id: String,
    pub persona: PathBuf,
    #[serde(default = "default_pool_model")]
    pub model: String,
    #[serde(default = "default_max_instances")]
    pub max_instances: u32,
    #[serde(default)]
    pub sandboxed: bool,
    #[serde(default)]
    pub allow_skip_permissions: bool,
    #[serde(default)]
    pub container: ContainerConfig,
}

fn default_pool_model() -> String {
    "claude-sonnet-4-6".to_string()
}

fn default_max_instances() -> u32 {
    1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerConfig {
    #[serde(default = "default_container_image")]
    pub image: String,
    #[serde(default)]
    pub memory_limit: Option<String>,
    #[serde(default)]
    pub cpus: Option<f64>,
    #[serde(default = "default_container_network")]
    pub network: String,
    #[serde(default)]
    pub extra_mounts: Vec<String>,
}

fn default_container_image() -> String {
    "arch-agent:latest".to_string()
}

fn default_container_network() -> String {
    "bridge".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchieConfig {
    #[serde(default = "default_archie_persona")]
    pub persona: PathBuf,
    #[serde(default = "default_archie_model")]
    pub model: String,
}

impl Default for ArchieConfig {
    fn default() -> Self {
        Self {
            persona: default_archie_persona(),
            model: default_archie_model(),
        }
    }
}

impl ArchConfig {
    /// Load and validate a configuration document from a YAML file.
    ///
    /// Validation corresponds to startup pipeline gate 1: the project name
    /// must be present, and every pool entry must carry both an id and a
    /// persona reference.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ArchConfig = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.project.name.trim().is_empty() {
            return Err(ConfigError::MissingProjectName);
        }
        for (idx, entry) in self.agent_pool.iter().enumerate() {
            if entry.id.trim().is_empty() {
                return Err(ConfigError::PoolEntryMissingId(idx));
            }
            if entry.persona.as_os_str().is_empty() {
                return Err(ConfigError::PoolEntryMissingPersona(entry.id.clone()));
            }
        }
        Ok(())
    }

    pub fn pool_entry(&self, role: &str) -> Option<&PoolEntry> {
        self.agent_pool.iter().find(|e| e.id == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_yaml(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_document_loads_with_defaults() {
        let f = write_yaml("project:\n  name: demo\n");
        let cfg = ArchConfig::load(f.path()).unwrap();
        assert_eq!(cfg.project.name, "demo");
        assert_eq!(cfg.state_dir, PathBuf::from("./state"));
        assert_eq!(cfg.tool_server.bind, "127.0.0.1:3999");
        assert!(cfg.agent_pool.is_empty());
        assert!(!cfg.keep_workspaces);
        assert_eq!(cfg.archie.model, "claude-opus-4-5");
    }

    #[test]
    fn missing_project_name_is_rejected() {
        let f = write_yaml("project:\n  name: \"\"\n");
        let err = ArchConfig::load(f.path()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingProjectName));
    }

    #[test]
    fn pool_entry_without_id_is_rejected() {
        let f = write_yaml(
            "project:\n  name: demo\nagent_pool:\n  - persona: personas/fe.md\n",
        );
        let err = ArchConfig::load(f.path()).unwrap_err();
        assert!(matches!(err, ConfigError::PoolEntryMissingId(0)));
    }

    #[test]
    fn pool_entry_partial_fill_keeps_defaults() {
        let f = write_yaml(
            "project:\n  name: demo\nagent_pool:\n  - id: fe\n    persona: personas/fe.md\n",
        );
        let cfg = ArchConfig::load(f.path()).unwrap();
        let fe = cfg.pool_entry("fe").unwrap();
        assert_eq!(fe.model, "claude-sonnet-4-6");
        assert_eq!(fe.max_instances, 1);
        assert!(!fe.sandboxed);
    }

    #[test]
    fn pool_entry_lookup_misses_unknown_role() {
        let f = write_yaml("project:\n  name: demo\n");
        let cfg = ArchConfig::load(f.path()).unwrap();
        assert!(cfg.pool_entry("nope").is_none());
    }
}
