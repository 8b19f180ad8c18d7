//! Orchestrator (C7): startup gates, the agent pool, Archie's lifecycle,
//! and shutdown.

mod error;
mod gates;
mod orchestrator;

pub use error::OrchestratorError;
pub use gates::{check_container_gate, check_permission_gate, check_repo_gate, check_tracker_gate};
pub use orchestrator::Orchestrator;
