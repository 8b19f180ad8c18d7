//! Workspace Provider (C3) — external collaborator contract.
//!
//! Defines the isolation primitive the Orchestrator depends on, plus a
//! default git-worktree-backed implementation.

mod brief;
mod error;
mod git;
mod provider;

pub use brief::{rewrite_section, AgentBrief, BriefSection, PriorContext, TeamMember};
pub use error::WorkspaceError;
pub use git::{GitWorkspaceProvider, BRIEF_FILENAME};
pub use provider::{UpstreamReview, WorkspaceProvider};
