/// A named team member, shown in the brief's "Active team members" line.
#[derive(Debug, Clone)]
pub struct TeamMember {
    pub agent_id: String,
    pub role: String,
}

/// Context carried over from a prior run of the same agent, reproducing the
/// fields a worker last wrote via `save_progress`.
#[derive(Debug, Clone, Default)]
pub struct PriorContext {
    pub progress: Option<String>,
    pub files_modified: Vec<String>,
    pub next_steps: Option<String>,
    pub blockers: Option<String>,
    pub decisions: Vec<String>,
}

/// One of the two sections `update_brief` is allowed to rewrite in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BriefSection {
    Assignment,
    Persona,
}

impl BriefSection {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "assignment" => Some(Self::Assignment),
            "persona" => Some(Self::Persona),
            _ => None,
        }
    }
}

/// Everything needed to render a brief document for one agent.
#[derive(Debug, Clone)]
pub struct AgentBrief {
    pub agent_id: String,
    pub persona_text: String,
    pub project_name: String,
    pub project_description: String,
    pub workspace_path: String,
    pub assignment: String,
    pub active_team: Vec<TeamMember>,
    pub available_tools: Vec<String>,
    pub prior_context: Option<PriorContext>,
}

const HEADER_BEGIN: &str = "<!-- INJECTED BY ARCH — DO NOT EDIT BELOW THIS LINE -->";
const HEADER_END: &str = "<!-- END ARCH CONTEXT -->";

impl AgentBrief {
    /// Render the brief's full markdown: injected header, optional prior
    /// session-state block, then persona content.
    pub fn render(&self) -> String {
        let team = if self.active_team.is_empty() {
            "(none yet)".to_string()
        } else {
            self.active_team
                .iter()
                .map(|m| format!("{}: {}", m.agent_id, m.role))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let tools = if self.available_tools.is_empty() {
            "send_message, get_messages, update_status, report_completion".to_string()
        } else {
            self.available_tools.join(", ")
        };

        let mut session_state = String::new();
        if let Some(ctx) = &self.prior_context {
            session_state.push_str("\n## Session State (from previous session)\n");
            if let Some(progress) = &ctx.progress {
                session_state.push_str(&format!("- **Progress:** {progress}\n"));
            }
            if !ctx.files_modified.is_empty() {
                session_state.push_str(&format!(
                    "- **Files modified:** {}\n",
                    ctx.files_modified.join(", ")
                ));
            }
            if let Some(next_steps) = &ctx.next_steps {
                session_state.push_str(&format!("- **Next steps:** {next_steps}\n"));
            }
            if let Some(blockers) = &ctx.blockers {
                session_state.push_str(&format!("- **Blockers:** {blockers}\n"));
            }
            if !ctx.decisions.is_empty() {
                session_state.push_str(&format!(
                    "- **Decisions:** {}\n",
                    ctx.decisions.join("; ")
                ));
            }
        }

        format!(
            "{HEADER_BEGIN}\n\
             ## ARCH Harness Context\n\
             - **Your agent ID:** {agent_id}\n\
             - **Project:** {project} — {description}\n\
             - **Your workspace path:** {workspace}\n\
             - **Available MCP tools (via \"arch\" server):** {tools}\n\
             - **Active team members:** {team}\n\
             - **Your assignment:** {assignment}\n\
             {HEADER_END}\n\
             {session_state}\n\
             ---\n\n\
             {persona}",
            agent_id = self.agent_id,
            project = self.project_name,
            description = self.project_description,
            workspace = self.workspace_path,
            assignment = self.assignment,
            persona = self.persona_text,
        )
    }
}

/// Rewrite one section of an already-rendered brief document in place.
///
/// `Assignment` rewrites the `**Your assignment:**` header line;
/// `Persona` replaces everything after the `---` divider.
pub fn rewrite_section(document: &str, section: BriefSection, content: &str) -> String {
    match section {
        BriefSection::Assignment => {
            let prefix = "- **Your assignment:** ";
            let mut out = String::with_capacity(document.len());
            let mut replaced = false;
            for line in document.lines() {
                if !replaced && line.starts_with(prefix) {
                    out.push_str(prefix);
                    out.push_str(content);
                    replaced = true;
                } else {
                    out.push_str(line);
                }
                out.push('\n');
            }
            out
        }
        BriefSection::Persona => {
            if let Some(idx) = document.find("\n---\n\n") {
                let (head, _) = document.split_at(idx);
                format!("{head}\n---\n\n{content}")
            } else {
                format!("{document}\n---\n\n{content}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brief() -> AgentBrief {
        AgentBrief {
            agent_id: "fe-1".into(),
            persona_text: "You are a frontend engineer.".into(),
            project_name: "Widget".into(),
            project_description: "a widget factory".into(),
            workspace_path: "/repo/.worktrees/fe-1".into(),
            assignment: "build the login form".into(),
            active_team: vec![TeamMember { agent_id: "archie".into(), role: "lead".into() }],
            available_tools: vec!["send_message".into(), "get_messages".into()],
            prior_context: None,
        }
    }

    #[test]
    fn render_includes_header_and_persona() {
        let rendered = brief().render();
        assert!(rendered.contains(HEADER_BEGIN));
        assert!(rendered.contains(HEADER_END));
        assert!(rendered.contains("build the login form"));
        assert!(rendered.contains("You are a frontend engineer."));
        assert!(rendered.contains("archie: lead"));
    }

    #[test]
    fn render_with_no_team_shows_placeholder() {
        let mut b = brief();
        b.active_team.clear();
        assert!(b.render().contains("(none yet)"));
    }

    #[test]
    fn render_includes_prior_context_block() {
        let mut b = brief();
        b.prior_context = Some(PriorContext {
            progress: Some("halfway".into()),
            files_modified: vec!["a.rs".into()],
            ..Default::default()
        });
        let rendered = b.render();
        assert!(rendered.contains("Session State (from previous session)"));
        assert!(rendered.contains("halfway"));
    }

    #[test]
    fn rewrite_assignment_section_replaces_only_that_line() {
        let rendered = brief().render();
        let updated = rewrite_section(&rendered, BriefSection::Assignment, "ship the release");
        assert!(updated.contains("ship the release"));
        assert!(!updated.contains("build the login form"));
        assert!(updated.contains("You are a frontend engineer."));
    }

    #[test]
    fn rewrite_persona_section_replaces_content_after_divider() {
        let rendered = brief().render();
        let updated = rewrite_section(&rendered, BriefSection::Persona, "New persona text.");
        assert!(updated.contains("New persona text."));
        assert!(!updated.contains("You are a frontend engineer."));
        assert!(updated.contains("build the login form"));
    }

    #[test]
    fn section_parse_rejects_unknown_names() {
        assert!(BriefSection::parse("unknown").is_none());
        assert_eq!(BriefSection::parse("persona"), Some(BriefSection::Persona));
    }
}
