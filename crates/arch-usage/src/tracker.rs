use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::pricing::{calculate_cost, default_pricing, load_pricing, PricingTable};

/// Running token/cost totals for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentUsage {
    pub agent_id: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub turns: u64,
    pub cost_usd: f64,
}

impl AgentUsage {
    fn new(agent_id: &str, model: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            model: model.to_string(),
            input_tokens: 0,
            output_tokens: 0,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            turns: 0,
            cost_usd: 0.0,
        }
    }

    /// Fold in one turn's token counts and return that turn's cost.
    fn add_usage(
        &mut self,
        input_tokens: u64,
        output_tokens: u64,
        cache_read_tokens: u64,
        cache_creation_tokens: u64,
        pricing: &PricingTable,
    ) -> f64 {
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
        self.cache_read_tokens += cache_read_tokens;
        self.cache_creation_tokens += cache_creation_tokens;
        self.turns += 1;

        let turn_cost = calculate_cost(
            input_tokens,
            output_tokens,
            cache_read_tokens,
            cache_creation_tokens,
            &self.model,
            pricing,
        );
        self.cost_usd = ((self.cost_usd + turn_cost) * 1_000_000.0).round() / 1_000_000.0;
        turn_cost
    }
}

/// One line of `claude --output-format stream-json` worth of data, as far as
/// the usage sink cares. Any other event shape is ignored.
#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
    #[serde(default)]
    session_id: Option<String>,
}

type UsageCallback = Arc<dyn Fn(&str, &AgentUsage) + Send + Sync>;

/// Usage Sink (C2): accumulates per-agent token usage and cost by parsing
/// `stream-json` lines, persisting `usage.json` after every update.
pub struct TokenTracker {
    state_dir: Option<PathBuf>,
    pricing: PricingTable,
    agents: Mutex<HashMap<String, AgentUsage>>,
    on_usage_update: Option<UsageCallback>,
}

impl TokenTracker {
    pub fn new(state_dir: Option<PathBuf>, pricing_path: Option<&Path>) -> Self {
        let pricing = load_pricing(pricing_path);
        let agents = state_dir
            .as_deref()
            .and_then(load_usage_file)
            .unwrap_or_default();

        Self {
            state_dir,
            pricing,
            agents: Mutex::new(agents),
            on_usage_update: None,
        }
    }

    #[cfg(test)]
    fn with_pricing(state_dir: Option<PathBuf>, pricing: PricingTable) -> Self {
        Self {
            state_dir,
            pricing,
            agents: Mutex::new(HashMap::new()),
            on_usage_update: None,
        }
    }

    pub fn set_on_usage_update<F>(&mut self, callback: F)
    where
        F: Fn(&str, &AgentUsage) + Send + Sync + 'static,
    {
        self.on_usage_update = Some(Arc::new(callback));
    }

    pub async fn register_agent(&self, agent_id: &str, model: &str) {
        let mut agents = self.agents.lock().await;
        if !agents.contains_key(agent_id) {
            agents.insert(agent_id.to_string(), AgentUsage::new(agent_id, model));
            drop(agents);
            self.persist().await;
        }
    }

    /// Parse one raw stdout line for an agent. Non-JSON or irrelevant event
    /// types are silently ignored, mirroring a CLI that interleaves
    /// human-readable and structured output on the same stream.
    pub async fn parse_stream_line(&self, agent_id: &str, line: &str) -> Option<String> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let event: StreamEvent = serde_json::from_str(line).ok()?;

        if event.kind == "usage" {
            self.record_usage(
                agent_id,
                event.input_tokens,
                event.output_tokens,
                event.cache_read_input_tokens,
                event.cache_creation_input_tokens,
            )
            .await;
        }

        if event.kind == "result" {
            return event.session_id;
        }
        None
    }

    async fn record_usage(
        &self,
        agent_id: &str,
        input_tokens: u64,
        output_tokens: u64,
        cache_read_tokens: u64,
        cache_creation_tokens: u64,
    ) {
        let updated = {
            let mut agents = self.agents.lock().await;
            let Some(agent) = agents.get_mut(agent_id) else {
                warn!(agent_id, "usage event for unregistered agent");
                return;
            };
            agent.add_usage(
                input_tokens,
                output_tokens,
                cache_read_tokens,
                cache_creation_tokens,
                &self.pricing,
            );
            agent.clone()
        };

        self.persist().await;
        if let Some(callback) = &self.on_usage_update {
            callback(agent_id, &updated);
        }
    }

    pub async fn agent_usage(&self, agent_id: &str) -> Option<AgentUsage> {
        self.agents.lock().await.get(agent_id).cloned()
    }

    pub async fn all_usage(&self) -> HashMap<String, AgentUsage> {
        self.agents.lock().await.clone()
    }

    pub async fn total_cost(&self) -> f64 {
        let agents = self.agents.lock().await;
        let total: f64 = agents.values().map(|a| a.cost_usd).sum();
        (total * 1_000_000.0).round() / 1_000_000.0
    }

    pub async fn remove_agent(&self, agent_id: &str) -> bool {
        let removed = self.agents.lock().await.remove(agent_id).is_some();
        if removed {
            self.persist().await;
        }
        removed
    }

    async fn persist(&self) {
        let Some(state_dir) = &self.state_dir else {
            return;
        };
        if let Err(err) = std::fs::create_dir_all(state_dir) {
            warn!(%err, "failed to create state dir for usage.json");
            return;
        }

        let agents = self.agents.lock().await.clone();
        let final_path = state_dir.join("usage.json");
        let temp_path = state_dir.join("usage.tmp");
        match serde_json::to_string_pretty(&agents) {
            Ok(text) => {
                if let Err(err) = std::fs::write(&temp_path, text)
                    .and_then(|_| std::fs::rename(&temp_path, &final_path))
                {
                    warn!(%err, "failed to persist usage.json");
                }
            }
            Err(err) => warn!(%err, "failed to serialize usage.json"),
        }
    }
}

fn load_usage_file(state_dir: &Path) -> Option<HashMap<String, AgentUsage>> {
    let path = state_dir.join("usage.json");
    let text = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::default_pricing;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn register_and_accumulate_usage() {
        let tracker = TokenTracker::with_pricing(None, default_pricing());
        tracker.register_agent("fe-1", "claude-sonnet-4-6").await;

        tracker
            .parse_stream_line(
                "fe-1",
                r#"{"type":"usage","input_tokens":1000000,"output_tokens":0}"#,
            )
            .await;

        let usage = tracker.agent_usage("fe-1").await.unwrap();
        assert_eq!(usage.input_tokens, 1_000_000);
        assert_eq!(usage.turns, 1);
        assert_eq!(usage.cost_usd, 3.00);
    }

    #[tokio::test]
    async fn malformed_lines_are_ignored() {
        let tracker = TokenTracker::with_pricing(None, default_pricing());
        tracker.register_agent("fe-1", "claude-sonnet-4-6").await;
        let result = tracker.parse_stream_line("fe-1", "not json at all").await;
        assert!(result.is_none());
        assert_eq!(tracker.agent_usage("fe-1").await.unwrap().turns, 0);
    }

    #[tokio::test]
    async fn usage_for_unregistered_agent_is_dropped() {
        let tracker = TokenTracker::with_pricing(None, default_pricing());
        tracker
            .parse_stream_line("ghost", r#"{"type":"usage","input_tokens":500}"#)
            .await;
        assert!(tracker.agent_usage("ghost").await.is_none());
    }

    #[tokio::test]
    async fn result_event_yields_session_id() {
        let tracker = TokenTracker::with_pricing(None, default_pricing());
        tracker.register_agent("fe-1", "claude-sonnet-4-6").await;
        let session_id = tracker
            .parse_stream_line("fe-1", r#"{"type":"result","session_id":"abc123"}"#)
            .await;
        assert_eq!(session_id.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn callback_fires_on_usage_update() {
        let mut tracker = TokenTracker::with_pricing(None, default_pricing());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        tracker.set_on_usage_update(move |_id, _usage| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        tracker.register_agent("fe-1", "claude-sonnet-4-6").await;
        tracker
            .parse_stream_line("fe-1", r#"{"type":"usage","input_tokens":10}"#)
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn usage_persists_and_reloads_across_trackers() {
        let dir = tempfile::tempdir().unwrap();
        {
            let tracker = TokenTracker::new(Some(dir.path().to_path_buf()), None);
            tracker.register_agent("fe-1", "claude-sonnet-4-6").await;
            tracker
                .parse_stream_line("fe-1", r#"{"type":"usage","input_tokens":2000000}"#)
                .await;
        }

        let reloaded = TokenTracker::new(Some(dir.path().to_path_buf()), None);
        let usage = reloaded.agent_usage("fe-1").await.unwrap();
        assert_eq!(usage.input_tokens, 2_000_000);
        assert_eq!(usage.cost_usd, 6.00);
    }

    #[tokio::test]
    async fn total_cost_sums_across_agents() {
        let tracker = TokenTracker::with_pricing(None, default_pricing());
        tracker.register_agent("fe-1", "claude-sonnet-4-6").await;
        tracker.register_agent("be-1", "claude-haiku-4-5").await;
        tracker
            .parse_stream_line("fe-1", r#"{"type":"usage","input_tokens":1000000}"#)
            .await;
        tracker
            .parse_stream_line("be-1", r#"{"type":"usage","input_tokens":1000000}"#)
            .await;
        assert_eq!(tracker.total_cost().await, 3.80);
    }
}
