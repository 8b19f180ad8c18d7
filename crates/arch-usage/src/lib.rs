//! Usage Sink (C2).
//!
//! Parses `stream-json` events from agent child processes and accumulates
//! per-agent token and cost totals, persisting them to `usage.json` after
//! every update. Pricing is loaded from an optional YAML rate table and
//! otherwise falls back to a built-in default.

mod pricing;
mod tracker;

pub use pricing::{calculate_cost, default_pricing, load_pricing, PricingTable, Rates, FALLBACK_MODEL};
pub use tracker::{AgentUsage, TokenTracker};
