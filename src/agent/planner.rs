//! C9: Planner — the external vision-language planning capability
//! (spec.md §6 "Planner contract"), modeled as a trait so
//! [`super::agent_loop::AgentLoop`] never depends on a concrete backend.
//!
//! Ported in spirit from `original_source/kaivm/gemini/client.py`'s
//! `GeminiPlanner.plan`: same call shape (instruction, current frame,
//! optional previous frame, free-text context, allow-danger flag), same
//! "retry with a corrective follow-up on invalid output" policy — here
//! pushed up into [`super::agent_loop::AgentLoop`] (§7 error table: "Planner
//! invalid output... retry up to 2 times with corrective prompt").
//!
//! A UI that wants to snoop planner output (design note §9, "monkey-patched
//! interception") does so by implementing this trait as a decorator that
//! forwards to a wrapped `Planner` and publishes what it sees — not by
//! the core exposing any hook of its own.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// One planner call's context, assembled by [`super::agent_loop::AgentLoop`]
/// each step.
#[derive(Debug, Clone)]
pub struct PlanContext {
    pub instruction: String,
    pub current_jpeg: Vec<u8>,
    pub prev_jpeg: Option<Vec<u8>>,
    pub last_actions_brief: String,
    pub step_idx: u32,
    pub max_steps: u32,
    pub note: Option<String>,
    /// `YYYY-MM-DD`, today's date in the local timezone — the planner
    /// contract's grounding for relative-date instructions ("what's the
    /// weather this weekend").
    pub today: String,
    pub allow_danger: bool,
    /// Opaque pass-through hint (spec.md §9 Open Questions: Gemini's
    /// "thinking level" is never inspected by the core).
    pub thinking_hint: Option<String>,
    /// Set only on a retry after invalid/non-schema-matching output; the
    /// previous raw text is echoed back so the planner can self-correct.
    pub previous_invalid_output: Option<String>,
}

/// The external vision-language planning capability. Implementations talk
/// to whatever backend they like; the core only ever sees `Value` (the
/// still-unvalidated `{reasoning, actions}` JSON object) in and out.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, ctx: &PlanContext) -> Result<Value>;
}

/// A `Planner` that always returns a fixed canned response. Used by tests
/// and as the minimal example of the decorator pattern: wrap this in
/// another `Planner` to intercept.
pub struct StaticPlanner {
    response: Value,
}

impl StaticPlanner {
    pub fn new(response: Value) -> Self {
        Self { response }
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn plan(&self, _ctx: &PlanContext) -> Result<Value> {
        Ok(self.response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn static_planner_returns_fixed_response() {
        let planner = StaticPlanner::new(json!({"reasoning": "r", "actions": []}));
        let ctx = PlanContext {
            instruction: "test".into(),
            current_jpeg: vec![],
            prev_jpeg: None,
            last_actions_brief: String::new(),
            step_idx: 0,
            max_steps: 30,
            note: None,
            today: "2026-07-29".into(),
            allow_danger: false,
            thinking_hint: None,
            previous_invalid_output: None,
        };
        let out = planner.plan(&ctx).await.unwrap();
        assert_eq!(out["reasoning"], "r");
    }
}
