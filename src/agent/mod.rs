//! The closed-loop agent runner (C9-C12): typed actions, planner output
//! validation, plan normalization, info-kind completion gating, and the
//! per-run [`AgentLoop`] state machine tying them together.

pub mod action;
pub mod agent_loop;
pub mod info_kind;
pub mod normalize;
pub mod planner;
pub mod validate;

pub use action::{Action, Plan};
pub use agent_loop::{AgentLoop, AgentPaths};
pub use info_kind::InfoKind;
pub use planner::{PlanContext, Planner, StaticPlanner};
