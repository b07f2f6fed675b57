//! C10: PlanValidator — parses the planner's raw JSON into typed
//! [`Action`]s and applies the danger filter.
//!
//! Allowed action types, per-field bounds and the danger-substring list
//! are ported directly from `original_source/kaivm/agent/validate.py`
//! (`ALLOWED_TYPES`, `ALLOWED_BUTTONS`, `DANGER_PATTERNS`); the `dx`/`dy`
//! bound of `[-4096, 4096]` is kept exactly as spec.md states it (see
//! DESIGN.md for the Open Question this resolves).

use serde_json::Value;
use tracing::warn;

use crate::error::{AppError, Result};
use crate::hid::MouseButton;

use super::action::{Action, Plan};

const DANGER_PATTERNS: &[&str] = &[
    "rm -",
    "rm -rf",
    "del /",
    "format ",
    "mkfs",
    "shutdown",
    "reboot",
    "passwd",
    "net user",
    "reg delete",
    "diskpart",
    "bcdedit",
];

const MIN_REL_DELTA: i32 = -4096;
const MAX_REL_DELTA: i32 = 4096;
const MAX_WAIT_MS: u32 = 60_000;
const MAX_TEXT_LEN: usize = 2000;
const MAX_KEY_LEN: usize = 64;
const MAX_ACTIONS: usize = 8;

/// True if `text`, lowercased, contains any refused substring.
pub fn is_dangerous_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    DANGER_PATTERNS.iter().any(|p| lower.contains(p))
}

fn field_u64(obj: &serde_json::Map<String, Value>, key: &str) -> Option<u64> {
    obj.get(key).and_then(|v| v.as_u64())
}

fn field_i64(obj: &serde_json::Map<String, Value>, key: &str) -> Option<i64> {
    obj.get(key).and_then(|v| v.as_i64())
}

fn parse_action(value: &Value) -> Result<Action> {
    let obj = value
        .as_object()
        .ok_or_else(|| AppError::PlanSchema("each action must be an object".into()))?;
    let ty = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::PlanSchema("action missing \"type\"".into()))?;

    match ty {
        "wait" => {
            let ms = field_u64(obj, "ms").unwrap_or(0);
            if ms > MAX_WAIT_MS as u64 {
                return Err(AppError::PlanSchema(format!("wait.ms out of range: {ms}")));
            }
            Ok(Action::Wait { ms: ms as u32 })
        }
        "mouse_move_rel" => {
            let dx = field_i64(obj, "dx").unwrap_or(0);
            let dy = field_i64(obj, "dy").unwrap_or(0);
            if !(MIN_REL_DELTA as i64..=MAX_REL_DELTA as i64).contains(&dx)
                || !(MIN_REL_DELTA as i64..=MAX_REL_DELTA as i64).contains(&dy)
            {
                return Err(AppError::PlanSchema(format!(
                    "mouse_move_rel.dx/dy out of range: ({dx},{dy})"
                )));
            }
            Ok(Action::MouseMoveRel { dx: dx as i32, dy: dy as i32 })
        }
        "mouse_move_abs" => {
            let x = field_u64(obj, "x").unwrap_or(0);
            let y = field_u64(obj, "y").unwrap_or(0);
            if x > 1000 || y > 1000 {
                return Err(AppError::PlanSchema(format!(
                    "mouse_move_abs.x/y out of range: ({x},{y})"
                )));
            }
            Ok(Action::MouseMoveAbs { x: x as u32, y: y as u32 })
        }
        "mouse_click" => {
            let button_s = obj.get("button").and_then(Value::as_str).unwrap_or("left");
            let button = MouseButton::parse(button_s)
                .ok_or_else(|| AppError::PlanSchema(format!("mouse_click.button invalid: {button_s}")))?;
            let x = field_u64(obj, "x").map(|v| v as u32);
            let y = field_u64(obj, "y").map(|v| v as u32);
            Ok(Action::MouseClick { button, x, y })
        }
        "type_text" => {
            let text = obj
                .get("text")
                .and_then(Value::as_str)
                .ok_or_else(|| AppError::PlanSchema("type_text.text invalid".into()))?;
            if text.chars().count() > MAX_TEXT_LEN {
                return Err(AppError::PlanSchema("type_text.text too long".into()));
            }
            Ok(Action::TypeText { text: text.to_string() })
        }
        "key" => {
            let combo = obj
                .get("key")
                .and_then(Value::as_str)
                .ok_or_else(|| AppError::PlanSchema("key.key invalid".into()))?;
            if combo.chars().count() > MAX_KEY_LEN {
                return Err(AppError::PlanSchema("key.key too long".into()));
            }
            Ok(Action::Key { combo: combo.to_string() })
        }
        "done" => {
            let summary = obj.get("summary").and_then(Value::as_str).unwrap_or("").to_string();
            Ok(Action::Done { summary })
        }
        other => Err(AppError::PlanSchema(format!("unsupported action type: {other}"))),
    }
}

/// Parses a raw planner response into a [`Plan`]. Rejects a missing or
/// empty `actions` array, unknown action types, and any out-of-bounds
/// field. `1 <= actions.len() <= 8` is enforced by the caller after
/// normalization truncates, not here — spec.md bounds only the upper end
/// at the schema boundary; this function rejects empty, the normalizer
/// enforces the cap.
pub fn parse_plan(value: &Value) -> Result<Plan> {
    let obj = value
        .as_object()
        .ok_or_else(|| AppError::PlanSchema("plan must be an object".into()))?;
    let reasoning = obj.get("reasoning").and_then(Value::as_str).unwrap_or("").to_string();
    let actions_value = obj
        .get("actions")
        .ok_or_else(|| AppError::PlanSchema("plan missing \"actions\"".into()))?;
    let actions_arr = actions_value
        .as_array()
        .ok_or_else(|| AppError::PlanSchema("\"actions\" must be an array".into()))?;
    if actions_arr.is_empty() {
        return Err(AppError::PlanSchema("actions must be a non-empty array".into()));
    }

    let mut actions = Vec::with_capacity(actions_arr.len());
    for raw in actions_arr {
        actions.push(parse_action(raw)?);
    }
    Ok(Plan { reasoning, actions })
}

/// Danger filter applied at execution time, not parse time (L3: enabling
/// `allow_danger` never reduces the set of executed actions — it can only
/// be checked, never baked into the parsed `Plan`). Returns `Some(reason)`
/// if the action should be refused.
pub fn danger_refusal(action: &Action, allow_danger: bool) -> Option<String> {
    if allow_danger {
        return None;
    }
    match action {
        Action::TypeText { text } if is_dangerous_text(text) => {
            warn!(text = %text, "refusing dangerous type_text without allow_danger");
            Some(format!("refused dangerous type_text: {text:?}"))
        }
        _ => None,
    }
}

pub const MAX_ACTIONS_HARD_CAP: usize = MAX_ACTIONS;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plan_with(actions: Value) -> Value {
        json!({ "reasoning": "r", "actions": actions })
    }

    #[test]
    fn wait_ms_zero_is_noop_but_accepted() {
        let plan = parse_plan(&plan_with(json!([{"type": "wait", "ms": 0}]))).unwrap();
        assert_eq!(plan.actions[0], Action::Wait { ms: 0 });
    }

    #[test]
    fn wait_ms_60000_is_accepted() {
        let plan = parse_plan(&plan_with(json!([{"type": "wait", "ms": 60000}]))).unwrap();
        assert_eq!(plan.actions[0], Action::Wait { ms: 60000 });
    }

    #[test]
    fn wait_ms_over_60000_fails() {
        assert!(parse_plan(&plan_with(json!([{"type": "wait", "ms": 60001}]))).is_err());
    }

    #[test]
    fn mouse_move_rel_4096_accepted_4097_rejected() {
        assert!(parse_plan(&plan_with(json!([{"type": "mouse_move_rel", "dx": 4096, "dy": 0}]))).is_ok());
        assert!(parse_plan(&plan_with(json!([{"type": "mouse_move_rel", "dx": 4097, "dy": 0}]))).is_err());
    }

    #[test]
    fn empty_actions_array_is_rejected() {
        assert!(parse_plan(&plan_with(json!([]))).is_err());
    }

    #[test]
    fn missing_actions_is_rejected() {
        assert!(parse_plan(&json!({"reasoning": "r"})).is_err());
    }

    #[test]
    fn unknown_action_type_is_rejected() {
        assert!(parse_plan(&plan_with(json!([{"type": "frobnicate"}]))).is_err());
    }

    #[test]
    fn danger_filter_catches_documented_substrings() {
        for bad in ["rm -rf /", "format c:", "shutdown now", "reg delete HKLM"] {
            assert!(is_dangerous_text(bad), "{bad:?} should be flagged");
        }
        assert!(!is_dangerous_text("hello world"));
    }

    #[test]
    fn danger_filter_monotone_l3() {
        let action = Action::TypeText { text: "rm -rf /".into() };
        assert!(danger_refusal(&action, false).is_some());
        assert!(danger_refusal(&action, true).is_none());
    }

    #[test]
    fn type_text_over_2000_chars_rejected() {
        let long = "a".repeat(2001);
        assert!(parse_plan(&plan_with(json!([{"type": "type_text", "text": long}]))).is_err());
    }

    #[test]
    fn key_over_64_chars_rejected() {
        let long = "a".repeat(65);
        assert!(parse_plan(&plan_with(json!([{"type": "key", "key": long}]))).is_err());
    }

    #[test]
    fn mouse_click_defaults_to_left_button() {
        let plan = parse_plan(&plan_with(json!([{"type": "mouse_click"}]))).unwrap();
        assert_eq!(plan.actions[0], Action::MouseClick { button: MouseButton::Left, x: None, y: None });
    }
}
