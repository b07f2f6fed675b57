//! Action/Plan types — the tagged union the planner's JSON output is
//! parsed into (spec.md §3). Values here are always valid: construction is
//! gated by [`super::validate::parse_plan`]; nothing downstream needs to
//! re-check bounds.

use crate::hid::MouseButton;

/// One step of a [`Plan`]. Variant names match the planner's JSON `type`
/// field (`snake_case`), handled in [`super::validate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Wait {
        ms: u32,
    },
    MouseMoveRel {
        dx: i32,
        dy: i32,
    },
    MouseMoveAbs {
        x: u32,
        y: u32,
    },
    MouseClick {
        button: MouseButton,
        x: Option<u32>,
        y: Option<u32>,
    },
    TypeText {
        text: String,
    },
    Key {
        combo: String,
    },
    Done {
        summary: String,
    },
}

impl Action {
    pub fn is_done(&self) -> bool {
        matches!(self, Action::Done { .. })
    }

    pub fn is_key_enter(&self) -> bool {
        matches!(self, Action::Key { combo } if combo.trim().eq_ignore_ascii_case("enter"))
    }

    /// Short human-readable tag used to build `last_actions_brief` and in
    /// plan confirmation printouts — never fed back to the planner as
    /// anything but free text.
    pub fn brief(&self) -> String {
        match self {
            Action::Wait { ms } => format!("wait({ms})"),
            Action::MouseMoveRel { dx, dy } => format!("mouse_move_rel({dx},{dy})"),
            Action::MouseMoveAbs { x, y } => format!("mouse_move_abs({x},{y})"),
            Action::MouseClick { button, .. } => format!("click({button:?})"),
            Action::TypeText { text } => {
                let preview: String = text.chars().take(24).collect();
                format!("type_text({preview:?})")
            }
            Action::Key { combo } => format!("key({combo})"),
            Action::Done { .. } => "done".to_string(),
        }
    }
}

/// `{ reasoning, actions }` as returned by the [`super::planner::Planner`],
/// before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub reasoning: String,
    pub actions: Vec<Action>,
}
