//! C11: ActionNormalizer — rewrites common planner patterns and inserts
//! settle waits, applied in the fixed order spec.md §4.10 lists.
//!
//! Rule 1/2 generalize `original_source/kaivm/agent/runner.py`'s
//! `_normalize_actions` (which only coalesced a GUI-modifier `Key` with a
//! following literal-space `Key`) to also promote a bare modifier
//! followed by `TypeText` — the launcher heuristic spec.md adds on top of
//! what the original did.

use crate::config::AgentConfig;

use super::action::Action;

const GUI_LIKE: &[&str] = &["cmd", "command", "gui", "win", "windows", "super", "meta"];

fn is_gui_like_modifier(combo: &str) -> bool {
    GUI_LIKE.contains(&combo.trim().to_lowercase().as_str())
}

fn is_literal_space(combo: &str) -> bool {
    combo == " " || combo.trim().eq_ignore_ascii_case("space")
}

fn is_launcher_combo(combo: &str) -> bool {
    let c = combo.trim().to_lowercase();
    c.ends_with("+space") || c == "win+r" || c == "alt+f2"
}

fn is_address_bar_combo(combo: &str) -> bool {
    matches!(combo.trim().to_lowercase().as_str(), "ctrl+l" | "command+l" | "alt+d")
}

/// Rule 1: `Key(<gui-mod>)` immediately followed by `Key(" "|"space")`
/// becomes `Key("<mod>+space")`.
fn coalesce_modifier_then_space(actions: Vec<Action>) -> Vec<Action> {
    let mut out = Vec::with_capacity(actions.len());
    let mut i = 0;
    while i < actions.len() {
        if let (Action::Key { combo: a }, Some(Action::Key { combo: b })) =
            (&actions[i], actions.get(i + 1))
        {
            if is_gui_like_modifier(a) && is_literal_space(b) {
                out.push(Action::Key { combo: format!("{a}+space") });
                i += 2;
                continue;
            }
        }
        out.push(actions[i].clone());
        i += 1;
    }
    out
}

/// Rule 2: a bare GUI-like modifier, optionally followed by one `Wait`,
/// then `TypeText`, is promoted to `Key("<mod>+space")` — the launcher
/// heuristic ("press Cmd, type the app name") — keeping the `TypeText`
/// (and any intervening `Wait`) in place afterward.
fn promote_modifier_then_type(actions: Vec<Action>) -> Vec<Action> {
    let mut out = Vec::with_capacity(actions.len());
    let mut i = 0;
    while i < actions.len() {
        if let Action::Key { combo } = &actions[i] {
            if is_gui_like_modifier(combo) {
                let mut j = i + 1;
                if matches!(actions.get(j), Some(Action::Wait { .. })) {
                    j += 1;
                }
                if matches!(actions.get(j), Some(Action::TypeText { .. })) {
                    out.push(Action::Key { combo: format!("{combo}+space") });
                    out.extend(actions[i + 1..j].iter().cloned());
                    i = j;
                    continue;
                }
            }
        }
        out.push(actions[i].clone());
        i += 1;
    }
    out
}

/// Rule 3: `TypeText` immediately followed by `Key("enter")` gets a
/// `Wait(type_to_enter_wait_ms)` spliced between them.
fn insert_pre_enter_settle(actions: Vec<Action>, wait_ms: u64) -> Vec<Action> {
    let mut out = Vec::with_capacity(actions.len() + 1);
    let mut i = 0;
    while i < actions.len() {
        out.push(actions[i].clone());
        if matches!(actions[i], Action::TypeText { .. })
            && matches!(actions.get(i + 1), Some(a) if a.is_key_enter())
        {
            out.push(Action::Wait { ms: wait_ms as u32 });
        }
        i += 1;
    }
    out
}

/// Rule 4: if the plan contains a launcher combo, the *last* `Enter` gets
/// a settle wait of at least `app_launch_settle_ms` after it; for an
/// address-bar combo, at least `search_submit_settle_ms`. If both are
/// present the larger floor wins. The floor raises an existing following
/// `Wait` up to the floor, or inserts one if absent/shorter.
fn apply_post_enter_settle_floor(
    mut actions: Vec<Action>,
    app_launch_settle_ms: u64,
    search_submit_settle_ms: u64,
) -> Vec<Action> {
    let has_launcher = actions
        .iter()
        .any(|a| matches!(a, Action::Key { combo } if is_launcher_combo(combo)));
    let has_address_bar = actions
        .iter()
        .any(|a| matches!(a, Action::Key { combo } if is_address_bar_combo(combo)));

    let floor = match (has_launcher, has_address_bar) {
        (true, true) => app_launch_settle_ms.max(search_submit_settle_ms),
        (true, false) => app_launch_settle_ms,
        (false, true) => search_submit_settle_ms,
        (false, false) => return actions,
    };

    let last_enter = actions.iter().rposition(|a| a.is_key_enter());
    let Some(idx) = last_enter else { return actions };

    match actions.get(idx + 1) {
        Some(Action::Wait { ms }) if *ms as u64 >= floor => {}
        Some(Action::Wait { ms }) if (*ms as u64) < floor => {
            actions[idx + 1] = Action::Wait { ms: floor as u32 };
        }
        _ => {
            actions.insert(idx + 1, Action::Wait { ms: floor as u32 });
        }
    }
    actions
}

/// Rule 5: cap at `max_actions_per_step`; if the action being truncated
/// away would drop a trailing `Wait`, that `Wait` is preserved instead.
fn cap_actions(mut actions: Vec<Action>, max: usize) -> Vec<Action> {
    if actions.len() <= max || max == 0 {
        return actions;
    }
    let trailing_wait = matches!(actions.last(), Some(Action::Wait { .. }));
    if trailing_wait {
        let last = actions.pop().unwrap();
        actions.truncate(max.saturating_sub(1));
        actions.push(last);
    } else {
        actions.truncate(max);
    }
    actions
}

/// Applies all five rules in order. Idempotent (L2): none of the rules
/// re-fire their own output (coalescing/promotion consume the pattern
/// they match; the settle floor only raises, never re-raises above
/// itself; the cap is a no-op on an already-capped plan).
pub fn normalize(actions: Vec<Action>, config: &AgentConfig) -> Vec<Action> {
    let actions = coalesce_modifier_then_space(actions);
    let actions = promote_modifier_then_type(actions);
    let actions = insert_pre_enter_settle(actions, config.type_to_enter_wait_ms);
    let actions = apply_post_enter_settle_floor(
        actions,
        config.app_launch_settle_ms,
        config.search_submit_settle_ms,
    );
    cap_actions(actions, config.max_actions_per_step)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> AgentConfig {
        AgentConfig::default()
    }

    #[test]
    fn rule1_coalesces_modifier_then_literal_space() {
        let actions = vec![
            Action::Key { combo: "command".into() },
            Action::Key { combo: " ".into() },
        ];
        let out = coalesce_modifier_then_space(actions);
        assert_eq!(out, vec![Action::Key { combo: "command+space".into() }]);
    }

    #[test]
    fn rule1_coalesces_modifier_then_named_space() {
        let actions = vec![
            Action::Key { combo: "win".into() },
            Action::Key { combo: "space".into() },
        ];
        let out = coalesce_modifier_then_space(actions);
        assert_eq!(out, vec![Action::Key { combo: "win+space".into() }]);
    }

    #[test]
    fn rule2_promotes_modifier_then_type_text() {
        let actions = vec![
            Action::Key { combo: "cmd".into() },
            Action::TypeText { text: "terminal".into() },
        ];
        let out = promote_modifier_then_type(actions);
        assert_eq!(
            out,
            vec![
                Action::Key { combo: "cmd+space".into() },
                Action::TypeText { text: "terminal".into() },
            ]
        );
    }

    #[test]
    fn rule2_promotes_across_an_intervening_wait() {
        let actions = vec![
            Action::Key { combo: "gui".into() },
            Action::Wait { ms: 200 },
            Action::TypeText { text: "firefox".into() },
        ];
        let out = promote_modifier_then_type(actions);
        assert_eq!(out[0], Action::Key { combo: "gui+space".into() });
        assert_eq!(out[1], Action::Wait { ms: 200 });
        assert_eq!(out[2], Action::TypeText { text: "firefox".into() });
    }

    #[test]
    fn rule3_inserts_pre_enter_settle() {
        let actions = vec![
            Action::TypeText { text: "hello".into() },
            Action::Key { combo: "enter".into() },
        ];
        let out = insert_pre_enter_settle(actions, 50);
        assert_eq!(
            out,
            vec![
                Action::TypeText { text: "hello".into() },
                Action::Wait { ms: 50 },
                Action::Key { combo: "enter".into() },
            ]
        );
    }

    #[test]
    fn rule4_launcher_combo_gets_app_launch_floor() {
        let actions = vec![
            Action::Key { combo: "command+space".into() },
            Action::TypeText { text: "terminal".into() },
            Action::Key { combo: "enter".into() },
        ];
        let out = apply_post_enter_settle_floor(actions, 1000, 1500);
        assert_eq!(out.last(), Some(&Action::Wait { ms: 1000 }));
    }

    #[test]
    fn rule4_address_bar_combo_gets_search_submit_floor() {
        let actions = vec![
            Action::Key { combo: "ctrl+l".into() },
            Action::TypeText { text: "weather".into() },
            Action::Key { combo: "enter".into() },
        ];
        let out = apply_post_enter_settle_floor(actions, 1000, 1500);
        assert_eq!(out.last(), Some(&Action::Wait { ms: 1500 }));
    }

    #[test]
    fn rule4_raises_an_existing_short_wait_but_not_a_longer_one() {
        let short = vec![Action::Key { combo: "enter".into() }, Action::Wait { ms: 10 }];
        assert_eq!(
            apply_post_enter_settle_floor(short, 1000, 1500),
            vec![Action::Key { combo: "enter".into() }, Action::Wait { ms: 1000 }]
        );

        let long = vec![Action::Key { combo: "enter".into() }, Action::Wait { ms: 5000 }];
        assert_eq!(
            apply_post_enter_settle_floor(long.clone(), 1000, 1500),
            long
        );
    }

    #[test]
    fn rule5_caps_but_preserves_trailing_wait() {
        let actions = vec![
            Action::Wait { ms: 1 },
            Action::Wait { ms: 2 },
            Action::Wait { ms: 3 },
            Action::Wait { ms: 4 },
            Action::Wait { ms: 5 },
            Action::Wait { ms: 999 },
        ];
        let out = cap_actions(actions, 5);
        assert_eq!(out.len(), 5);
        assert_eq!(out.last(), Some(&Action::Wait { ms: 999 }));
    }

    #[test]
    fn normalize_is_idempotent_l2() {
        let actions = vec![
            Action::Key { combo: "command".into() },
            Action::Key { combo: "space".into() },
            Action::TypeText { text: "terminal".into() },
            Action::Key { combo: "enter".into() },
        ];
        let once = normalize(actions, &cfg());
        let twice = normalize(once.clone(), &cfg());
        assert_eq!(once, twice);
    }
}
