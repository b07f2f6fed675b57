//! C12: AgentLoop — the observe→plan→act state machine (spec.md §4.11).
//!
//! Grounded on `original_source/kaivm/agent/runner.py`'s `KaiVMAgent.run`
//! for the overall shape (per-step timeout/stop checks, read-latest,
//! dump-last-sent, execute-then-sleep) and extended with the behavior
//! spec.md adds on top: frame-synchronized waits before/after each step,
//! frame-hash "screen unchanged" detection, the anti-loop ESC+wait
//! substitution, and info-kind-gated `Done` completion.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::error::Result;
use crate::hid::{AbsoluteMouse, KeyboardMapper, RelativeMouse};
use crate::otg::GadgetControl;

use super::action::{Action, Plan};
use super::info_kind::{self, InfoKind};
use super::normalize::normalize;
use super::planner::{PlanContext, Planner};
use super::validate::{danger_refusal, parse_plan};

const FRAME_POLL_INTERVAL: Duration = Duration::from_millis(50);
const FRESHNESS_STALE_AFTER: Duration = Duration::from_secs(2);
const FRESHNESS_WAIT_BUDGET: Duration = Duration::from_secs(3);
const ANTI_LOOP_WAIT_MS: u32 = 700;
const PREMATURE_DONE_WAIT_MS: u32 = 1200;
const INSUFFICIENT_DONE_WAIT_MS: u32 = 1800;
const PLANNER_RETRIES: u32 = 2;

/// Per-run state (spec.md §3 `AgentState`). Constructed at run start,
/// discarded at run end; never shared across runs or held behind a
/// global singleton (design note §9).
struct AgentState {
    step_idx: u32,
    prev_frame_hash: Option<[u8; 32]>,
    last_actions_brief: String,
    last_published_mtime: Option<SystemTime>,
    info_kind: Option<InfoKind>,
    last_abs_cursor: Option<(u16, u16)>,
}

impl AgentState {
    fn new() -> Self {
        Self {
            step_idx: 0,
            prev_frame_hash: None,
            last_actions_brief: String::new(),
            last_published_mtime: None,
            info_kind: None,
            last_abs_cursor: None,
        }
    }
}

/// Filesystem paths the loop reads/writes (spec.md §6 external interfaces).
pub struct AgentPaths {
    pub latest_jpg: PathBuf,
    pub stop_file: PathBuf,
    pub last_sent_jpg: PathBuf,
}

/// Ties together the HID endpoints, the gadget controller, the planner
/// capability and tuning config into the per-run loop driver.
pub struct AgentLoop {
    config: AgentConfig,
    paths: AgentPaths,
    planner: Arc<dyn Planner>,
    keyboard: KeyboardMapper,
    abs_mouse: AbsoluteMouse,
    rel_mouse: RelativeMouse,
    gadget: Option<GadgetControl>,
}

impl AgentLoop {
    pub fn new(
        config: AgentConfig,
        paths: AgentPaths,
        planner: Arc<dyn Planner>,
        keyboard: KeyboardMapper,
        abs_mouse: AbsoluteMouse,
        rel_mouse: RelativeMouse,
        gadget: Option<GadgetControl>,
    ) -> Self {
        Self { config, paths, planner, keyboard, abs_mouse, rel_mouse, gadget }
    }

    /// Runs until `Done`, a stop sentinel, `max_steps`, or
    /// `overall_timeout_s`, returning the final summary/reason string.
    pub async fn run(&self, instruction: &str) -> String {
        let t0 = Instant::now();
        let overall_timeout = Duration::from_secs(self.config.overall_timeout_s);

        if self.config.do_replug {
            if let Some(gadget) = &self.gadget {
                if let Err(e) = gadget.rebind() {
                    warn!(error = %e, "gadget rebind failed, continuing anyway");
                }
            }
        }

        if let Err(reason) = self.wait_for_fresh_frame() {
            warn!(reason = %reason, "starting run without a fresh frame");
        }

        let kind = info_kind::infer(instruction);
        let mut state = AgentState::new();
        state.info_kind = Some(kind);

        loop {
            if self.paths.stop_file.exists() {
                return "Stopped: stop sentinel present".to_string();
            }
            if t0.elapsed() > overall_timeout {
                return format!("Timeout after {}s", self.config.overall_timeout_s);
            }
            if state.step_idx >= self.config.max_steps {
                return format!("Stopped after max steps ({})", self.config.max_steps);
            }
            state.step_idx += 1;

            match self.step(&mut state, instruction, kind).await {
                StepOutcome::Continue => continue,
                StepOutcome::Done(summary) => return summary,
                StepOutcome::StoppedByUser => return "Stopped by user (confirm)".to_string(),
            }
        }
    }

    async fn step(&self, state: &mut AgentState, instruction: &str, kind: InfoKind) -> StepOutcome {
        let mut note = None;
        let new_mtime = self.wait_for_frame_newer_than(
            state.last_published_mtime,
            Duration::from_secs_f64(self.config.pre_plan_frame_timeout_s),
        );
        if new_mtime.is_none() {
            note = Some("frame did not update".to_string());
        }
        if let Some(mtime) = new_mtime {
            state.last_published_mtime = Some(mtime);
        }

        let jpeg = match std::fs::read(&self.paths.latest_jpg) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to read latest frame, skipping step");
                tokio::time::sleep(Duration::from_millis(self.config.step_sleep_ms)).await;
                return StepOutcome::Continue;
            }
        };
        self.dump_last_sent(&jpeg);

        let hash: [u8; 32] = Sha256::digest(&jpeg).into();
        let screen_unchanged = state.prev_frame_hash == Some(hash);
        if screen_unchanged {
            note = Some(match note {
                Some(existing) => format!("{existing}; screen unchanged"),
                None => "screen unchanged".to_string(),
            });
        }

        let plan = match self.plan_with_retries(instruction, &jpeg, state, note.clone()).await {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "planner failed after retries, ending run");
                return StepOutcome::Done(format!("Planner error: {e}"));
            }
        };

        let mut actions = normalize(plan.actions, &self.config);

        if screen_unchanged
            && actions.iter().all(|a| matches!(a, Action::Key { .. } | Action::Wait { .. } | Action::Done { .. }))
            && actions.iter().any(|a| a.is_key_enter())
            && state.last_actions_brief.contains("key(enter)")
        {
            info!("anti-loop: repeated Enter on an unchanged screen, substituting ESC+wait");
            actions = vec![Action::Key { combo: "esc".into() }, Action::Wait { ms: ANTI_LOOP_WAIT_MS }];
        }

        actions = self.gate_completion(actions, state, kind);

        if self.config.confirm && !confirm_batch(&actions) {
            return StepOutcome::StoppedByUser;
        }

        let mut ran_input_action = false;
        for action in &actions {
            if let Action::Done { summary } = action {
                return StepOutcome::Done(summary.clone());
            }
            if !matches!(action, Action::Wait { .. }) {
                ran_input_action = true;
            }
            if let Err(reason) = self.execute(action) {
                warn!(action = %action.brief(), reason = %reason, "action result");
            }
            if matches!(action, Action::MouseMoveAbs { .. } | Action::MouseClick { .. }) {
                state.last_abs_cursor = Some(self.abs_mouse.last_pos());
            }
        }

        state.last_actions_brief = actions.iter().map(Action::brief).collect::<Vec<_>>().join(", ");
        state.prev_frame_hash = Some(hash);

        if ran_input_action {
            if let Some(mtime) = self.wait_for_frame_newer_than(
                state.last_published_mtime,
                Duration::from_secs_f64(self.config.post_action_frame_timeout_s),
            ) {
                state.last_published_mtime = Some(mtime);
            }
        }

        tokio::time::sleep(Duration::from_millis(self.config.step_sleep_ms)).await;
        StepOutcome::Continue
    }

    /// Strips a premature or information-insufficient `Done`, substituting
    /// a bare `Wait` if the plan becomes empty (spec.md §4.11 step 6).
    fn gate_completion(&self, actions: Vec<Action>, state: &AgentState, kind: InfoKind) -> Vec<Action> {
        let Some(done_idx) = actions.iter().position(Action::is_done) else {
            return actions;
        };

        if state.step_idx < self.config.min_steps_before_done {
            return strip_done_or_wait(actions, done_idx, PREMATURE_DONE_WAIT_MS);
        }

        if let Action::Done { summary } = &actions[done_idx] {
            if !info_kind::is_sufficient(kind, summary) {
                return strip_done_or_wait(actions, done_idx, INSUFFICIENT_DONE_WAIT_MS);
            }
        }
        actions
    }

    fn execute(&self, action: &Action) -> std::result::Result<(), String> {
        match action {
            Action::Wait { ms } => {
                std::thread::sleep(Duration::from_millis(*ms as u64));
                Ok(())
            }
            Action::MouseMoveRel { dx, dy } => {
                self.rel_mouse.r#move(*dx, *dy).map_err(|e| e.to_string())
            }
            Action::MouseMoveAbs { x, y } => self
                .abs_mouse
                .move_to(*x as f64, *y as f64)
                .map_err(|e| e.to_string()),
            Action::MouseClick { button, x, y } => match (x, y) {
                (Some(x), Some(y)) => self
                    .abs_mouse
                    .click(*x as f64, *y as f64, *button)
                    .map_err(|e| e.to_string()),
                _ => self.abs_mouse.click_at_last(*button).map_err(|e| e.to_string()),
            },
            Action::TypeText { text } => {
                if let Some(reason) = danger_refusal(action, self.config.allow_danger) {
                    return Err(reason);
                }
                self.keyboard.type_text(text).map_err(|e| e.to_string())
            }
            Action::Key { combo } => match self.keyboard.send_hotkey(combo) {
                Ok(true) => Ok(()),
                Ok(false) => Err(format!("unknown or modifier-only key combo: {combo}")),
                Err(e) => Err(e.to_string()),
            },
            Action::Done { .. } => Ok(()),
        }
    }

    /// Calls the planner, retrying up to [`PLANNER_RETRIES`] additional
    /// times with a corrective follow-up if the output fails schema
    /// validation (spec.md §7: "Planner invalid output... retry... then
    /// fatal run error").
    async fn plan_with_retries(
        &self,
        instruction: &str,
        jpeg: &[u8],
        state: &AgentState,
        note: Option<String>,
    ) -> Result<Plan> {
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        let mut previous_invalid_output = None;

        for _attempt in 0..=PLANNER_RETRIES {
            let ctx = PlanContext {
                instruction: instruction.to_string(),
                current_jpeg: jpeg.to_vec(),
                prev_jpeg: None,
                last_actions_brief: state.last_actions_brief.clone(),
                step_idx: state.step_idx,
                max_steps: self.config.max_steps,
                note: note.clone(),
                today: today.clone(),
                allow_danger: self.config.allow_danger,
                thinking_hint: None,
                previous_invalid_output,
            };

            let raw = self.planner.plan(&ctx).await?;
            match parse_plan(&raw) {
                Ok(plan) => return Ok(plan),
                Err(e) => {
                    warn!(error = %e, "planner output failed schema validation, retrying");
                    previous_invalid_output = Some(raw.to_string());
                }
            }
        }

        Err(crate::error::AppError::PlanInvalid(format!(
            "no valid plan after {} retries",
            PLANNER_RETRIES
        )))
    }

    fn dump_last_sent(&self, jpeg: &[u8]) {
        if !self.config.dump_last_sent {
            return;
        }
        if let Some(parent) = self.paths.last_sent_jpg.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = std::fs::write(&self.paths.last_sent_jpg, jpeg);
    }

    /// Pre-run freshness check: if the snapshot is stale by more than 2s,
    /// wait up to 3s for a new frame before starting the first step.
    fn wait_for_fresh_frame(&self) -> std::result::Result<(), String> {
        let mtime = match std::fs::metadata(&self.paths.latest_jpg).and_then(|m| m.modified()) {
            Ok(m) => m,
            Err(_) => return Err("no snapshot file yet".to_string()),
        };
        let stale = mtime.elapsed().map(|e| e > FRESHNESS_STALE_AFTER).unwrap_or(true);
        if !stale {
            return Ok(());
        }
        match self.wait_for_frame_newer_than(Some(mtime), FRESHNESS_WAIT_BUDGET) {
            Some(_) => Ok(()),
            None => Err("snapshot remained stale past the wait budget".to_string()),
        }
    }

    /// Polls `latest_jpg`'s mtime at [`FRAME_POLL_INTERVAL`] until it
    /// advances past `since`, or `timeout` elapses.
    fn wait_for_frame_newer_than(&self, since: Option<SystemTime>, timeout: Duration) -> Option<SystemTime> {
        poll_mtime_newer_than(&self.paths.latest_jpg, since, timeout)
    }
}

fn poll_mtime_newer_than(path: &Path, since: Option<SystemTime>, timeout: Duration) -> Option<SystemTime> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(meta) = std::fs::metadata(path) {
            if let Ok(mtime) = meta.modified() {
                let newer = match since {
                    Some(s) => mtime > s,
                    None => true,
                };
                if newer {
                    return Some(mtime);
                }
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(FRAME_POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
    }
}

fn strip_done_or_wait(mut actions: Vec<Action>, done_idx: usize, fallback_wait_ms: u32) -> Vec<Action> {
    actions.remove(done_idx);
    if actions.is_empty() {
        actions.push(Action::Wait { ms: fallback_wait_ms });
    }
    actions
}

fn confirm_batch(actions: &[Action]) -> bool {
    println!("\nPlanned actions:");
    for a in actions {
        println!(" - {}", a.brief());
    }
    print!("Execute? [y/N] ");
    use std::io::Write;
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}

enum StepOutcome {
    Continue,
    Done(String),
    StoppedByUser,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_done_substitutes_wait_when_plan_becomes_empty() {
        let actions = vec![Action::Done { summary: "x".into() }];
        let out = strip_done_or_wait(actions, 0, 1200);
        assert_eq!(out, vec![Action::Wait { ms: 1200 }]);
    }

    #[test]
    fn strip_done_keeps_remaining_actions() {
        let actions = vec![Action::Wait { ms: 10 }, Action::Done { summary: "x".into() }];
        let out = strip_done_or_wait(actions, 1, 1200);
        assert_eq!(out, vec![Action::Wait { ms: 10 }]);
    }

    #[test]
    fn poll_mtime_times_out_when_file_absent() {
        let result = poll_mtime_newer_than(
            Path::new("/nonexistent/kaivm/path.jpg"),
            None,
            Duration::from_millis(80),
        );
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn anti_loop_scenario_replaces_repeated_enter_with_esc_wait() {
        let dir = tempfile::tempdir().unwrap();
        let latest = dir.path().join("latest.jpg");
        std::fs::write(&latest, b"\xFF\xD8frame-a\xFF\xD9").unwrap();

        let config = AgentConfig {
            max_steps: 3,
            step_sleep_ms: 0,
            pre_plan_frame_timeout_s: 0.05,
            post_action_frame_timeout_s: 0.05,
            ..AgentConfig::default()
        };
        let paths = AgentPaths {
            latest_jpg: latest.clone(),
            stop_file: dir.path().join("stop"),
            last_sent_jpg: dir.path().join("last_sent.jpg"),
        };

        let planner = Arc::new(super::super::planner::StaticPlanner::new(serde_json::json!({
            "reasoning": "r",
            "actions": [{"type": "key", "key": "enter"}]
        })));

        let kbd_path = dir.path().join("hidg0");
        let abs_path = dir.path().join("hidg2");
        let rel_path = dir.path().join("hidg1");
        std::fs::write(&kbd_path, []).unwrap();
        std::fs::write(&abs_path, []).unwrap();
        std::fs::write(&rel_path, []).unwrap();

        let keyboard = KeyboardMapper::new(crate::hid::HidEndpoint::new("kbd", &kbd_path));
        let abs_mouse = AbsoluteMouse::new(crate::hid::HidEndpoint::new("abs", &abs_path), Default::default());
        let rel_mouse = RelativeMouse::new(crate::hid::HidEndpoint::new("rel", &rel_path));

        let agent = AgentLoop::new(config, paths, planner, keyboard, abs_mouse, rel_mouse, None);

        let mut state = AgentState::new();
        state.step_idx = 1;
        state.last_actions_brief = "key(enter)".to_string();
        state.last_published_mtime = std::fs::metadata(&latest).unwrap().modified().ok();
        let frame_bytes = std::fs::read(&latest).unwrap();
        state.prev_frame_hash = Some(Sha256::digest(&frame_bytes).into());

        match agent.step(&mut state, "open a file", InfoKind::None).await {
            StepOutcome::Continue => {}
            _ => panic!("expected Continue"),
        }
        assert!(state.last_actions_brief.contains("key(esc)"));
        assert!(state.last_actions_brief.contains("wait(700)"));
    }
}
