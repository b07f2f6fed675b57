//! Configuration schema: a struct-of-substructs loaded once at process
//! start from a TOML file, each substruct carrying a `Default` mirroring
//! the defaults named throughout the component design.

use serde::{Deserialize, Serialize};

/// Top-level configuration, as persisted under `<CONFIG_DIR>/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub capture: CaptureConfig,
    pub hid: HidConfig,
    pub agent: AgentConfig,
    pub paths: PathsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            hid: HidConfig::default(),
            agent: AgentConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

/// Video capture settings (C1/C2/C3/C4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Command line used to spawn the MJPEG-producing subprocess.
    pub source_command: Vec<String>,
    /// Rate at which frames are published to `LatestSnapshot`.
    pub out_fps: u32,
    /// Rate at which frames are pushed to the live FIFO (0 = unlimited).
    pub live_fps: u32,
    /// Bounded queue depth backing the live FIFO.
    pub live_queue_depth: usize,
    /// Wall-clock warmup window during which frames are discarded.
    pub warmup_s: f64,
    /// Restart backoff floor when the last good frame was recent.
    pub backoff_min_s: f64,
    /// Restart backoff ceiling after a longer outage.
    pub backoff_max_s: f64,
    /// Window under which `backoff_min_s` applies instead of `backoff_max_s`.
    pub backoff_recent_window_s: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source_command: vec!["ustreamer".into(), "--host=127.0.0.1".into()],
            out_fps: 5,
            live_fps: 15,
            live_queue_depth: 2,
            warmup_s: 2.0,
            backoff_min_s: 1.0,
            backoff_max_s: 5.0,
            backoff_recent_window_s: 5.0,
        }
    }
}

/// HID device paths and I/O timeout (C6/C7/C8).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HidConfig {
    pub keyboard_device: String,
    pub relative_mouse_device: String,
    pub absolute_mouse_device: String,
    pub io_timeout_ms: u64,
}

impl Default for HidConfig {
    fn default() -> Self {
        Self {
            keyboard_device: "/dev/hidg0".into(),
            relative_mouse_device: "/dev/hidg1".into(),
            absolute_mouse_device: "/dev/hidg2".into(),
            io_timeout_ms: 5000,
        }
    }
}

/// AgentLoop tuning (C9..C12).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub max_steps: u32,
    pub step_sleep_ms: u64,
    pub overall_timeout_s: u64,
    pub pre_plan_frame_timeout_s: f64,
    pub post_action_frame_timeout_s: f64,
    pub min_steps_before_done: u32,
    pub app_launch_settle_ms: u64,
    pub search_submit_settle_ms: u64,
    pub type_to_enter_wait_ms: u64,
    pub max_actions_per_step: usize,
    pub confirm: bool,
    pub allow_danger: bool,
    pub do_replug: bool,
    pub dump_last_sent: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 30,
            step_sleep_ms: 150,
            overall_timeout_s: 300,
            pre_plan_frame_timeout_s: 1.2,
            post_action_frame_timeout_s: 2.8,
            min_steps_before_done: 2,
            app_launch_settle_ms: 1000,
            search_submit_settle_ms: 1500,
            type_to_enter_wait_ms: 50,
            max_actions_per_step: 5,
            confirm: false,
            allow_danger: false,
            do_replug: false,
            dump_last_sent: true,
        }
    }
}

/// Filesystem layout (external interfaces, spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    pub run_dir: String,
    pub stop_file: String,
    pub config_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            run_dir: "/run/kaivm".into(),
            stop_file: "/run/kaivm/stop".into(),
            config_dir: "/etc/kaivm".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let cfg = AppConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(cfg, parsed);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let partial = "[agent]\nmax_steps = 50\n";
        let cfg: AppConfig = toml::from_str(partial).unwrap();
        assert_eq!(cfg.agent.max_steps, 50);
        assert_eq!(cfg.agent.step_sleep_ms, AgentConfig::default().step_sleep_ms);
        assert_eq!(cfg.capture, CaptureConfig::default());
    }
}
