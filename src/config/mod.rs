//! Configuration: a TOML file read once at startup (C-ambient).

pub mod schema;
pub mod store;

pub use schema::{AgentConfig, AppConfig, CaptureConfig, HidConfig, PathsConfig};
pub use store::{load_calibration, save_calibration, ConfigStore};
