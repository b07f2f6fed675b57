use thiserror::Error;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("HID error [{backend}]: {reason}{}", error_code.map(|c| format!(" (errno {c})")).unwrap_or_default())]
    HidError {
        backend: String,
        reason: String,
        error_code: Option<i32>,
    },

    #[error("HID write timed out on {backend} after {after_ms}ms")]
    HidTimeout { backend: String, after_ms: u64 },

    #[error("video device lost [{device}]: {reason}")]
    VideoDeviceLost { device: String, reason: String },

    #[error("failed to spawn capture subprocess: {0}")]
    CaptureSpawn(String),

    #[error("planner returned invalid output: {0}")]
    PlanInvalid(String),

    #[error("plan failed schema validation: {0}")]
    PlanSchema(String),

    #[error("gadget control requires privileges: {0}")]
    GadgetPrivilege(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AppError>;
