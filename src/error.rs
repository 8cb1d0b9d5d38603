//! Error types for the DLP engine

use thiserror::Error;

/// DLP engine error type
#[derive(Error, Debug)]
pub enum DlpError {
    /// Configuration string is empty
    #[error("configuration is empty")]
    ConfEmpty,

    /// Configuration file path is empty
    #[error("configuration path is empty")]
    ConfPathEmpty,

    /// Configuration content failed verification
    #[error("configuration verification failed: {0}")]
    ConfVerifyFailed(String),

    /// Configuration could not be parsed
    #[error("configuration parse error: {0}")]
    ConfParse(#[from] serde_yaml::Error),

    /// Engine was used before a configuration was applied.
    /// This one is raised as a panic at the API boundary: it is a
    /// programmer error, not a runtime condition.
    #[error("engine has not been configured")]
    NotConfigured,

    /// Engine was used after close()
    #[error("processing is not allowed after close")]
    ProcessAfterClose,

    /// Engine was switched to log-only mode by new_log_processor()
    #[error("engine is reserved for log processing only")]
    OnlyForLog,

    /// Input string or item count exceeds the configured limit
    #[error("input exceeds the limit of {max}")]
    MaxInputLimit { max: usize },

    /// A detect result carries byte offsets outside the input
    #[error("result position is outside the input")]
    PositionError,

    /// Mask rule references an unsupported mask type or algorithm
    #[error("mask rule {rule}: {detail} is not supported")]
    MaskNotSupported { rule: String, detail: String },

    /// A mask worker with this name already exists
    #[error("mask worker {0} is already registered")]
    MaskNameConflict(String),

    /// No mask worker is registered under this name
    #[error("mask worker {0} was not found")]
    MaskWorkerNotFound(String),

    /// Struct walker was fed a pathological object
    #[error("mask-struct input exceeds the field budget")]
    MaskStructInput,

    /// JSON input could not be parsed or re-serialised
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file could not be read
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A panic was absorbed and converted into an error
    #[error("panic recovered: {0}")]
    PanicRecovered(String),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, DlpError>;
