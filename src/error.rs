// src/error.rs
use thiserror::Error;

use crate::tracking::Chirality;

/// Recoverable faults raised by the tracking side of the core.
///
/// None of these end a session: a missing pose skips the frame, an
/// unresolved provider leaves hand-tracking mode selected and waiting.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackingError {
    #[error("no usable position for the {chirality:?} hand this frame")]
    PoseUnavailable { chirality: Chirality },

    #[error("tracking provider unresolved: {reason}")]
    ProviderUnresolved { reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
