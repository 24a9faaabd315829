use thiserror::Error;

use crate::config::ConfigError;

/// Errors produced by the learner, its memory and its networks.
#[derive(Debug, Error)]
pub enum LearnerError {
    #[error("Shape mismatch in {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Rollout step {step} has {actual} agents, expected {expected}")]
    AgentCountMismatch {
        step: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Cannot store an empty rollout")]
    EmptyRollout,

    #[error("NaN detected in {0}")]
    NonFinite(&'static str),

    #[error("Regional reward mode requires {expected} regional rewards, got {actual}")]
    MissingRegionalRewards { expected: usize, actual: usize },

    #[error("Target parameter {0} has no live counterpart")]
    ParameterMismatch(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Checkpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint metadata is invalid: {0}")]
    Metadata(#[from] serde_json::Error),

    #[cfg(feature = "nn")]
    #[error("Torch error: {0}")]
    Torch(#[from] tch::TchError),
}
