use thiserror::Error;

/// Failures raised by the pure engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// A current time earlier than the stored last-update time, beyond tolerance.
    #[error("invalid time order: current time {current} precedes last update {last}")]
    InvalidTimeOrder { last: f64, current: f64 },

    #[error("invalid memory set id '{0}': use 1-128 chars of [A-Za-z0-9_.:-]")]
    InvalidSetId(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("invalid engine config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
