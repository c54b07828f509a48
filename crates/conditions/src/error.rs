//! Error types for condition construction and evaluation.

use cadence_core::CadenceError;

/// Errors that can occur while building or evaluating a condition tree.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    /// Malformed condition tree or result arguments (bad cron, unknown
    /// timezone, empty operand list, conflicting metadata arguments).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The asset graph could not answer a query.
    #[error("Asset graph error: {0}")]
    Graph(String),

    /// The partition state reader could not answer a query.
    #[error("Partition state error: {0}")]
    State(String),

    /// The condition or wipe-history store failed.
    #[error("Store error: {0}")]
    Store(String),

    #[error(transparent)]
    Core(CadenceError),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<CadenceError> for EvaluationError {
    fn from(e: CadenceError) -> Self {
        match e {
            CadenceError::InvalidCron { .. } | CadenceError::UnknownTimezone(_) => {
                EvaluationError::Config(e.to_string())
            }
            other => EvaluationError::Core(other),
        }
    }
}

impl EvaluationError {
    pub fn is_config(&self) -> bool {
        matches!(self, EvaluationError::Config(_))
    }
}

/// Result alias for condition operations.
pub type Result<T> = std::result::Result<T, EvaluationError>;
