use thiserror::Error;

#[derive(Error, Debug)]
pub enum CadenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("Partition key not found: {0}")]
    UnknownPartition(String),

    #[error("Partition ranges are not supported for {0}")]
    RangeUnsupported(String),

    #[error("{0}")]
    Other(String),
}

pub type CoreResult<T> = std::result::Result<T, CadenceError>;
