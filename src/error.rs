use std::time::Duration;

/// Failure modes of a projection run and of the service around it.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("simulation cancelled")]
    Cancelled,

    #[error("simulation exceeded time limit of {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("statistic for month {month} is not finite")]
    NonFinite { month: usize },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SimError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        SimError::InvalidInput(msg.into())
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(self, SimError::InvalidInput(_))
    }
}

pub type SimResult<T> = Result<T, SimError>;
