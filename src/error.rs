use thiserror::Error;

use crate::models::Condition;

#[derive(Debug, Error)]
pub enum TriageError {
    /// The scorer for this condition never loaded.
    #[error("{} model not loaded", .0.display_name())]
    ModelUnavailable(Condition),

    #[error("Missing field {0}")]
    MissingField(String),

    #[error("Invalid numeric values")]
    InvalidNumeric,

    #[error("{0}")]
    BadInput(String),

    /// The scorer broke its contract of returning a probability in [0, 1].
    #[error("model returned invalid score {0}")]
    InvalidScore(f64),

    #[error("scoring failed: {0}")]
    Scoring(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),
}

impl TriageError {
    /// Errors caused by the request itself rather than the service.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            TriageError::MissingField(_) | TriageError::InvalidNumeric | TriageError::BadInput(_)
        )
    }
}
