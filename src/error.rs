use thiserror::Error;

/// Errors surfaced across the core's public operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// The alias text is already bound, non-deleted, to some link.
    #[error("alias already in use")]
    AliasConflict,

    /// The link already carries the maximum number of live aliases.
    #[error("alias limit reached")]
    AliasLimitExceeded,

    #[error("not found")]
    NotFound,

    /// Aggregation range with `end <= start`.
    #[error("invalid range: end index must be greater than start index")]
    InvalidRange,

    /// Store kept failing after the retry budget was spent.
    #[error("store unavailable after {attempts} attempts")]
    Unavailable {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn validation(reason: impl Into<String>) -> Self {
        CoreError::Validation(reason.into())
    }

    /// Conflict-class errors the caller resolves by picking different input,
    /// as opposed to failures worth retrying or reporting.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::AliasConflict | CoreError::AliasLimitExceeded)
    }
}
