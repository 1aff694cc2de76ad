use thiserror::Error;

/// Error taxonomy for the exposure-history engine.
///
/// `Validation` covers bad configuration or malformed input and is raised
/// before any output row is produced. `Invariant` marks a defect detected by
/// the post-stage checks (overlap, gap, quantity mismatch) and should never
/// be observable from a correct engine.
#[derive(Debug, Error)]
pub enum TveError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invariant violation: {0}")]
    Invariant(String),
    #[error("table error: {0}")]
    Table(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TveError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    pub fn table(msg: impl Into<String>) -> Self {
        Self::Table(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, TveError>;
