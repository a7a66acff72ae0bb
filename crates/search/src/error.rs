#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// The search cluster could not be reached or timed out.
    #[error("search backend unavailable: {0}")]
    Unavailable(String),

    #[error("search backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("index rebuild cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl SearchError {
    /// Transient failures worth retrying later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SearchError::Unavailable(_) | SearchError::Backend { status: 500..=599, .. }
        )
    }
}
