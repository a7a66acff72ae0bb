/// All errors that can be returned by an `AnswerStore` implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency conflict: the document was modified since the
    /// caller read it.
    #[error("concurrent conflict on document {document_id}: expected revision {expected_revision}")]
    ConcurrentConflict {
        document_id: String,
        expected_revision: i64,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    /// The configuration reference of a document that has left Draft
    /// cannot change.
    #[error("configuration of document {document_id} is frozen")]
    ConfigurationFrozen { document_id: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    /// A backend-specific storage error (I/O, connection, ...).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn document_not_found(id: &str) -> Self {
        StorageError::NotFound {
            kind: "document",
            id: id.to_string(),
        }
    }
}
