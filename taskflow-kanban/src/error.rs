//! Error types for the board engine

use crate::repository::RepositoryError;
use thiserror::Error;

/// Result type for board engine operations
pub type Result<T> = std::result::Result<T, KanbanError>;

/// Errors that can occur in board engine operations
#[derive(Debug, Error)]
pub enum KanbanError {
    /// Board not found
    #[error("board not found: {id}")]
    BoardNotFound { id: String },

    /// Column not found
    #[error("column not found: {id}")]
    ColumnNotFound { id: String },

    /// Task not found
    #[error("task not found: {id}")]
    TaskNotFound { id: String },

    /// A task references a column that is not on its board
    #[error("task '{task}' references missing column '{column}'")]
    OrphanedTask { task: String, column: String },

    /// An ordering invariant was found broken after a mutation.
    /// The collection is poisoned from here on.
    #[error("ordering invariant violated in {collection}: {detail}")]
    InvariantViolated { collection: String, detail: String },

    /// A previous invariant violation halted reorders on this collection
    #[error("{collection} is poisoned by an earlier invariant violation")]
    CollectionPoisoned { collection: String },

    /// No rank could be found even after renormalizing
    #[error("rank space exhausted in {collection}")]
    RankSpaceExhausted { collection: String },

    /// A drag gesture is already in progress
    #[error("drag already in progress for {active}")]
    DragInProgress { active: String },

    /// The item cannot be dragged (unknown, or not a task/column)
    #[error("not draggable: {item}")]
    NotDraggable { item: String },

    /// Invalid field value
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    /// Configuration could not be loaded or is invalid
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Persistence failure reported by the repository
    #[error("persistence failed: {0}")]
    Persistence(#[from] RepositoryError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KanbanError {
    /// Create an invalid value error
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invariant violation error
    pub fn invariant(collection: impl ToString, detail: impl Into<String>) -> Self {
        Self::InvariantViolated {
            collection: collection.to_string(),
            detail: detail.into(),
        }
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }

    /// Check if this error leaves a collection unusable for further reorders
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvariantViolated { .. }
                | Self::CollectionPoisoned { .. }
                | Self::RankSpaceExhausted { .. }
        )
    }
}

impl From<figment::Error> for KanbanError {
    fn from(error: figment::Error) -> Self {
        Self::config(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KanbanError::TaskNotFound {
            id: "abc123".into(),
        };
        assert_eq!(err.to_string(), "task not found: abc123");
    }

    #[test]
    fn test_invariant_error() {
        let err = KanbanError::invariant("tasks of column todo", "duplicate rank 1024");
        assert!(err.to_string().contains("duplicate rank 1024"));
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable() {
        let err = KanbanError::from(RepositoryError::network("connection reset"));
        assert!(err.is_retryable());
        assert!(!KanbanError::TaskNotFound { id: "x".into() }.is_retryable());
    }
}
