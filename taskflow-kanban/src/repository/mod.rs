//! Persistence contract for boards, columns and tasks.
//!
//! The engine never talks to a database directly. Everything it persists
//! goes through [`Repository`], and every write any session makes comes back
//! through the realtime stream returned by [`Repository::subscribe`].

mod memory;

pub use memory::{InMemoryRepository, RepoCall};

use crate::types::{
    Board, BoardId, BoardUpdate, Column, ColumnId, ColumnUpdate, EntityRef, Task, TaskId,
    TaskUpdate,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// Result type for repository calls
pub type RepoResult<T> = std::result::Result<T, RepositoryError>;

/// Failure reported by a repository call
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepositoryError {
    /// The store could not be reached
    #[error("network error: {message}")]
    Network { message: String },

    /// The store refused the write
    #[error("write rejected: {message}")]
    Rejected { message: String },

    /// The addressed row does not exist
    #[error("{entity} not found")]
    NotFound { entity: EntityRef },

    /// No acknowledgement arrived in time
    #[error("timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
}

impl RepositoryError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    pub fn not_found(entity: impl Into<EntityRef>) -> Self {
        Self::NotFound {
            entity: entity.into(),
        }
    }
}

/// A board with all of its columns and tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub board: Board,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// What happened to one row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data", rename_all = "snake_case")]
pub enum RowChange<R, U> {
    Inserted(R),
    Updated(U),
    Deleted,
}

impl<R, U> RowChange<R, U> {
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Deleted)
    }
}

/// Realtime notification of a row change, from this session or another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum ChangeEvent {
    Board {
        id: BoardId,
        change: RowChange<Board, BoardUpdate>,
    },
    Column {
        id: ColumnId,
        change: RowChange<Column, ColumnUpdate>,
    },
    Task {
        id: TaskId,
        change: RowChange<Task, TaskUpdate>,
    },
}

impl ChangeEvent {
    /// The row this event is about
    pub fn entity(&self) -> EntityRef {
        match self {
            Self::Board { id, .. } => EntityRef::Board(id.clone()),
            Self::Column { id, .. } => EntityRef::Column(id.clone()),
            Self::Task { id, .. } => EntityRef::Task(id.clone()),
        }
    }

    pub fn is_delete(&self) -> bool {
        match self {
            Self::Board { change, .. } => change.is_delete(),
            Self::Column { change, .. } => change.is_delete(),
            Self::Task { change, .. } => change.is_delete(),
        }
    }

    pub fn board_inserted(board: Board) -> Self {
        Self::Board {
            id: board.id.clone(),
            change: RowChange::Inserted(board),
        }
    }

    pub fn column_inserted(column: Column) -> Self {
        Self::Column {
            id: column.id.clone(),
            change: RowChange::Inserted(column),
        }
    }

    pub fn task_inserted(task: Task) -> Self {
        Self::Task {
            id: task.id.clone(),
            change: RowChange::Inserted(task),
        }
    }

    pub fn column_updated(id: ColumnId, update: ColumnUpdate) -> Self {
        Self::Column {
            id,
            change: RowChange::Updated(update),
        }
    }

    pub fn task_updated(id: TaskId, update: TaskUpdate) -> Self {
        Self::Task {
            id,
            change: RowChange::Updated(update),
        }
    }

    /// A deletion event for any entity
    pub fn deleted(entity: EntityRef) -> Self {
        match entity {
            EntityRef::Board(id) => Self::Board {
                id,
                change: RowChange::Deleted,
            },
            EntityRef::Column(id) => Self::Column {
                id,
                change: RowChange::Deleted,
            },
            EntityRef::Task(id) => Self::Task {
                id,
                change: RowChange::Deleted,
            },
        }
    }
}

/// Remote store of boards, columns and tasks with a realtime change stream.
///
/// Deleting a board or column cascades to what it contains. Every successful
/// write is echoed on the change stream, including writes made by this
/// session.
#[async_trait]
pub trait Repository: Send + Sync + 'static {
    /// Boards owned by `owner`, most recently updated first
    async fn list_boards(&self, owner: &str) -> RepoResult<Vec<Board>>;

    async fn load_board(&self, id: &BoardId) -> RepoResult<BoardSnapshot>;

    async fn create_board(&self, board: &Board) -> RepoResult<()>;

    async fn update_board(&self, id: &BoardId, update: &BoardUpdate) -> RepoResult<()>;

    async fn delete_board(&self, id: &BoardId) -> RepoResult<()>;

    async fn create_column(&self, column: &Column) -> RepoResult<()>;

    async fn update_column(&self, id: &ColumnId, update: &ColumnUpdate) -> RepoResult<()>;

    async fn delete_column(&self, id: &ColumnId) -> RepoResult<()>;

    async fn create_task(&self, task: &Task) -> RepoResult<()>;

    async fn update_task(&self, id: &TaskId, update: &TaskUpdate) -> RepoResult<()>;

    async fn delete_task(&self, id: &TaskId) -> RepoResult<()>;

    /// Subscribe to the realtime change stream
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_event_entity() {
        let event = ChangeEvent::deleted(EntityRef::Column(ColumnId::from_string("c1")));
        assert_eq!(event.entity(), EntityRef::Column(ColumnId::from_string("c1")));
    }

    #[test]
    fn test_change_event_json_shape() {
        let event = ChangeEvent::task_updated(
            TaskId::from_string("t1"),
            TaskUpdate::default().with_title("Renamed"),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "table": "task",
                "id": "t1",
                "change": {"op": "updated", "data": {"title": "Renamed"}}
            })
        );
        let back: ChangeEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::not_found(TaskId::from_string("t9"));
        assert_eq!(err.to_string(), "task t9 not found");
        assert_eq!(
            RepositoryError::Timeout { elapsed_ms: 250 }.to_string(),
            "timed out after 250ms"
        );
    }
}
