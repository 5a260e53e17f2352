//! Kanban board engine with drag-and-drop reordering and optimistic sync
//!
//! This crate keeps a local, always-ordered copy of one kanban board and
//! synchronizes it with a remote store. Local changes show up immediately;
//! the store is written in the background and failed writes are rolled back.
//!
//! ## Overview
//!
//! - **Ordered model** - [`BoardModel`] holds columns and tasks sorted by [`Rank`]
//! - **Drag sessions** - [`DragSession`] turns pointer hovers into a drop intent
//! - **Reorders** - [`compute_reorder`] applies an intent with array-move semantics
//! - **Optimistic sync** - [`SyncCoordinator`] persists through a [`Repository`],
//!   rolls back failures and holds realtime notifications for in-flight entities
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskflow_kanban::{
//!     create_board, DragIntent, InMemoryRepository, NewBoard, SyncConfig, SyncCoordinator,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let repo = Arc::new(InMemoryRepository::new());
//! let snapshot = create_board(repo.as_ref(), NewBoard::new("Roadmap", "ana")).await?;
//! let board = snapshot.board.id.clone();
//!
//! let mut sync = SyncCoordinator::open(repo, &board, SyncConfig::default()).await?;
//! let todo = snapshot.columns[0].id.clone();
//! let done = snapshot.columns[2].id.clone();
//! let (task, _) = sync.create_task(taskflow_kanban::Task::new(todo, "Write docs"))?;
//!
//! // Visible at once, persisted in the background
//! sync.commit(&DragIntent::task(task, done, 0))?;
//! for resolution in sync.settle().await? {
//!     println!("{:?}", resolution);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dashboard;
pub mod drag;
mod error;
pub mod model;
pub mod reorder;
pub mod repository;
pub mod sync;
pub mod types;

pub use config::SyncConfig;
pub use dashboard::{create_board, BoardFilter, BoardStats, NewBoard};
pub use drag::{DragSession, DragState, DropTarget, Droppable, Point, Rect, Slot};
pub use error::{KanbanError, Result};
pub use model::{BoardModel, Collection};
pub use reorder::{compute_reorder, Change, ChangeSet, DragIntent, Reorder};
pub use repository::{
    BoardSnapshot, ChangeEvent, InMemoryRepository, RepoResult, Repository, RepositoryError,
    RowChange,
};
pub use sync::{
    ModelEvent, ModelEventKind, PendingMutation, RemoteOutcome, Resolution, Step, SyncCoordinator,
};

// Re-export commonly used types
pub use types::{
    Board, BoardId, BoardUpdate, Column, ColumnId, ColumnUpdate, EntityRef, EntityState,
    MutationId, Priority, Rank, Task, TaskId, TaskUpdate,
};
