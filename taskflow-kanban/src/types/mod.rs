//! Core types for the board engine

mod board;
mod entity;
mod ids;
mod position;
mod task;
mod update;

// Re-export all types
pub use board::{Board, Column, DEFAULT_BOARD_COLOR};
pub use entity::{EntityKind, EntityRef, EntityState};
pub use ids::{BoardId, ColumnId, MutationId, TaskId};
pub use position::{Rank, RANK_SPACING};
pub use task::{Priority, Task};
pub use update::{BoardUpdate, ColumnUpdate, TaskUpdate};
