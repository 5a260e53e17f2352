//! Entity references and snapshots shared by the model, the engine and sync.

use super::board::{Board, Column};
use super::ids::{BoardId, ColumnId, TaskId};
use super::task::Task;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a persisted entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Board,
    Column,
    Task,
}

/// Reference to one persisted entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Board(BoardId),
    Column(ColumnId),
    Task(TaskId),
}

impl EntityRef {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Board(_) => EntityKind::Board,
            Self::Column(_) => EntityKind::Column,
            Self::Task(_) => EntityKind::Task,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Board(id) => id.as_str(),
            Self::Column(id) => id.as_str(),
            Self::Task(id) => id.as_str(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Board(id) => write!(f, "board {}", id),
            Self::Column(id) => write!(f, "column {}", id),
            Self::Task(id) => write!(f, "task {}", id),
        }
    }
}

impl From<TaskId> for EntityRef {
    fn from(id: TaskId) -> Self {
        Self::Task(id)
    }
}

impl From<ColumnId> for EntityRef {
    fn from(id: ColumnId) -> Self {
        Self::Column(id)
    }
}

/// Full state of one entity, as captured in a pending-mutation snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "state", rename_all = "snake_case")]
pub enum EntityState {
    Board(Board),
    Column(Column),
    Task(Task),
}

impl EntityState {
    pub fn entity(&self) -> EntityRef {
        match self {
            Self::Board(b) => EntityRef::Board(b.id.clone()),
            Self::Column(c) => EntityRef::Column(c.id.clone()),
            Self::Task(t) => EntityRef::Task(t.id.clone()),
        }
    }
}
