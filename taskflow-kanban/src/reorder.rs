//! Reorder engine: turn a drop intent into a new model and the minimal set
//! of rank changes to persist.

use crate::error::Result;
use crate::model::{BoardModel, Collection};
use crate::types::{ColumnId, EntityRef, Rank, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Where the user dropped the dragged item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DragIntent {
    Task {
        task: TaskId,
        /// Column the task was in when the drag started
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_column: Option<ColumnId>,
        to_column: ColumnId,
        to_index: usize,
    },
    Column {
        column: ColumnId,
        to_index: usize,
    },
}

impl DragIntent {
    /// Move a task, without a recorded source column
    pub fn task(task: impl Into<TaskId>, to_column: impl Into<ColumnId>, to_index: usize) -> Self {
        Self::Task {
            task: task.into(),
            from_column: None,
            to_column: to_column.into(),
            to_index,
        }
    }

    pub fn column(column: impl Into<ColumnId>, to_index: usize) -> Self {
        Self::Column {
            column: column.into(),
            to_index,
        }
    }

    /// The dragged entity
    pub fn entity(&self) -> EntityRef {
        match self {
            Self::Task { task, .. } => EntityRef::Task(task.clone()),
            Self::Column { column, .. } => EntityRef::Column(column.clone()),
        }
    }

    /// Sibling sets this intent reorders in `model`
    pub fn collections(&self, model: &BoardModel) -> Vec<Collection> {
        match self {
            Self::Task {
                task,
                from_column,
                to_column,
                ..
            } => {
                let source = model
                    .locate_task(task)
                    .map(|(column, _)| column)
                    .or_else(|| from_column.clone());
                let mut collections = vec![Collection::Tasks(to_column.clone())];
                if let Some(source) = source.filter(|s| s != to_column) {
                    collections.insert(0, Collection::Tasks(source));
                }
                collections
            }
            Self::Column { .. } => vec![Collection::Columns],
        }
    }
}

/// New persisted placement of one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub entity: EntityRef,
    pub position: Rank,
    /// New owning column, for tasks that changed column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<ColumnId>,
}

/// Entities whose persisted placement differs between two models
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    /// Compare the placement of `touched` entities in two models.
    ///
    /// Entities that are missing from either model, or that ended up where
    /// they started, are left out.
    pub fn diff(before: &BoardModel, after: &BoardModel, touched: &[EntityRef]) -> Self {
        let mut seen = HashSet::new();
        let mut changes = Vec::new();
        for entity in touched {
            if !seen.insert(entity) {
                continue;
            }
            let change = match entity {
                EntityRef::Board(_) => None,
                EntityRef::Column(id) => match (before.column(id), after.column(id)) {
                    (Some(old), Some(new)) if old.position != new.position => Some(Change {
                        entity: entity.clone(),
                        position: new.position,
                        column: None,
                    }),
                    _ => None,
                },
                EntityRef::Task(id) => match (before.task(id), after.task(id)) {
                    (Some(old), Some(new))
                        if old.position != new.position || old.column_id != new.column_id =>
                    {
                        Some(Change {
                            entity: entity.clone(),
                            position: new.position,
                            column: (old.column_id != new.column_id)
                                .then(|| new.column_id.clone()),
                        })
                    }
                    _ => None,
                },
            };
            changes.extend(change);
        }
        Self { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Change> {
        self.changes.iter()
    }

    pub fn get(&self, entity: &EntityRef) -> Option<&Change> {
        self.changes.iter().find(|c| &c.entity == entity)
    }

    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.get(entity).is_some()
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityRef> {
        self.changes.iter().map(|c| &c.entity)
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

/// Result of applying a drop intent
#[derive(Debug, Clone, PartialEq)]
pub struct Reorder {
    pub model: BoardModel,
    pub changes: ChangeSet,
}

impl Reorder {
    fn unchanged(model: &BoardModel) -> Self {
        Self {
            model: model.clone(),
            changes: ChangeSet::default(),
        }
    }
}

/// Apply a drop intent to a copy of `model`.
///
/// Intents that no longer make sense (unknown task or column, target
/// removed by another session) and drops that leave everything in place
/// produce an unchanged model and an empty change set. Only a broken or
/// poisoned ordering is an error.
pub fn compute_reorder(model: &BoardModel, intent: &DragIntent) -> Result<Reorder> {
    match intent {
        DragIntent::Task {
            task,
            from_column,
            to_column,
            to_index,
        } => {
            let Some((current, _)) = model.locate_task(task) else {
                debug!(%task, "dropped task is not on the board");
                return Ok(Reorder::unchanged(model));
            };
            if !model.has_column(to_column) {
                debug!(%task, column = %to_column, "drop target column is not on the board");
                return Ok(Reorder::unchanged(model));
            }
            if let Some(from) = from_column.as_ref().filter(|from| **from != current) {
                debug!(%task, expected = %from, actual = %current, "task changed column during drag, using its current column");
            }

            let mut next = model.clone();
            let touched = next.move_task(task, to_column, *to_index)?;
            let changes = ChangeSet::diff(model, &next, &touched);
            debug!(%task, column = %to_column, index = to_index, changed = changes.len(), "computed task reorder");
            Ok(Reorder {
                model: next,
                changes,
            })
        }
        DragIntent::Column { column, to_index } => {
            if !model.has_column(column) {
                debug!(%column, "dropped column is not on the board");
                return Ok(Reorder::unchanged(model));
            }
            if model.columns().len() < 2 {
                return Ok(Reorder::unchanged(model));
            }

            let mut next = model.clone();
            let touched = next.move_column(column, *to_index)?;
            let changes = ChangeSet::diff(model, &next, &touched);
            debug!(%column, index = to_index, changed = changes.len(), "computed column reorder");
            Ok(Reorder {
                model: next,
                changes,
            })
        }
    }
}
