//! Pending mutations and the persistence calls they carry.

use crate::repository::{ChangeEvent, RepoResult, Repository, RepositoryError, RowChange};
use crate::types::{
    BoardId, BoardUpdate, Column, ColumnId, ColumnUpdate, EntityRef, EntityState,
    MutationId, Task, TaskId, TaskUpdate,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::watch;

/// One repository call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PersistOp {
    CreateColumn { column: Column },
    UpdateColumn { id: ColumnId, update: ColumnUpdate },
    DeleteColumn { id: ColumnId },
    CreateTask { task: Task },
    UpdateTask { id: TaskId, update: TaskUpdate },
    DeleteTask { id: TaskId },
    UpdateBoard { id: BoardId, update: BoardUpdate },
}

impl PersistOp {
    pub fn entity(&self) -> EntityRef {
        match self {
            Self::CreateColumn { column } => EntityRef::Column(column.id.clone()),
            Self::UpdateColumn { id, .. } | Self::DeleteColumn { id } => EntityRef::Column(id.clone()),
            Self::CreateTask { task } => EntityRef::Task(task.id.clone()),
            Self::UpdateTask { id, .. } | Self::DeleteTask { id } => EntityRef::Task(id.clone()),
            Self::UpdateBoard { id, .. } => EntityRef::Board(id.clone()),
        }
    }

    pub async fn run<R: Repository + ?Sized>(&self, repo: &R) -> RepoResult<()> {
        match self {
            Self::CreateColumn { column } => repo.create_column(column).await,
            Self::UpdateColumn { id, update } => repo.update_column(id, update).await,
            Self::DeleteColumn { id } => repo.delete_column(id).await,
            Self::CreateTask { task } => repo.create_task(task).await,
            Self::UpdateTask { id, update } => repo.update_task(id, update).await,
            Self::DeleteTask { id } => repo.delete_task(id).await,
            Self::UpdateBoard { id, update } => repo.update_board(id, update).await,
        }
    }

    /// Rewrite only the rank of an entity to its current value
    pub(crate) fn rank_of(state: &EntityState) -> Option<Self> {
        match state {
            EntityState::Column(column) => Some(Self::UpdateColumn {
                id: column.id.clone(),
                update: ColumnUpdate::default().with_position(column.position),
            }),
            EntityState::Task(task) => Some(Self::UpdateTask {
                id: task.id.clone(),
                update: TaskUpdate::default().with_position(task.position),
            }),
            EntityState::Board(_) => None,
        }
    }
}

/// The fields of one entity that a mutation changed
#[derive(Debug, Clone, PartialEq)]
pub enum FieldPatch {
    Board(BoardUpdate),
    Column(ColumnUpdate),
    Task(TaskUpdate),
}

impl FieldPatch {
    /// Fields that differ between two states of the same entity
    pub fn between(before: &EntityState, after: &EntityState) -> Option<Self> {
        match (before, after) {
            (EntityState::Board(b), EntityState::Board(a)) => Some(Self::Board(BoardUpdate::diff(b, a))),
            (EntityState::Column(b), EntityState::Column(a)) => {
                Some(Self::Column(ColumnUpdate::diff(b, a)))
            }
            (EntityState::Task(b), EntityState::Task(a)) => Some(Self::Task(TaskUpdate::diff(b, a))),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Board(u) => u.is_empty(),
            Self::Column(u) => u.is_empty(),
            Self::Task(u) => u.is_empty(),
        }
    }
}

/// Before and after state of one entity touched by a mutation
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot {
    pub entity: EntityRef,
    /// `None` when the mutation created the entity
    pub before: Option<EntityState>,
    /// `None` when the mutation deleted the entity
    pub after: Option<EntityState>,
}

impl EntitySnapshot {
    pub fn is_change(&self) -> bool {
        self.before != self.after
    }

    /// Fields the mutation wrote, for entities it neither created nor deleted
    pub fn written(&self) -> Option<FieldPatch> {
        match (&self.before, &self.after) {
            (Some(before), Some(after)) => FieldPatch::between(before, after),
            _ => None,
        }
    }

    /// What is left of a held notification once this mutation is confirmed.
    ///
    /// Our own insert echo is dropped, updates lose the fields this mutation
    /// wrote, and nothing but a deletion survives for an entity we deleted.
    pub fn residue(&self, event: ChangeEvent) -> Option<ChangeEvent> {
        if self.after.is_none() {
            return event.is_delete().then_some(event);
        }

        let written = self.written();
        match event {
            ChangeEvent::Board {
                id,
                change: RowChange::Updated(update),
            } => {
                let update = match &written {
                    Some(FieldPatch::Board(w)) => update.without(w),
                    _ => update,
                };
                (!update.is_empty()).then_some(ChangeEvent::Board {
                    id,
                    change: RowChange::Updated(update),
                })
            }
            ChangeEvent::Column {
                id,
                change: RowChange::Updated(update),
            } => {
                let update = match &written {
                    Some(FieldPatch::Column(w)) => update.without(w),
                    _ => update,
                };
                (!update.is_empty()).then_some(ChangeEvent::Column {
                    id,
                    change: RowChange::Updated(update),
                })
            }
            ChangeEvent::Task {
                id,
                change: RowChange::Updated(update),
            } => {
                let update = match &written {
                    Some(FieldPatch::Task(w)) => update.without(w),
                    _ => update,
                };
                (!update.is_empty()).then_some(ChangeEvent::Task {
                    id,
                    change: RowChange::Updated(update),
                })
            }
            ChangeEvent::Board {
                change: RowChange::Inserted(_),
                ..
            }
            | ChangeEvent::Column {
                change: RowChange::Inserted(_),
                ..
            }
            | ChangeEvent::Task {
                change: RowChange::Inserted(_),
                ..
            } if self.before.is_none() => None,
            other => Some(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    /// Persistence has been issued and not yet acknowledged
    InFlight,
    /// The store acknowledged every call
    Confirmed,
    /// A call failed or timed out and the local change was rolled back
    Failed,
}

/// What a mutation was made for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// A user-driven change
    Local,
    /// Rank repairs after a collision or a load
    Repair,
}

/// One outstanding optimistic change
#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub id: MutationId,
    pub label: String,
    pub kind: MutationKind,
    pub snapshots: Vec<EntitySnapshot>,
    pub ops: Vec<PersistOp>,
    pub status: MutationStatus,
    pub(crate) done: watch::Receiver<bool>,
}

impl PendingMutation {
    pub fn snapshot(&self, entity: &EntityRef) -> Option<&EntitySnapshot> {
        self.snapshots.iter().find(|s| &s.entity == entity)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityRef> {
        self.snapshots.iter().map(|s| &s.entity)
    }
}

/// Outcome of a mutation's persistence, reported back to the coordinator
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub mutation: MutationId,
    pub result: RepoResult<()>,
}

/// Repository calls that take a set of snapshots from `before` to `after`.
///
/// `unsettled` holds, per entity, the states that earlier in-flight writes
/// may leave in the store. Updates also carry every field that differs from
/// one of those, so the store lands on `after` whether or not the earlier
/// writes succeed.
///
/// Creates and updates of columns go ahead of tasks. Tasks that disappear
/// with their deleted column get no call of their own, the store cascades.
pub fn ops_for(
    snapshots: &[EntitySnapshot],
    unsettled: &HashMap<EntityRef, Vec<EntityState>>,
) -> Vec<PersistOp> {
    let mut ordered: Vec<&EntitySnapshot> = snapshots.iter().collect();
    ordered.sort_by(|a, b| a.entity.cmp(&b.entity));

    let deleted_columns: HashSet<&ColumnId> = ordered
        .iter()
        .filter_map(|s| match (&s.entity, &s.after) {
            (EntityRef::Column(id), None) => Some(id),
            _ => None,
        })
        .collect();

    let mut ops = Vec::new();
    for snapshot in ordered {
        let earlier = unsettled.get(&snapshot.entity).map(Vec::as_slice).unwrap_or_default();
        let op = match (&snapshot.before, &snapshot.after) {
            (None, None) => None,
            (None, Some(EntityState::Column(column))) => Some(PersistOp::CreateColumn {
                column: column.clone(),
            }),
            (None, Some(EntityState::Task(task))) => Some(PersistOp::CreateTask { task: task.clone() }),
            (None, Some(EntityState::Board(_))) => None,
            (Some(EntityState::Column(column)), None) => Some(PersistOp::DeleteColumn {
                id: column.id.clone(),
            }),
            (Some(EntityState::Task(task)), None) => (!deleted_columns.contains(&task.column_id))
                .then(|| PersistOp::DeleteTask { id: task.id.clone() }),
            (Some(EntityState::Board(_)), None) => None,
            (Some(EntityState::Board(before)), Some(EntityState::Board(after))) => {
                let update = earlier
                    .iter()
                    .filter_map(|state| match state {
                        EntityState::Board(earlier) => Some(BoardUpdate::diff(earlier, after)),
                        _ => None,
                    })
                    .fold(BoardUpdate::diff(before, after), BoardUpdate::or);
                (!update.is_empty()).then(|| PersistOp::UpdateBoard {
                    id: after.id.clone(),
                    update,
                })
            }
            (Some(EntityState::Column(before)), Some(EntityState::Column(after))) => {
                let update = earlier
                    .iter()
                    .filter_map(|state| match state {
                        EntityState::Column(earlier) => Some(ColumnUpdate::diff(earlier, after)),
                        _ => None,
                    })
                    .fold(ColumnUpdate::diff(before, after), ColumnUpdate::or);
                (!update.is_empty()).then(|| PersistOp::UpdateColumn {
                    id: after.id.clone(),
                    update,
                })
            }
            (Some(EntityState::Task(before)), Some(EntityState::Task(after))) => {
                let update = earlier
                    .iter()
                    .filter_map(|state| match state {
                        EntityState::Task(earlier) => Some(TaskUpdate::diff(earlier, after)),
                        _ => None,
                    })
                    .fold(TaskUpdate::diff(before, after), TaskUpdate::or);
                (!update.is_empty()).then(|| PersistOp::UpdateTask {
                    id: after.id.clone(),
                    update,
                })
            }
            (Some(_), Some(_)) => None,
        };
        ops.extend(op);
    }
    ops
}

/// Issue a mutation's calls in order, after every mutation it waits on has
/// finished writing. Each call gets `limit`; running out is a failure.
pub(crate) async fn persist<R: Repository>(
    repo: &R,
    ops: &[PersistOp],
    mut wait_for: Vec<watch::Receiver<bool>>,
    limit: Duration,
) -> RepoResult<()> {
    for done in &mut wait_for {
        while !*done.borrow() {
            if done.changed().await.is_err() {
                break;
            }
        }
    }

    for op in ops {
        match tokio::time::timeout(limit, op.run(repo)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(RepositoryError::Timeout {
                    elapsed_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }
    Ok(())
}
