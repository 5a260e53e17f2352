//! Optimistic sync between the local board model and a [`Repository`].
//!
//! Local changes are applied at once and persisted in the background. Each
//! change is tracked as a [`PendingMutation`] holding the before and after
//! state of every entity it touched, so that a failed write can be rolled
//! back and a realtime notification about an entity still being written can
//! be held until the write resolves.
//!
//! [`Repository`]: crate::repository::Repository

mod coordinator;
mod pending;

pub use coordinator::SyncCoordinator;
pub use pending::{
    ops_for, Completion, EntitySnapshot, FieldPatch, MutationKind, MutationStatus,
    PendingMutation, PersistOp,
};

use crate::repository::RepositoryError;
use crate::types::{EntityRef, MutationId};
use serde::Serialize;

/// Notification for the rendering surface, sent after every model change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelEvent {
    /// Increases by one with every event
    pub revision: u64,
    pub kind: ModelEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelEventKind {
    /// A local change was applied and is being persisted
    LocalCommit { mutation: MutationId },
    /// The store acknowledged a local change
    Confirmed { mutation: MutationId },
    /// A local change could not be persisted and was undone
    RolledBack {
        mutation: MutationId,
        error: RepositoryError,
    },
    /// Another session's change was applied
    Remote { entity: EntityRef },
    /// The model was reloaded from the store
    Resynced,
    /// The drag session changed
    DragChanged,
}

/// How a mutation's persistence was resolved
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "resolution", rename_all = "snake_case")]
pub enum Resolution {
    Confirmed {
        mutation: MutationId,
    },
    RolledBack {
        mutation: MutationId,
        error: RepositoryError,
    },
    /// Every entity of the mutation had been taken over by newer mutations
    /// before it resolved, so its outcome was not applied
    Superseded {
        mutation: MutationId,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<RepositoryError>,
    },
}

impl Resolution {
    pub fn mutation(&self) -> &MutationId {
        match self {
            Self::Confirmed { mutation }
            | Self::RolledBack { mutation, .. }
            | Self::Superseded { mutation, .. } => mutation,
        }
    }

    pub fn status(&self) -> MutationStatus {
        match self {
            Self::Confirmed { .. } | Self::Superseded { error: None, .. } => {
                MutationStatus::Confirmed
            }
            Self::RolledBack { .. } | Self::Superseded { .. } => MutationStatus::Failed,
        }
    }

    pub fn is_rollback(&self) -> bool {
        matches!(self, Self::RolledBack { .. })
    }
}

/// What happened to a realtime notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteOutcome {
    /// Applied to the model
    Applied,
    /// Parked until the in-flight mutation on its entity resolves
    Held,
    /// Not about this board, about an entity the model does not have, or
    /// already reflected in the model
    Ignored,
}

/// One turn of the coordinator's event loop
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Resolved(Resolution),
    Remote(RemoteOutcome),
    Resynced,
    /// The realtime stream ended
    Closed,
}
