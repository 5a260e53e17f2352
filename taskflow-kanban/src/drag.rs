//! Drag session state machine.
//!
//! The input layer reports pointer positions and droppable geometry; the
//! session tracks what is being dragged and what it is over, and on release
//! resolves that into a [`DragIntent`] against the current model.
//!
//! ```text
//! Idle --begin--> Dragging --hover--> OverTarget --release--> Idle (+ intent)
//!   ^                |                    |
//!   +----cancel------+--------cancel------+
//! ```

use crate::error::{KanbanError, Result};
use crate::model::BoardModel;
use crate::reorder::DragIntent;
use crate::types::{ColumnId, EntityRef, TaskId};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Pointer position
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn distance_squared(self, other: Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

/// Bounding box of a droppable element
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// What a droppable element represents
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum DropTarget {
    Column(ColumnId),
    Task(TaskId),
}

impl DropTarget {
    pub fn entity(&self) -> EntityRef {
        match self {
            Self::Column(id) => EntityRef::Column(id.clone()),
            Self::Task(id) => EntityRef::Task(id.clone()),
        }
    }
}

/// Which side of a hovered task the drop lands on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Before,
    After,
}

/// A drop target and where it is on screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Droppable {
    pub target: DropTarget,
    pub rect: Rect,
}

impl Droppable {
    pub fn column(id: impl Into<ColumnId>, rect: Rect) -> Self {
        Self {
            target: DropTarget::Column(id.into()),
            rect,
        }
    }

    pub fn task(id: impl Into<TaskId>, rect: Rect) -> Self {
        Self {
            target: DropTarget::Task(id.into()),
            rect,
        }
    }
}

/// Where the dragged item was when the gesture started
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragOrigin {
    /// Source column, for task drags
    pub column: Option<ColumnId>,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum DragState {
    #[default]
    Idle,
    Dragging {
        active: EntityRef,
        origin: DragOrigin,
    },
    OverTarget {
        active: EntityRef,
        origin: DragOrigin,
        over: DropTarget,
        slot: Slot,
    },
}

impl DragState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// The dragged entity, if a gesture is in progress
    pub fn active(&self) -> Option<&EntityRef> {
        match self {
            Self::Idle => None,
            Self::Dragging { active, .. } | Self::OverTarget { active, .. } => Some(active),
        }
    }

    pub fn over(&self) -> Option<(&DropTarget, Slot)> {
        match self {
            Self::OverTarget { over, slot, .. } => Some((over, *slot)),
            _ => None,
        }
    }
}

/// One drag gesture at a time
#[derive(Debug, Clone, Default)]
pub struct DragSession {
    state: DragState,
}

impl DragSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &DragState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        !self.state.is_idle()
    }

    /// Start dragging a task or column
    pub fn begin(&mut self, model: &BoardModel, active: EntityRef) -> Result<()> {
        if let Some(current) = self.state.active() {
            return Err(KanbanError::DragInProgress {
                active: current.to_string(),
            });
        }

        let origin = match &active {
            EntityRef::Task(id) => model.locate_task(id).map(|(column, index)| DragOrigin {
                column: Some(column),
                index,
            }),
            EntityRef::Column(id) => model.column_index(id).map(|index| DragOrigin {
                column: None,
                index,
            }),
            EntityRef::Board(_) => None,
        };
        let origin = origin.ok_or_else(|| KanbanError::NotDraggable {
            item: active.to_string(),
        })?;

        debug!(%active, index = origin.index, "drag started");
        self.state = DragState::Dragging { active, origin };
        Ok(())
    }

    /// Update the drop candidate from the pointer position.
    ///
    /// The droppable whose centre is closest wins, ties going to the one
    /// reported first. Column drags only see column droppables. Returns
    /// whether the candidate changed; with no candidates the previous one is
    /// kept.
    pub fn hover(&mut self, pointer: Point, droppables: &[Droppable]) -> bool {
        let (active, origin, previous) = match &self.state {
            DragState::Idle => return false,
            DragState::Dragging { active, origin } => (active, origin, None),
            DragState::OverTarget {
                active,
                origin,
                over,
                slot,
            } => (active, origin, Some((over, *slot))),
        };

        let columns_only = matches!(active, EntityRef::Column(_));
        let mut best: Option<(&Droppable, f64)> = None;
        for droppable in droppables {
            if columns_only && !matches!(droppable.target, DropTarget::Column(_)) {
                continue;
            }
            let distance = pointer.distance_squared(droppable.rect.center());
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((droppable, distance));
            }
        }
        let Some((droppable, _)) = best else {
            return false;
        };

        let slot = match droppable.target {
            DropTarget::Task(_) if pointer.y > droppable.rect.center().y => Slot::After,
            _ => Slot::Before,
        };
        if previous == Some((&droppable.target, slot)) {
            return false;
        }

        self.state = DragState::OverTarget {
            active: active.clone(),
            origin: origin.clone(),
            over: droppable.target.clone(),
            slot,
        };
        true
    }

    /// End the gesture. Returns the drop intent, or `None` when the release
    /// cancels (no target, or the target no longer exists).
    pub fn release(&mut self, model: &BoardModel) -> Option<DragIntent> {
        match std::mem::take(&mut self.state) {
            DragState::Idle => None,
            DragState::Dragging { active, .. } => {
                debug!(%active, "released without a drop target");
                None
            }
            DragState::OverTarget {
                active,
                origin,
                over,
                slot,
            } => {
                let intent = resolve_drop(model, &active, origin, &over, slot);
                if intent.is_none() {
                    debug!(%active, target = %over.entity(), "drop target gone, treating release as cancel");
                }
                intent
            }
        }
    }

    /// Abandon the gesture
    pub fn cancel(&mut self) {
        if let Some(active) = self.state.active() {
            debug!(%active, "drag cancelled");
        }
        self.state = DragState::Idle;
    }
}

fn resolve_drop(
    model: &BoardModel,
    active: &EntityRef,
    origin: DragOrigin,
    over: &DropTarget,
    slot: Slot,
) -> Option<DragIntent> {
    match active {
        EntityRef::Task(task) => {
            let (current_column, current_index) = model.locate_task(task)?;
            let (to_column, to_index) = match over {
                DropTarget::Task(target) if target == task => (current_column, current_index),
                DropTarget::Task(target) => {
                    let (column, index) = model.locate_task(target)?;
                    // index among the siblings once the dragged task is lifted out
                    let mut index = if column == current_column && current_index < index {
                        index - 1
                    } else {
                        index
                    };
                    if slot == Slot::After {
                        index += 1;
                    }
                    (column, index)
                }
                DropTarget::Column(column) => {
                    if !model.has_column(column) {
                        return None;
                    }
                    let len = model.tasks_of(column).len();
                    let index = if *column == current_column { len - 1 } else { len };
                    (column.clone(), index)
                }
            };
            Some(DragIntent::Task {
                task: task.clone(),
                from_column: origin.column,
                to_column,
                to_index,
            })
        }
        EntityRef::Column(column) => {
            model.column(column)?;
            let to_index = match over {
                DropTarget::Column(target) => model.column_index(target)?,
                DropTarget::Task(target) => {
                    let (owner, _) = model.locate_task(target)?;
                    model.column_index(&owner)?
                }
            };
            Some(DragIntent::Column {
                column: column.clone(),
                to_index,
            })
        }
        EntityRef::Board(_) => None,
    }
}
