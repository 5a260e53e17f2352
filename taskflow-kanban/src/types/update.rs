//! Partial field updates for boards, columns and tasks.
//!
//! The same types travel in both directions: the coordinator sends them to
//! the repository, and the realtime stream delivers them back as the changed
//! fields of a row. Nullable fields use `Option<Option<_>>`: the outer `None`
//! means "unchanged", `Some(None)` means "cleared".

use super::board::{Board, Column};
use super::ids::ColumnId;
use super::position::Rank;
use super::task::{Priority, Task};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// Deserialize a present field (even `null`) as `Some`, so that a missing
/// field stays `None` and an explicit `null` becomes `Some(None)`.
fn present<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Changed board fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl BoardUpdate {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.color.is_none()
    }

    /// Write the present fields into `board`. Returns whether anything changed.
    pub fn apply_to(&self, board: &mut Board) -> bool {
        let before = board.clone();
        if let Some(title) = &self.title {
            board.title = title.clone();
        }
        if let Some(description) = &self.description {
            board.description = description.clone();
        }
        if let Some(color) = &self.color {
            board.color = color.clone();
        }
        *board != before
    }

    /// Fields that differ between two versions of a board
    pub fn diff(before: &Board, after: &Board) -> Self {
        Self {
            title: (before.title != after.title).then(|| after.title.clone()),
            description: (before.description != after.description)
                .then(|| after.description.clone()),
            color: (before.color != after.color).then(|| after.color.clone()),
        }
    }

    /// This update minus the fields that `written` also sets
    pub fn without(&self, written: &Self) -> Self {
        Self {
            title: self.title.clone().filter(|_| written.title.is_none()),
            description: self.description.clone().filter(|_| written.description.is_none()),
            color: self.color.clone().filter(|_| written.color.is_none()),
        }
    }

    /// Fields set in either update, `self` first
    pub fn or(self, other: Self) -> Self {
        Self {
            title: self.title.or(other.title),
            description: self.description.or(other.description),
            color: self.color.or(other.color),
        }
    }
}

/// Changed column fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Rank>,
}

impl ColumnUpdate {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_position(mut self, position: Rank) -> Self {
        self.position = Some(position);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.position.is_none()
    }

    pub fn diff(before: &Column, after: &Column) -> Self {
        Self {
            title: (before.title != after.title).then(|| after.title.clone()),
            position: (before.position != after.position).then_some(after.position),
        }
    }

    pub fn without(&self, written: &Self) -> Self {
        Self {
            title: self.title.clone().filter(|_| written.title.is_none()),
            position: self.position.filter(|_| written.position.is_none()),
        }
    }

    pub fn or(self, other: Self) -> Self {
        Self {
            title: self.title.or(other.title),
            position: self.position.or(other.position),
        }
    }
}

/// Changed task fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "present")]
    pub due_date: Option<Option<NaiveDate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Rank>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_id: Option<ColumnId>,
}

impl TaskUpdate {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_due_date(mut self, due_date: Option<NaiveDate>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn with_position(mut self, position: Rank) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_column(mut self, column_id: ColumnId) -> Self {
        self.column_id = Some(column_id);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.due_date.is_none()
            && self.position.is_none()
            && self.column_id.is_none()
    }

    /// Write the present non-placement fields into `task`.
    ///
    /// Position and owning column are left to the model, which has to
    /// re-slot the task to keep its sibling set ordered.
    pub fn apply_fields(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
    }

    pub fn diff(before: &Task, after: &Task) -> Self {
        Self {
            title: (before.title != after.title).then(|| after.title.clone()),
            description: (before.description != after.description)
                .then(|| after.description.clone()),
            priority: (before.priority != after.priority).then_some(after.priority),
            due_date: (before.due_date != after.due_date).then_some(after.due_date),
            position: (before.position != after.position).then_some(after.position),
            column_id: (before.column_id != after.column_id).then(|| after.column_id.clone()),
        }
    }

    pub fn without(&self, written: &Self) -> Self {
        Self {
            title: self.title.clone().filter(|_| written.title.is_none()),
            description: self.description.clone().filter(|_| written.description.is_none()),
            priority: self.priority.filter(|_| written.priority.is_none()),
            due_date: self.due_date.filter(|_| written.due_date.is_none()),
            position: self.position.filter(|_| written.position.is_none()),
            column_id: self.column_id.clone().filter(|_| written.column_id.is_none()),
        }
    }

    pub fn or(self, other: Self) -> Self {
        Self {
            title: self.title.or(other.title),
            description: self.description.or(other.description),
            priority: self.priority.or(other.priority),
            due_date: self.due_date.or(other.due_date),
            position: self.position.or(other.position),
            column_id: self.column_id.or(other.column_id),
        }
    }
}
