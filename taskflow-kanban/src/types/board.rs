//! Board-level types: Board, Column

use super::ids::{BoardId, ColumnId};
use super::position::Rank;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Color tag given to boards created without one.
pub const DEFAULT_BOARD_COLOR: &str = "bg-blue-500";

/// The kanban board - metadata only.
/// Columns and tasks are separate rows owned by the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub id: BoardId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Color tag (a CSS class name in the web client, e.g. "bg-blue-500")
    pub color: String,
    pub updated_at: DateTime<Utc>,
    /// Owning user
    pub owner: String,
}

impl Board {
    /// Create a new board with the given title and owner
    pub fn new(title: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id: BoardId::new(),
            title: title.into(),
            description: None,
            color: DEFAULT_BOARD_COLOR.to_string(),
            updated_at: Utc::now(),
            owner: owner.into(),
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the color tag
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    /// Titles of the columns every new board starts with
    pub fn default_column_titles() -> [&'static str; 3] {
        ["To Do", "In Progress", "Done"]
    }
}

/// A column defines a workflow stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: ColumnId,
    pub board_id: BoardId,
    pub title: String,
    pub position: Rank,
}

impl Column {
    /// Create a new column on a board. The rank is assigned on insertion.
    pub fn new(board_id: BoardId, title: impl Into<String>) -> Self {
        Self {
            id: ColumnId::new(),
            board_id,
            title: title.into(),
            position: Rank::initial(),
        }
    }

    /// Set an explicit rank
    pub fn with_position(mut self, position: Rank) -> Self {
        self.position = position;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_creation() {
        let board = Board::new("Test Board", "user_1");
        assert_eq!(board.title, "Test Board");
        assert_eq!(board.owner, "user_1");
        assert_eq!(board.color, DEFAULT_BOARD_COLOR);
        assert!(board.description.is_none());
    }

    #[test]
    fn test_board_builders() {
        let board = Board::new("Test", "u")
            .with_description("A test board")
            .with_color("bg-red-500");
        assert_eq!(board.description.as_deref(), Some("A test board"));
        assert_eq!(board.color, "bg-red-500");
    }

    #[test]
    fn test_board_serialization_skips_empty_description() {
        let board = Board::new("Test", "u");
        let json = serde_json::to_value(&board).unwrap();
        assert!(json.get("description").is_none());
        let parsed: Board = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, board);
    }

    #[test]
    fn test_column_creation() {
        let board = Board::new("Test", "u");
        let column = Column::new(board.id.clone(), "Doing").with_position(Rank::new(7));
        assert_eq!(column.board_id, board.id);
        assert_eq!(column.position, Rank::new(7));
    }
}
