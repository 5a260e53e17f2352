//! Board listing helpers: filtering, summary statistics and board creation.

use crate::error::{KanbanError, Result};
use crate::model::BoardModel;
use crate::repository::{BoardSnapshot, Repository};
use crate::types::{Board, Column, Rank};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Filter over a list of boards
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardFilter {
    /// Case-insensitive substring of the title
    pub search: String,
    /// First day of the `updated_at` range, inclusive
    pub start: Option<NaiveDate>,
    /// Last day of the `updated_at` range, inclusive
    pub end: Option<NaiveDate>,
}

impl BoardFilter {
    pub fn matches(&self, board: &Board) -> bool {
        let search = self.search.trim().to_lowercase();
        if !search.is_empty() && !board.title.to_lowercase().contains(&search) {
            return false;
        }
        let day = board.updated_at.date_naive();
        self.start.map_or(true, |start| day >= start) && self.end.map_or(true, |end| day <= end)
    }

    /// Boards passing the filter, in their original order
    pub fn apply<'a>(&self, boards: &'a [Board]) -> Vec<&'a Board> {
        boards.iter().filter(|b| self.matches(b)).collect()
    }

    pub fn is_active(&self) -> bool {
        !self.search.trim().is_empty() || self.start.is_some() || self.end.is_some()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Summary numbers shown above the board list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BoardStats {
    pub total_boards: usize,
    /// Boards updated within the last seven days
    pub recently_updated: usize,
    pub total_tasks: usize,
    pub overdue_tasks: usize,
}

impl BoardStats {
    pub fn collect(boards: &[Board], models: &[BoardModel], now: DateTime<Utc>) -> Self {
        let week_ago = now - Duration::days(7);
        let today = now.date_naive();
        Self {
            total_boards: boards.len(),
            recently_updated: boards.iter().filter(|b| b.updated_at >= week_ago).count(),
            total_tasks: models.iter().map(BoardModel::task_count).sum(),
            overdue_tasks: models
                .iter()
                .flat_map(|m| m.tasks())
                .filter(|t| t.is_overdue(today))
                .count(),
        }
    }
}

/// Input for [`create_board`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBoard {
    pub title: String,
    pub owner: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl NewBoard {
    pub fn new(title: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            owner: owner.into(),
            description: None,
            color: None,
        }
    }
}

/// Create a board with the default columns and return what was stored
pub async fn create_board<R: Repository + ?Sized>(repo: &R, new: NewBoard) -> Result<BoardSnapshot> {
    let title = new.title.trim();
    if title.is_empty() {
        return Err(KanbanError::invalid_value("title", "board title must not be empty"));
    }

    let mut board = Board::new(title, new.owner);
    if let Some(description) = new.description.filter(|d| !d.trim().is_empty()) {
        board = board.with_description(description);
    }
    if let Some(color) = new.color {
        board = board.with_color(color);
    }
    repo.create_board(&board).await?;

    let mut columns = Vec::new();
    for (title, rank) in Board::default_column_titles().into_iter().zip(Rank::spaced(3)) {
        let column = Column::new(board.id.clone(), title).with_position(rank);
        repo.create_column(&column).await?;
        columns.push(column);
    }

    info!(board = %board.id, title = %board.title, "created board");
    Ok(BoardSnapshot {
        board,
        columns,
        tasks: Vec::new(),
    })
}
