//! BoardModel - the ordered in-memory board
//!
//! A board is a rank-ordered sequence of columns, and each column a
//! rank-ordered sequence of tasks. The model is plain state plus pure
//! transformations: it knows nothing about persistence or gestures.
//!
//! Every mutation re-checks the sibling sets it touched. A broken ordering is
//! a defect, not a runtime condition, so the affected collection is poisoned
//! and refuses further reorders instead of silently drifting.

use crate::error::{KanbanError, Result};
use crate::repository::BoardSnapshot;
use crate::types::{
    Board, BoardUpdate, Column, ColumnId, ColumnUpdate, EntityRef, EntityState, Rank, Task,
    TaskId, TaskUpdate,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

/// One sibling set of the board
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Collection {
    /// The board's columns
    Columns,
    /// The tasks of one column
    Tasks(ColumnId),
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Columns => f.write_str("board columns"),
            Self::Tasks(id) => write!(f, "tasks of column {}", id),
        }
    }
}

/// Something that occupies a ranked slot among siblings
trait Ranked {
    fn rank(&self) -> Rank;
    fn set_rank(&mut self, rank: Rank);
    fn entity(&self) -> EntityRef;
}

impl Ranked for Column {
    fn rank(&self) -> Rank {
        self.position
    }

    fn set_rank(&mut self, rank: Rank) {
        self.position = rank;
    }

    fn entity(&self) -> EntityRef {
        EntityRef::Column(self.id.clone())
    }
}

impl Ranked for Task {
    fn rank(&self) -> Rank {
        self.position
    }

    fn set_rank(&mut self, rank: Rank) {
        self.position = rank;
    }

    fn entity(&self) -> EntityRef {
        EntityRef::Task(self.id.clone())
    }
}

/// The ordered board: columns by rank, each column's tasks by rank
#[derive(Debug, Clone, PartialEq)]
pub struct BoardModel {
    board: Board,
    columns: Vec<Column>,
    tasks: HashMap<ColumnId, Vec<Task>>,
    poisoned: HashSet<Collection>,
}

impl BoardModel {
    /// Create an empty model for a board
    pub fn new(board: Board) -> Self {
        Self {
            board,
            columns: Vec::new(),
            tasks: HashMap::new(),
            poisoned: HashSet::new(),
        }
    }

    /// Build a model from rows as they come out of the repository.
    ///
    /// Rows may arrive in any order and with gaps between ranks. Sibling sets
    /// that arrive with duplicate ranks are renormalized; the entities whose
    /// rank changed are returned so the caller can persist the repair.
    /// Columns belonging to another board are skipped.
    pub fn load(board: Board, columns: Vec<Column>, tasks: Vec<Task>) -> Result<(Self, Vec<EntityRef>)> {
        let mut model = Self::new(board);
        let mut repaired = Vec::new();

        let mut columns: Vec<Column> = columns
            .into_iter()
            .filter(|c| {
                let ours = c.board_id == model.board.id;
                if !ours {
                    warn!(column = %c.id, board = %c.board_id, "skipping column of another board");
                }
                ours
            })
            .collect();
        columns.sort_by(|a, b| (a.position, &a.id).cmp(&(b.position, &b.id)));
        repaired.extend(repair_duplicates(&mut columns));

        for column in &columns {
            model.tasks.insert(column.id.clone(), Vec::new());
        }
        model.columns = columns;

        for task in tasks {
            let Some(siblings) = model.tasks.get_mut(&task.column_id) else {
                return Err(KanbanError::OrphanedTask {
                    task: task.id.to_string(),
                    column: task.column_id.to_string(),
                });
            };
            siblings.push(task);
        }

        for column in &model.columns {
            if let Some(siblings) = model.tasks.get_mut(&column.id) {
                siblings.sort_by(|a, b| (a.position, &a.id).cmp(&(b.position, &b.id)));
                repaired.extend(repair_duplicates(siblings));
            }
        }

        if !repaired.is_empty() {
            warn!(count = repaired.len(), "renormalized duplicate ranks while loading board");
        }
        Ok((model, repaired))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Columns in display order
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Tasks of a column in display order. Empty for an unknown column.
    pub fn tasks_of(&self, column: &ColumnId) -> &[Task] {
        self.tasks.get(column).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All tasks, column by column, in display order
    pub fn tasks(&self) -> impl Iterator<Item = &Task> + '_ {
        self.columns
            .iter()
            .flat_map(move |column| self.tasks_of(&column.id).iter())
    }

    pub fn task_count(&self) -> usize {
        self.tasks.values().map(Vec::len).sum()
    }

    /// The rows of this board, in display order
    pub fn to_snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            board: self.board.clone(),
            columns: self.columns.clone(),
            tasks: self.tasks().cloned().collect(),
        }
    }

    pub fn column(&self, id: &ColumnId) -> Option<&Column> {
        self.columns.iter().find(|c| &c.id == id)
    }

    pub fn column_index(&self, id: &ColumnId) -> Option<usize> {
        self.columns.iter().position(|c| &c.id == id)
    }

    pub fn has_column(&self, id: &ColumnId) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.locate_task(id)
            .and_then(|(column, index)| self.tasks.get(&column).and_then(|s| s.get(index)))
    }

    /// Owning column and index of a task
    pub fn locate_task(&self, id: &TaskId) -> Option<(ColumnId, usize)> {
        self.columns.iter().find_map(|column| {
            self.tasks_of(&column.id)
                .iter()
                .position(|t| &t.id == id)
                .map(|index| (column.id.clone(), index))
        })
    }

    /// Whether an entity currently exists in the model
    pub fn contains(&self, entity: &EntityRef) -> bool {
        match entity {
            EntityRef::Board(id) => &self.board.id == id,
            EntityRef::Column(id) => self.has_column(id),
            EntityRef::Task(id) => self.locate_task(id).is_some(),
        }
    }

    pub fn is_poisoned(&self, collection: &Collection) -> bool {
        self.poisoned.contains(collection)
    }

    /// Halt further reorders on a collection
    pub fn poison(&mut self, collection: Collection) {
        warn!(%collection, "collection poisoned");
        self.poisoned.insert(collection);
    }

    // =========================================================================
    // Reordering
    // =========================================================================

    /// Move a task to `to_index` of `to_column`.
    ///
    /// The index addresses the target sequence with the moved task already
    /// removed, and is clamped to its length. The moved task takes the
    /// midpoint rank of its new neighbours; the target column is renormalized
    /// first when the neighbours leave no room. Returns the entities whose
    /// rank or column may have changed (empty for a same-slot move).
    pub fn move_task(
        &mut self,
        id: &TaskId,
        to_column: &ColumnId,
        to_index: usize,
    ) -> Result<Vec<EntityRef>> {
        let (from_column, from_index) = self
            .locate_task(id)
            .ok_or_else(|| KanbanError::TaskNotFound { id: id.to_string() })?;
        if !self.has_column(to_column) {
            return Err(KanbanError::ColumnNotFound {
                id: to_column.to_string(),
            });
        }

        let source = Collection::Tasks(from_column.clone());
        let target = Collection::Tasks(to_column.clone());
        self.ensure_healthy(&source)?;
        self.ensure_healthy(&target)?;

        let same_column = &from_column == to_column;
        let target_len = self.tasks_of(to_column).len() - usize::from(same_column);
        let index = to_index.min(target_len);
        if same_column && index == from_index {
            return Ok(Vec::new());
        }

        let mut task = match self.tasks.get_mut(&from_column) {
            Some(siblings) => siblings.remove(from_index),
            None => return Err(KanbanError::TaskNotFound { id: id.to_string() }),
        };
        task.column_id = to_column.clone();

        let touched = self.insert_task_at(to_column, index, task)?;
        if !same_column {
            self.verify(&source)?;
        }
        Ok(touched)
    }

    /// Move a column to `to_index` of the board's column sequence.
    pub fn move_column(&mut self, id: &ColumnId, to_index: usize) -> Result<Vec<EntityRef>> {
        let from_index = self
            .column_index(id)
            .ok_or_else(|| KanbanError::ColumnNotFound { id: id.to_string() })?;
        self.ensure_healthy(&Collection::Columns)?;

        let index = to_index.min(self.columns.len() - 1);
        if index == from_index {
            return Ok(Vec::new());
        }

        let column = self.columns.remove(from_index);
        let result = insert_ranked(&mut self.columns, index, column);
        self.settle(&Collection::Columns, result)
    }

    // =========================================================================
    // Entity changes
    // =========================================================================

    /// Append a new column after the last one
    pub fn push_column(&mut self, mut column: Column) -> Result<Vec<EntityRef>> {
        if self.has_column(&column.id) {
            return Err(KanbanError::invalid_value(
                "column",
                format!("duplicate column id {}", column.id),
            ));
        }
        self.ensure_healthy(&Collection::Columns)?;
        column.board_id = self.board.id.clone();
        self.tasks.insert(column.id.clone(), Vec::new());
        let end = self.columns.len();
        let result = insert_ranked(&mut self.columns, end, column);
        self.settle(&Collection::Columns, result)
    }

    /// Append a new task after the last task of its column
    pub fn push_task(&mut self, task: Task) -> Result<Vec<EntityRef>> {
        if self.locate_task(&task.id).is_some() {
            return Err(KanbanError::invalid_value(
                "task",
                format!("duplicate task id {}", task.id),
            ));
        }
        let column = task.column_id.clone();
        self.ensure_healthy(&Collection::Tasks(column.clone()))?;
        let end = self.tasks_of(&column).len();
        self.insert_task_at(&column, end, task)
    }

    /// Insert or replace a column at the slot its rank dictates.
    ///
    /// A rank already taken by a sibling puts the column right after that
    /// sibling with a fresh rank; the re-ranked entities are returned.
    /// Tasks of a replaced column are kept.
    pub fn insert_column(&mut self, mut column: Column) -> Result<Vec<EntityRef>> {
        self.ensure_healthy(&Collection::Columns)?;
        column.board_id = self.board.id.clone();
        if let Some(index) = self.column_index(&column.id) {
            self.columns.remove(index);
        }
        self.tasks.entry(column.id.clone()).or_default();
        let result = place_by_rank(&mut self.columns, column);
        self.settle(&Collection::Columns, result)
    }

    /// Insert or replace a task at the slot its rank dictates in its column.
    pub fn insert_task(&mut self, task: Task) -> Result<Vec<EntityRef>> {
        let column = task.column_id.clone();
        if !self.has_column(&column) {
            return Err(KanbanError::ColumnNotFound {
                id: column.to_string(),
            });
        }
        let target = Collection::Tasks(column.clone());
        self.ensure_healthy(&target)?;
        self.remove_task(&task.id);

        let result = match self.tasks.get_mut(&column) {
            Some(siblings) => place_by_rank(siblings, task),
            None => Some(Vec::new()),
        };
        self.settle(&target, result)
    }

    /// Remove a column together with its tasks
    pub fn remove_column(&mut self, id: &ColumnId) -> Option<(Column, Vec<Task>)> {
        let index = self.column_index(id)?;
        let column = self.columns.remove(index);
        let tasks = self.tasks.remove(id).unwrap_or_default();
        self.poisoned.remove(&Collection::Tasks(id.clone()));
        Some((column, tasks))
    }

    pub fn remove_task(&mut self, id: &TaskId) -> Option<Task> {
        let (column, index) = self.locate_task(id)?;
        self.tasks.get_mut(&column).map(|siblings| siblings.remove(index))
    }

    /// Apply changed column fields, re-slotting the column if its rank moved
    pub fn apply_column_update(&mut self, id: &ColumnId, update: &ColumnUpdate) -> Result<Vec<EntityRef>> {
        let index = self
            .column_index(id)
            .ok_or_else(|| KanbanError::ColumnNotFound { id: id.to_string() })?;
        if let Some(title) = &update.title {
            self.columns[index].title = title.clone();
        }

        match update.position {
            Some(position) if position != self.columns[index].position => {
                self.ensure_healthy(&Collection::Columns)?;
                let mut column = self.columns.remove(index);
                column.position = position;
                let result = place_by_rank(&mut self.columns, column);
                self.settle(&Collection::Columns, result)
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Apply changed task fields, re-slotting the task if its rank or column
    /// moved. A move into a column that is not on this board is an error and
    /// leaves the task untouched.
    pub fn apply_task_update(&mut self, id: &TaskId, update: &TaskUpdate) -> Result<Vec<EntityRef>> {
        let (column, index) = self
            .locate_task(id)
            .ok_or_else(|| KanbanError::TaskNotFound { id: id.to_string() })?;
        let target_column = update.column_id.clone().unwrap_or_else(|| column.clone());
        if !self.has_column(&target_column) {
            return Err(KanbanError::ColumnNotFound {
                id: target_column.to_string(),
            });
        }

        let Some(current_position) = self
            .tasks
            .get(&column)
            .and_then(|s| s.get(index))
            .map(|t| t.position)
        else {
            return Err(KanbanError::TaskNotFound { id: id.to_string() });
        };
        let position = update.position.unwrap_or(current_position);
        let moves = target_column != column || position != current_position;

        let source = Collection::Tasks(column.clone());
        let target = Collection::Tasks(target_column.clone());
        if moves {
            self.ensure_healthy(&source)?;
            self.ensure_healthy(&target)?;
        }

        if let Some(task) = self.tasks.get_mut(&column).and_then(|s| s.get_mut(index)) {
            update.apply_fields(task);
        }
        if !moves {
            return Ok(Vec::new());
        }

        let Some(mut task) = self.remove_task(id) else {
            return Err(KanbanError::TaskNotFound { id: id.to_string() });
        };
        task.column_id = target_column.clone();
        task.position = position;

        let result = match self.tasks.get_mut(&target_column) {
            Some(siblings) => place_by_rank(siblings, task),
            None => Some(Vec::new()),
        };
        self.settle(&target, result)
    }

    /// Apply changed board fields. Returns whether anything changed.
    pub fn update_board(&mut self, update: &BoardUpdate) -> bool {
        update.apply_to(&mut self.board)
    }

    /// Replace the board row
    pub fn set_board(&mut self, board: Board) {
        self.board = board;
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Current state of an entity, `None` when absent
    pub fn snapshot(&self, entity: &EntityRef) -> Option<EntityState> {
        match entity {
            EntityRef::Board(id) => {
                (&self.board.id == id).then(|| EntityState::Board(self.board.clone()))
            }
            EntityRef::Column(id) => self.column(id).cloned().map(EntityState::Column),
            EntityRef::Task(id) => self.task(id).cloned().map(EntityState::Task),
        }
    }

    /// Put an entity back into a snapshotted state (`None` removes it).
    pub fn restore(&mut self, entity: &EntityRef, state: Option<&EntityState>) -> Result<Vec<EntityRef>> {
        self.restore_all(&[(entity.clone(), state.cloned())])
    }

    /// Put several entities back into snapshotted states at once.
    ///
    /// Every listed entity is lifted out of its sibling set before any is
    /// placed again, so restored ranks only meet siblings the list does not
    /// cover. Columns go before tasks; a task whose column no longer exists
    /// is dropped. Returns entities re-ranked to resolve collisions.
    pub fn restore_all(&mut self, states: &[(EntityRef, Option<EntityState>)]) -> Result<Vec<EntityRef>> {
        let mut columns: Vec<(&ColumnId, Option<&Column>)> = Vec::new();
        let mut tasks: Vec<(&TaskId, Option<&Task>)> = Vec::new();
        for (entity, state) in states {
            match (entity, state) {
                (EntityRef::Board(_), Some(EntityState::Board(board))) => self.board = board.clone(),
                (EntityRef::Board(_), None) => {}
                (EntityRef::Column(id), Some(EntityState::Column(column))) => {
                    columns.push((id, Some(column)))
                }
                (EntityRef::Column(id), None) => columns.push((id, None)),
                (EntityRef::Task(id), Some(EntityState::Task(task))) => tasks.push((id, Some(task))),
                (EntityRef::Task(id), None) => tasks.push((id, None)),
                (entity, Some(state)) => {
                    warn!(%entity, other = %state.entity(), "snapshot does not match its entity, skipping");
                }
            }
        }

        let mut repaired = Vec::new();
        if !columns.is_empty() {
            self.ensure_healthy(&Collection::Columns)?;
            self.columns
                .retain(|c| !columns.iter().any(|(id, _)| *id == &c.id));
            for (id, state) in &columns {
                match state {
                    Some(column) => {
                        let mut column = (*column).clone();
                        column.board_id = self.board.id.clone();
                        self.tasks.entry(column.id.clone()).or_default();
                        let result = place_by_rank(&mut self.columns, column);
                        repaired.extend(self.settle(&Collection::Columns, result)?);
                    }
                    None => {
                        self.tasks.remove(*id);
                        self.poisoned.remove(&Collection::Tasks((*id).clone()));
                    }
                }
            }
            self.verify(&Collection::Columns)?;
        }

        let mut affected = BTreeSet::new();
        for (id, _) in &tasks {
            if let Some(task) = self.remove_task(id) {
                affected.insert(task.column_id);
            }
        }
        for task in tasks.iter().filter_map(|(_, state)| *state) {
            let Some(siblings) = self.tasks.get_mut(&task.column_id) else {
                warn!(task = %task.id, column = %task.column_id, "cannot restore task into missing column");
                continue;
            };
            let collection = Collection::Tasks(task.column_id.clone());
            if self.poisoned.contains(&collection) {
                return Err(KanbanError::CollectionPoisoned {
                    collection: collection.to_string(),
                });
            }
            let result = place_by_rank(siblings, task.clone());
            match result {
                Some(touched) => repaired.extend(touched),
                None => {
                    self.poisoned.insert(collection.clone());
                    return Err(KanbanError::RankSpaceExhausted {
                        collection: collection.to_string(),
                    });
                }
            }
            affected.insert(task.column_id.clone());
        }
        for column in affected {
            if self.has_column(&column) {
                self.verify(&Collection::Tasks(column))?;
            }
        }
        Ok(repaired)
    }

    // =========================================================================
    // Invariants
    // =========================================================================

    fn ensure_healthy(&self, collection: &Collection) -> Result<()> {
        if self.poisoned.contains(collection) {
            return Err(KanbanError::CollectionPoisoned {
                collection: collection.to_string(),
            });
        }
        Ok(())
    }

    fn verify(&mut self, collection: &Collection) -> Result<()> {
        let violation = match collection {
            Collection::Columns => check_order(&self.columns).or_else(|| {
                self.columns
                    .iter()
                    .find(|c| c.board_id != self.board.id)
                    .map(|c| format!("column {} belongs to board {}", c.id, c.board_id))
            }),
            Collection::Tasks(column) => self.tasks.get(column).and_then(|siblings| {
                check_order(siblings).or_else(|| {
                    siblings
                        .iter()
                        .find(|t| &t.column_id != column)
                        .map(|t| format!("task {} claims column {}", t.id, t.column_id))
                })
            }),
        };

        match violation {
            Some(detail) => {
                warn!(%collection, %detail, "ordering invariant violated, halting reorders");
                self.poisoned.insert(collection.clone());
                Err(KanbanError::invariant(collection, detail))
            }
            None => Ok(()),
        }
    }

    fn settle(&mut self, collection: &Collection, result: Option<Vec<EntityRef>>) -> Result<Vec<EntityRef>> {
        match result {
            Some(touched) => {
                self.verify(collection)?;
                Ok(touched)
            }
            None => {
                self.poisoned.insert(collection.clone());
                Err(KanbanError::RankSpaceExhausted {
                    collection: collection.to_string(),
                })
            }
        }
    }

    fn insert_task_at(&mut self, column: &ColumnId, index: usize, task: Task) -> Result<Vec<EntityRef>> {
        let collection = Collection::Tasks(column.clone());
        let result = match self.tasks.get_mut(column) {
            Some(siblings) => insert_ranked(siblings, index, task),
            None => {
                return Err(KanbanError::ColumnNotFound {
                    id: column.to_string(),
                })
            }
        };
        self.settle(&collection, result)
    }

    #[cfg(test)]
    pub(crate) fn corrupt_task_rank(&mut self, id: &TaskId, rank: Rank) {
        if let Some((column, index)) = self.locate_task(id) {
            if let Some(task) = self.tasks.get_mut(&column).and_then(|s| s.get_mut(index)) {
                task.position = rank;
            }
        }
    }
}

/// Rank for the slot at `index`, between its would-be neighbours
fn slot_rank<T: Ranked>(siblings: &[T], index: usize) -> Option<Rank> {
    let before = index
        .checked_sub(1)
        .and_then(|i| siblings.get(i))
        .map(Ranked::rank);
    let after = siblings.get(index).map(Ranked::rank);
    Rank::between(before, after)
}

/// Insert `item` at `index` with the midpoint rank of its neighbours,
/// renormalizing the siblings first when there is no room.
///
/// Returns every entity whose rank was assigned, or `None` when not even a
/// renormalized sequence has room (the item is dropped).
fn insert_ranked<T: Ranked>(siblings: &mut Vec<T>, index: usize, mut item: T) -> Option<Vec<EntityRef>> {
    let index = index.min(siblings.len());
    let mut touched = Vec::new();
    let rank = match slot_rank(siblings, index) {
        Some(rank) => rank,
        None => {
            debug!(len = siblings.len(), index, "no rank headroom, renormalizing");
            touched = renormalize(siblings);
            slot_rank(siblings, index)?
        }
    };
    item.set_rank(rank);
    touched.push(item.entity());
    siblings.insert(index, item);
    Some(touched)
}

/// Insert `item` where its own rank puts it. A collision with an equal rank
/// slots it right after the existing sibling and assigns a fresh rank.
fn place_by_rank<T: Ranked>(siblings: &mut Vec<T>, item: T) -> Option<Vec<EntityRef>> {
    let rank = item.rank();
    let index = siblings.partition_point(|s| s.rank() <= rank);
    if index > 0 && siblings[index - 1].rank() == rank {
        debug!(entity = %item.entity(), %rank, "rank collision, reslotting");
        return insert_ranked(siblings, index, item);
    }
    siblings.insert(index, item);
    Some(Vec::new())
}

/// Reassign evenly spaced ranks; returns the entities whose rank changed
fn renormalize<T: Ranked>(siblings: &mut [T]) -> Vec<EntityRef> {
    let count = siblings.len();
    let mut touched = Vec::new();
    for (item, rank) in siblings.iter_mut().zip(Rank::spaced(count)) {
        if item.rank() != rank {
            item.set_rank(rank);
            touched.push(item.entity());
        }
    }
    touched
}

fn repair_duplicates<T: Ranked>(siblings: &mut [T]) -> Vec<EntityRef> {
    if check_order(siblings).is_none() {
        return Vec::new();
    }
    renormalize(siblings)
}

/// Describe the first pair of siblings that is not strictly increasing
fn check_order<T: Ranked>(siblings: &[T]) -> Option<String> {
    siblings.windows(2).find_map(|pair| {
        (pair[0].rank() >= pair[1].rank()).then(|| {
            format!(
                "{} at rank {} is not before {} at rank {}",
                pair[0].entity(),
                pair[0].rank(),
                pair[1].entity(),
                pair[1].rank()
            )
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoardId;

    fn board() -> Board {
        let mut board = Board::new("Test", "user");
        board.id = BoardId::from_string("board");
        board
    }

    fn column(id: &str, rank: i64) -> Column {
        Column {
            id: ColumnId::from_string(id),
            board_id: BoardId::from_string("board"),
            title: id.to_uppercase(),
            position: Rank::new(rank),
        }
    }

    fn task(id: &str, column: &str, rank: i64) -> Task {
        let mut task = Task::new(ColumnId::from_string(column), id).with_position(Rank::new(rank));
        task.id = TaskId::from_string(id);
        task
    }

    fn ids(model: &BoardModel, column: &str) -> Vec<String> {
        model
            .tasks_of(&ColumnId::from_string(column))
            .iter()
            .map(|t| t.id.to_string())
            .collect()
    }

    fn assert_ordered(model: &BoardModel) {
        assert!(check_order(model.columns()).is_none());
        for column in model.columns() {
            let tasks = model.tasks_of(&column.id);
            assert!(check_order(tasks).is_none(), "{:?}", tasks);
            assert!(tasks.iter().all(|t| t.column_id == column.id));
        }
    }

    fn sample() -> BoardModel {
        let (model, repaired) = BoardModel::load(
            board(),
            vec![column("b", 2048), column("a", 1024)],
            vec![task("t3", "a", 3), task("t1", "a", 1), task("t2", "a", 2)],
        )
        .unwrap();
        assert!(repaired.is_empty());
        model
    }

    #[test]
    fn test_load_sorts_by_rank() {
        let model = sample();
        let titles: Vec<&str> = model.columns().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(titles, vec!["a", "b"]);
        assert_eq!(ids(&model, "a"), vec!["t1", "t2", "t3"]);
        assert!(model.tasks_of(&ColumnId::from_string("b")).is_empty());
        assert_eq!(model.task_count(), 3);
    }

    #[test]
    fn test_load_repairs_duplicate_ranks() {
        let (model, repaired) = BoardModel::load(
            board(),
            vec![column("a", 1)],
            vec![task("x", "a", 5), task("y", "a", 5)],
        )
        .unwrap();
        assert_eq!(ids(&model, "a"), vec!["x", "y"]);
        assert_eq!(repaired.len(), 2);
        assert_ordered(&model);
    }

    #[test]
    fn test_load_rejects_orphaned_task() {
        let result = BoardModel::load(board(), vec![column("a", 1)], vec![task("x", "zz", 1)]);
        assert!(matches!(result, Err(KanbanError::OrphanedTask { .. })));
    }

    #[test]
    fn test_move_last_task_to_front_changes_only_that_task() {
        let mut model = sample();
        let touched = model
            .move_task(&TaskId::from_string("t3"), &ColumnId::from_string("a"), 0)
            .unwrap();

        assert_eq!(ids(&model, "a"), vec!["t3", "t1", "t2"]);
        assert_eq!(touched, vec![EntityRef::Task(TaskId::from_string("t3"))]);
        let moved = model.task(&TaskId::from_string("t3")).unwrap();
        assert!(moved.position < Rank::new(1));
        assert_eq!(model.task(&TaskId::from_string("t1")).unwrap().position, Rank::new(1));
    }

    #[test]
    fn test_move_to_same_slot_is_noop() {
        let mut model = sample();
        let before = model.clone();
        let touched = model
            .move_task(&TaskId::from_string("t2"), &ColumnId::from_string("a"), 1)
            .unwrap();
        assert!(touched.is_empty());
        assert_eq!(model, before);
    }

    #[test]
    fn test_move_across_columns_clamps_index() {
        let mut model = sample();
        model
            .move_task(&TaskId::from_string("t1"), &ColumnId::from_string("b"), 99)
            .unwrap();
        assert_eq!(ids(&model, "a"), vec!["t2", "t3"]);
        assert_eq!(ids(&model, "b"), vec!["t1"]);
        let moved = model.task(&TaskId::from_string("t1")).unwrap();
        assert_eq!(moved.column_id, ColumnId::from_string("b"));
        assert_eq!(moved.position, Rank::initial());
    }

    #[test]
    fn test_adjacent_ranks_trigger_renormalization() {
        let mut model = sample();
        let touched = model
            .move_task(&TaskId::from_string("t3"), &ColumnId::from_string("a"), 1)
            .unwrap();
        assert_eq!(ids(&model, "a"), vec!["t1", "t3", "t2"]);
        assert!(touched.len() > 1);
        assert_ordered(&model);
    }

    #[test]
    fn test_repeated_insertion_between_same_neighbours() {
        let mut model = BoardModel::load(
            board(),
            vec![column("a", 1024), column("b", 2048)],
            vec![task("left", "b", 1024), task("right", "b", 2048)],
        )
        .unwrap()
        .0;
        let mut renormalized = false;
        for i in 0..60 {
            let id = format!("n{}", i);
            model.push_task(task(&id, "a", 0)).unwrap();
            let touched = model
                .move_task(&TaskId::from_string(id.as_str()), &ColumnId::from_string("b"), 1)
                .unwrap();
            renormalized |= touched.len() > 1;
            assert_ordered(&model);
            let order = ids(&model, "b");
            assert_eq!(order.first().map(String::as_str), Some("left"));
            assert_eq!(order.last().map(String::as_str), Some("right"));
            assert_eq!(order[1], id);
        }
        assert!(renormalized);
        assert_eq!(model.tasks_of(&ColumnId::from_string("b")).len(), 62);
    }

    #[test]
    fn test_move_column() {
        let mut model = sample();
        model.push_column(column("c", 0)).unwrap();
        model.move_column(&ColumnId::from_string("c"), 0).unwrap();
        let order: Vec<&str> = model.columns().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
        assert!(model
            .move_column(&ColumnId::from_string("c"), 0)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_insert_task_resolves_rank_collision() {
        let mut model = sample();
        let repaired = model.insert_task(task("dup", "a", 2)).unwrap();
        assert_eq!(ids(&model, "a"), vec!["t1", "t2", "dup", "t3"]);
        assert!(repaired.contains(&EntityRef::Task(TaskId::from_string("dup"))));
        assert_ordered(&model);
    }

    #[test]
    fn test_apply_task_update_moves_between_columns() {
        let mut model = sample();
        let update = TaskUpdate::default()
            .with_column(ColumnId::from_string("b"))
            .with_position(Rank::new(10))
            .with_title("Renamed");
        let repaired = model.apply_task_update(&TaskId::from_string("t2"), &update).unwrap();
        assert!(repaired.is_empty());
        assert_eq!(ids(&model, "b"), vec!["t2"]);
        assert_eq!(model.task(&TaskId::from_string("t2")).unwrap().title, "Renamed");

        let off_board = TaskUpdate::default().with_column(ColumnId::from_string("elsewhere"));
        assert!(model
            .apply_task_update(&TaskId::from_string("t2"), &off_board)
            .is_err());
    }

    #[test]
    fn test_remove_column_cascades() {
        let mut model = sample();
        let (column, tasks) = model.remove_column(&ColumnId::from_string("a")).unwrap();
        assert_eq!(column.id.as_str(), "a");
        assert_eq!(tasks.len(), 3);
        assert_eq!(model.task_count(), 0);
        assert!(model.task(&TaskId::from_string("t1")).is_none());
    }

    #[test]
    fn test_snapshot_and_restore() {
        let mut model = sample();
        let before = model.clone();
        let entity = EntityRef::Task(TaskId::from_string("t1"));
        let snapshot = model.snapshot(&entity);

        model
            .move_task(&TaskId::from_string("t1"), &ColumnId::from_string("b"), 0)
            .unwrap();
        model.restore(&entity, snapshot.as_ref()).unwrap();
        assert_eq!(model, before);

        model.restore(&entity, None).unwrap();
        assert!(!model.contains(&entity));
    }

    #[test]
    fn test_invariant_violation_poisons_collection() {
        let mut model = sample();
        model.corrupt_task_rank(&TaskId::from_string("t3"), Rank::new(1));

        let result = model.move_task(&TaskId::from_string("t2"), &ColumnId::from_string("a"), 0);
        assert!(matches!(result, Err(KanbanError::InvariantViolated { .. })));
        assert!(model.is_poisoned(&Collection::Tasks(ColumnId::from_string("a"))));

        let again = model.move_task(&TaskId::from_string("t1"), &ColumnId::from_string("a"), 2);
        assert!(matches!(again, Err(KanbanError::CollectionPoisoned { .. })));

        // other collections keep working
        model.move_column(&ColumnId::from_string("b"), 0).unwrap();
    }

    #[test]
    fn test_update_into_poisoned_column_leaves_task_untouched() {
        let mut model = sample();
        model.poison(Collection::Tasks(ColumnId::from_string("b")));
        let t1 = TaskId::from_string("t1");
        let before = model.task(&t1).cloned().unwrap();

        let update = TaskUpdate::default()
            .with_title("Renamed")
            .with_column(ColumnId::from_string("b"));
        let result = model.apply_task_update(&t1, &update);
        assert!(matches!(result, Err(KanbanError::CollectionPoisoned { .. })));
        assert_eq!(model.task(&t1), Some(&before));

        // fields alone do not reorder anything
        model.poison(Collection::Tasks(ColumnId::from_string("a")));
        model
            .apply_task_update(&t1, &TaskUpdate::default().with_title("Renamed"))
            .unwrap();
        assert_eq!(model.task(&t1).unwrap().title, "Renamed");
        assert_eq!(ids(&model, "a"), vec!["t1", "t2", "t3"]);
    }
}
