//! In-process repository with realtime echo, latency and failure injection.

use super::{BoardSnapshot, ChangeEvent, RepoResult, Repository, RepositoryError, RowChange};
use crate::types::{
    Board, BoardId, BoardUpdate, Column, ColumnId, ColumnUpdate, EntityRef, Task, TaskId,
    TaskUpdate,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, trace};

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// One call received by an [`InMemoryRepository`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoCall {
    ListBoards { owner: String },
    LoadBoard(BoardId),
    Create(EntityRef),
    Update(EntityRef),
    Delete(EntityRef),
}

impl RepoCall {
    pub fn entity(&self) -> Option<&EntityRef> {
        match self {
            Self::ListBoards { .. } | Self::LoadBoard(_) => None,
            Self::Create(e) | Self::Update(e) | Self::Delete(e) => Some(e),
        }
    }

    pub fn is_write(&self) -> bool {
        self.entity().is_some()
    }
}

#[derive(Debug, Default)]
struct Store {
    boards: BTreeMap<BoardId, Board>,
    columns: BTreeMap<ColumnId, Column>,
    tasks: BTreeMap<TaskId, Task>,

    fail_next: VecDeque<RepositoryError>,
    fail_entity: HashMap<EntityRef, RepositoryError>,
    latency: Duration,
    latency_entity: HashMap<EntityRef, Duration>,
    calls: Vec<RepoCall>,
}

impl Store {
    fn seed(&mut self, snapshot: BoardSnapshot) {
        for column in snapshot.columns {
            self.columns.insert(column.id.clone(), column);
        }
        for task in snapshot.tasks {
            self.tasks.insert(task.id.clone(), task);
        }
        self.boards.insert(snapshot.board.id.clone(), snapshot.board);
    }

    fn snapshot(&self, id: &BoardId) -> Option<BoardSnapshot> {
        let board = self.boards.get(id)?.clone();
        let mut columns: Vec<Column> = self
            .columns
            .values()
            .filter(|c| &c.board_id == id)
            .cloned()
            .collect();
        columns.sort_by_key(|c| c.position);
        let mut tasks: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| columns.iter().any(|c| c.id == t.column_id))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| (&a.column_id, a.position).cmp(&(&b.column_id, b.position)));
        Some(BoardSnapshot {
            board,
            columns,
            tasks,
        })
    }

    /// Record a call and pick up any failure and delay injected for it
    fn admit(&mut self, call: RepoCall) -> (Option<RepositoryError>, Duration) {
        let entity = call.entity().cloned();
        self.calls.push(call);

        let delay = entity
            .as_ref()
            .and_then(|e| self.latency_entity.get(e).copied())
            .unwrap_or(self.latency);
        let fault = match self.fail_next.pop_front() {
            Some(error) => Some(error),
            None => entity.as_ref().and_then(|e| self.fail_entity.get(e).cloned()),
        };
        (fault, delay)
    }

    /// Apply a row change, returning every event it produces (cascades
    /// included, children before parents).
    fn apply(&mut self, event: &ChangeEvent) -> RepoResult<Vec<ChangeEvent>> {
        match event {
            ChangeEvent::Board { id, change } => match change {
                RowChange::Inserted(board) => {
                    if self.boards.contains_key(id) {
                        return Err(RepositoryError::rejected(format!("board {} exists", id)));
                    }
                    self.boards.insert(id.clone(), board.clone());
                    Ok(vec![event.clone()])
                }
                RowChange::Updated(update) => {
                    let board = self
                        .boards
                        .get_mut(id)
                        .ok_or_else(|| RepositoryError::not_found(EntityRef::Board(id.clone())))?;
                    update.apply_to(board);
                    board.updated_at = Utc::now();
                    Ok(vec![event.clone()])
                }
                RowChange::Deleted => {
                    if self.boards.remove(id).is_none() {
                        return Err(RepositoryError::not_found(EntityRef::Board(id.clone())));
                    }
                    let columns: Vec<ColumnId> = self
                        .columns
                        .values()
                        .filter(|c| &c.board_id == id)
                        .map(|c| c.id.clone())
                        .collect();
                    let mut events = Vec::new();
                    for column in columns {
                        events.extend(self.remove_column(&column));
                    }
                    events.push(event.clone());
                    Ok(events)
                }
            },
            ChangeEvent::Column { id, change } => match change {
                RowChange::Inserted(column) => {
                    if !self.boards.contains_key(&column.board_id) {
                        return Err(RepositoryError::not_found(EntityRef::Board(
                            column.board_id.clone(),
                        )));
                    }
                    if self.columns.contains_key(id) {
                        return Err(RepositoryError::rejected(format!("column {} exists", id)));
                    }
                    self.columns.insert(id.clone(), column.clone());
                    Ok(vec![event.clone()])
                }
                RowChange::Updated(update) => {
                    let column = self
                        .columns
                        .get_mut(id)
                        .ok_or_else(|| RepositoryError::not_found(id.clone()))?;
                    if let Some(title) = &update.title {
                        column.title = title.clone();
                    }
                    if let Some(position) = update.position {
                        column.position = position;
                    }
                    Ok(vec![event.clone()])
                }
                RowChange::Deleted => {
                    if !self.columns.contains_key(id) {
                        return Err(RepositoryError::not_found(id.clone()));
                    }
                    Ok(self.remove_column(id))
                }
            },
            ChangeEvent::Task { id, change } => match change {
                RowChange::Inserted(task) => {
                    if !self.columns.contains_key(&task.column_id) {
                        return Err(RepositoryError::not_found(task.column_id.clone()));
                    }
                    if self.tasks.contains_key(id) {
                        return Err(RepositoryError::rejected(format!("task {} exists", id)));
                    }
                    self.tasks.insert(id.clone(), task.clone());
                    Ok(vec![event.clone()])
                }
                RowChange::Updated(update) => {
                    if let Some(column) = &update.column_id {
                        if !self.columns.contains_key(column) {
                            return Err(RepositoryError::rejected(format!(
                                "column {} does not exist",
                                column
                            )));
                        }
                    }
                    let task = self
                        .tasks
                        .get_mut(id)
                        .ok_or_else(|| RepositoryError::not_found(id.clone()))?;
                    update.apply_fields(task);
                    if let Some(position) = update.position {
                        task.position = position;
                    }
                    if let Some(column) = &update.column_id {
                        task.column_id = column.clone();
                    }
                    Ok(vec![event.clone()])
                }
                RowChange::Deleted => {
                    if self.tasks.remove(id).is_none() {
                        return Err(RepositoryError::not_found(id.clone()));
                    }
                    Ok(vec![event.clone()])
                }
            },
        }
    }

    fn remove_column(&mut self, id: &ColumnId) -> Vec<ChangeEvent> {
        let tasks: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| &t.column_id == id)
            .map(|t| t.id.clone())
            .collect();
        let mut events = Vec::with_capacity(tasks.len() + 1);
        for task in tasks {
            self.tasks.remove(&task);
            events.push(ChangeEvent::deleted(EntityRef::Task(task)));
        }
        self.columns.remove(id);
        events.push(ChangeEvent::deleted(EntityRef::Column(id.clone())));
        events
    }
}

/// A complete [`Repository`] kept in memory.
///
/// Besides storing rows it can simulate what a remote store does to a
/// client: slow acknowledgements, failed writes, and edits from other
/// sessions arriving on the change stream.
#[derive(Debug)]
pub struct InMemoryRepository {
    store: Mutex<Store>,
    events: broadcast::Sender<ChangeEvent>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create a repository whose change stream buffers `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            store: Mutex::new(Store::default()),
            events,
        }
    }

    /// Create a repository pre-populated with boards
    pub fn with_snapshots(snapshots: impl IntoIterator<Item = BoardSnapshot>) -> Self {
        let mut store = Store::default();
        for snapshot in snapshots {
            store.seed(snapshot);
        }
        let (events, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        Self {
            store: Mutex::new(store),
            events,
        }
    }

    /// Add a board with its columns and tasks without emitting events
    pub async fn seed(&self, snapshot: BoardSnapshot) {
        self.store.lock().await.seed(snapshot);
    }

    /// Current stored state of a board
    pub async fn snapshot(&self, id: &BoardId) -> Option<BoardSnapshot> {
        self.store.lock().await.snapshot(id)
    }

    pub async fn task(&self, id: &TaskId) -> Option<Task> {
        self.store.lock().await.tasks.get(id).cloned()
    }

    pub async fn column(&self, id: &ColumnId) -> Option<Column> {
        self.store.lock().await.columns.get(id).cloned()
    }

    /// Fail the next call, whatever it is
    pub async fn fail_next(&self, error: RepositoryError) {
        self.store.lock().await.fail_next.push_back(error);
    }

    /// Fail every write to `entity` until cleared
    pub async fn fail_entity(&self, entity: EntityRef, error: RepositoryError) {
        self.store.lock().await.fail_entity.insert(entity, error);
    }

    pub async fn clear_faults(&self) {
        let mut store = self.store.lock().await;
        store.fail_next.clear();
        store.fail_entity.clear();
    }

    /// Delay every call by `latency`
    pub async fn set_latency(&self, latency: Duration) {
        self.store.lock().await.latency = latency;
    }

    /// Delay writes to `entity` by `latency`, overriding the global delay
    pub async fn set_entity_latency(&self, entity: EntityRef, latency: Duration) {
        self.store.lock().await.latency_entity.insert(entity, latency);
    }

    /// Every call received so far, in arrival order
    pub async fn calls(&self) -> Vec<RepoCall> {
        self.store.lock().await.calls.clone()
    }

    /// Only the write calls, in arrival order
    pub async fn writes(&self) -> Vec<RepoCall> {
        self.store
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.is_write())
            .cloned()
            .collect()
    }

    /// Apply an edit as if another session had made it, and broadcast it
    pub async fn apply_external(&self, event: ChangeEvent) -> RepoResult<()> {
        let events = self.store.lock().await.apply(&event)?;
        debug!(entity = %event.entity(), "applied external change");
        self.publish(events);
        Ok(())
    }

    /// Push an event on the change stream without touching the store
    pub fn broadcast(&self, event: ChangeEvent) {
        self.publish(vec![event]);
    }

    fn publish(&self, events: Vec<ChangeEvent>) {
        for event in events {
            if self.events.send(event).is_err() {
                trace!("change event dropped, no subscribers");
            }
        }
    }

    async fn admit(&self, call: RepoCall) -> RepoResult<()> {
        let (fault, delay) = self.store.lock().await.admit(call);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match fault {
            Some(error) => {
                debug!(%error, "injected repository failure");
                Err(error)
            }
            None => Ok(()),
        }
    }

    async fn write(&self, call: RepoCall, event: ChangeEvent) -> RepoResult<()> {
        self.admit(call).await?;
        let events = self.store.lock().await.apply(&event)?;
        self.publish(events);
        Ok(())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn list_boards(&self, owner: &str) -> RepoResult<Vec<Board>> {
        self.admit(RepoCall::ListBoards {
            owner: owner.to_string(),
        })
        .await?;
        let store = self.store.lock().await;
        let mut boards: Vec<Board> = store
            .boards
            .values()
            .filter(|b| b.owner == owner)
            .cloned()
            .collect();
        boards.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(boards)
    }

    async fn load_board(&self, id: &BoardId) -> RepoResult<BoardSnapshot> {
        self.admit(RepoCall::LoadBoard(id.clone())).await?;
        self.store
            .lock()
            .await
            .snapshot(id)
            .ok_or_else(|| RepositoryError::not_found(EntityRef::Board(id.clone())))
    }

    async fn create_board(&self, board: &Board) -> RepoResult<()> {
        let entity = EntityRef::Board(board.id.clone());
        self.write(RepoCall::Create(entity), ChangeEvent::board_inserted(board.clone()))
            .await
    }

    async fn update_board(&self, id: &BoardId, update: &BoardUpdate) -> RepoResult<()> {
        let event = ChangeEvent::Board {
            id: id.clone(),
            change: RowChange::Updated(update.clone()),
        };
        self.write(RepoCall::Update(EntityRef::Board(id.clone())), event)
            .await
    }

    async fn delete_board(&self, id: &BoardId) -> RepoResult<()> {
        let entity = EntityRef::Board(id.clone());
        self.write(RepoCall::Delete(entity.clone()), ChangeEvent::deleted(entity))
            .await
    }

    async fn create_column(&self, column: &Column) -> RepoResult<()> {
        let entity = EntityRef::Column(column.id.clone());
        self.write(RepoCall::Create(entity), ChangeEvent::column_inserted(column.clone()))
            .await
    }

    async fn update_column(&self, id: &ColumnId, update: &ColumnUpdate) -> RepoResult<()> {
        self.write(
            RepoCall::Update(EntityRef::Column(id.clone())),
            ChangeEvent::column_updated(id.clone(), update.clone()),
        )
        .await
    }

    async fn delete_column(&self, id: &ColumnId) -> RepoResult<()> {
        let entity = EntityRef::Column(id.clone());
        self.write(RepoCall::Delete(entity.clone()), ChangeEvent::deleted(entity))
            .await
    }

    async fn create_task(&self, task: &Task) -> RepoResult<()> {
        let entity = EntityRef::Task(task.id.clone());
        self.write(RepoCall::Create(entity), ChangeEvent::task_inserted(task.clone()))
            .await
    }

    async fn update_task(&self, id: &TaskId, update: &TaskUpdate) -> RepoResult<()> {
        self.write(
            RepoCall::Update(EntityRef::Task(id.clone())),
            ChangeEvent::task_updated(id.clone(), update.clone()),
        )
        .await
    }

    async fn delete_task(&self, id: &TaskId) -> RepoResult<()> {
        let entity = EntityRef::Task(id.clone());
        self.write(RepoCall::Delete(entity.clone()), ChangeEvent::deleted(entity))
            .await
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rank;

    fn fixture() -> (InMemoryRepository, BoardSnapshot) {
        let board = Board::new("Sprint", "alice");
        let todo = Column::new(board.id.clone(), "To Do").with_position(Rank::new(1024));
        let done = Column::new(board.id.clone(), "Done").with_position(Rank::new(2048));
        let task = Task::new(todo.id.clone(), "Write docs");
        let snapshot = BoardSnapshot {
            board,
            columns: vec![todo, done],
            tasks: vec![task],
        };
        (InMemoryRepository::with_snapshots([snapshot.clone()]), snapshot)
    }

    #[tokio::test]
    async fn test_load_board_returns_seeded_rows() {
        let (repo, snapshot) = fixture();
        let loaded = repo.load_board(&snapshot.board.id).await.unwrap();
        assert_eq!(loaded.columns.len(), 2);
        assert_eq!(loaded.tasks, snapshot.tasks);

        let missing = repo.load_board(&BoardId::from_string("nope")).await;
        assert!(matches!(missing, Err(RepositoryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_writes_are_echoed() {
        let (repo, snapshot) = fixture();
        let mut events = repo.subscribe();
        let task = &snapshot.tasks[0];
        let update = TaskUpdate::default().with_position(Rank::new(5));

        repo.update_task(&task.id, &update).await.unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event, ChangeEvent::task_updated(task.id.clone(), update));
        assert_eq!(repo.task(&task.id).await.unwrap().position, Rank::new(5));
    }

    #[tokio::test]
    async fn test_delete_column_cascades() {
        let (repo, snapshot) = fixture();
        let mut events = repo.subscribe();
        let todo = &snapshot.columns[0];

        repo.delete_column(&todo.id).await.unwrap();

        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        assert_eq!(first.entity(), EntityRef::Task(snapshot.tasks[0].id.clone()));
        assert_eq!(second.entity(), EntityRef::Column(todo.id.clone()));
        assert!(repo.task(&snapshot.tasks[0].id).await.is_none());
    }

    #[tokio::test]
    async fn test_injected_failure_leaves_store_untouched() {
        let (repo, snapshot) = fixture();
        let task = &snapshot.tasks[0];
        repo.fail_next(RepositoryError::network("offline")).await;

        let result = repo.delete_task(&task.id).await;
        assert_eq!(result, Err(RepositoryError::network("offline")));
        assert!(repo.task(&task.id).await.is_some());

        repo.delete_task(&task.id).await.unwrap();
        assert_eq!(repo.writes().await.len(), 2);
    }

    #[tokio::test]
    async fn test_entity_failure_persists_until_cleared() {
        let (repo, snapshot) = fixture();
        let entity = EntityRef::Task(snapshot.tasks[0].id.clone());
        repo.fail_entity(entity, RepositoryError::rejected("locked")).await;

        let update = TaskUpdate::default().with_title("x");
        assert!(repo.update_task(&snapshot.tasks[0].id, &update).await.is_err());
        assert!(repo.update_task(&snapshot.tasks[0].id, &update).await.is_err());
        repo.clear_faults().await;
        assert!(repo.update_task(&snapshot.tasks[0].id, &update).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_delays_acknowledgement() {
        let (repo, snapshot) = fixture();
        repo.set_latency(Duration::from_millis(500)).await;
        let start = tokio::time::Instant::now();
        repo.load_board(&snapshot.board.id).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_apply_external_broadcasts() {
        let (repo, snapshot) = fixture();
        let mut events = repo.subscribe();
        let card = Task::new(snapshot.columns[1].id.clone(), "From elsewhere");

        repo.apply_external(ChangeEvent::task_inserted(card.clone()))
            .await
            .unwrap();

        assert_eq!(events.recv().await.unwrap(), ChangeEvent::task_inserted(card.clone()));
        assert!(repo.calls().await.is_empty());
        assert_eq!(repo.task(&card.id).await, Some(card));
    }

    #[tokio::test]
    async fn test_list_boards_filters_by_owner() {
        let (repo, snapshot) = fixture();
        repo.create_board(&Board::new("Other", "bob")).await.unwrap();
        let boards = repo.list_boards("alice").await.unwrap();
        assert_eq!(boards, vec![snapshot.board]);
    }
}
