use super::pending::{
    ops_for, persist, Completion, EntitySnapshot, MutationKind, MutationStatus, PendingMutation,
    PersistOp,
};
use super::{ModelEvent, ModelEventKind, RemoteOutcome, Resolution, Step};
use crate::config::SyncConfig;
use crate::drag::{DragSession, Droppable, Point};
use crate::error::{KanbanError, Result};
use crate::model::BoardModel;
use crate::reorder::{compute_reorder, DragIntent};
use crate::repository::{ChangeEvent, Repository, RowChange};
use crate::types::{
    BoardId, BoardUpdate, Column, ColumnId, ColumnUpdate, EntityRef, EntityState, MutationId,
    Task, TaskId, TaskUpdate,
};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, trace, warn};

/// Owns the board model and keeps it in step with a repository.
///
/// All model mutation happens through `&mut self` on one task. Persistence
/// runs in spawned tasks that report back over a channel; nothing they do
/// touches the model until [`resolve`](Self::resolve) processes their
/// completion.
pub struct SyncCoordinator<R: Repository> {
    repo: Arc<R>,
    config: SyncConfig,
    model: BoardModel,
    drag: DragSession,

    /// In-flight mutations in commit order
    pending: Vec<PendingMutation>,
    /// Which mutation currently owns each entity
    owners: HashMap<EntityRef, MutationId>,
    /// States the store may still be left in by superseded writes, per
    /// owned entity
    unsettled: HashMap<EntityRef, Vec<EntityState>>,
    /// Realtime notifications parked until their entity's owner resolves
    held: HashMap<EntityRef, Vec<ChangeEvent>>,

    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    in_flight: usize,
    realtime: broadcast::Receiver<ChangeEvent>,

    events: broadcast::Sender<ModelEvent>,
    revision: u64,
    /// Set when the model may have drifted from the store; cleared by resync
    stale: bool,
}

impl<R: Repository> SyncCoordinator<R> {
    /// Load a board from the repository and start tracking it.
    ///
    /// Duplicate ranks found while loading are repaired locally and the
    /// repairs persisted.
    pub async fn open(repo: Arc<R>, board: &BoardId, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        // subscribe first so nothing written between load and subscribe is lost
        let realtime = repo.subscribe();
        let snapshot = repo.load_board(board).await?;
        let (model, repaired) = BoardModel::load(snapshot.board, snapshot.columns, snapshot.tasks)?;
        info!(
            board = %board,
            columns = model.columns().len(),
            tasks = model.task_count(),
            "opened board"
        );

        let mut coordinator = Self::with_subscription(repo, model, config, realtime);
        coordinator.persist_repairs(repaired);
        Ok(coordinator)
    }

    /// Track an already loaded model
    pub fn new(repo: Arc<R>, model: BoardModel, config: SyncConfig) -> Self {
        let realtime = repo.subscribe();
        Self::with_subscription(repo, model, config, realtime)
    }

    fn with_subscription(
        repo: Arc<R>,
        model: BoardModel,
        config: SyncConfig,
        realtime: broadcast::Receiver<ChangeEvent>,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            repo,
            config,
            model,
            drag: DragSession::new(),
            pending: Vec::new(),
            owners: HashMap::new(),
            unsettled: HashMap::new(),
            held: HashMap::new(),
            completion_tx,
            completion_rx,
            in_flight: 0,
            realtime,
            events,
            revision: 0,
            stale: false,
        }
    }

    // =========================================================================
    // Rendering surface
    // =========================================================================

    pub fn model(&self) -> &BoardModel {
        &self.model
    }

    pub fn drag_session(&self) -> &DragSession {
        &self.drag
    }

    /// In-flight mutations in commit order
    pub fn pending(&self) -> &[PendingMutation] {
        &self.pending
    }

    /// Mutation currently owning an entity
    pub fn owner_of(&self, entity: &EntityRef) -> Option<&MutationId> {
        self.owners.get(entity)
    }

    /// Number of realtime notifications parked for an entity
    pub fn held_count(&self, entity: &EntityRef) -> usize {
        self.held.get(entity).map_or(0, Vec::len)
    }

    /// Persistence tasks that have not reported back yet
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn subscribe_model(&self) -> broadcast::Receiver<ModelEvent> {
        self.events.subscribe()
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repo
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn emit(&mut self, kind: ModelEventKind) {
        self.revision += 1;
        // nobody listening is fine
        let _ = self.events.send(ModelEvent {
            revision: self.revision,
            kind,
        });
    }

    // =========================================================================
    // Gestures
    // =========================================================================

    pub fn begin_drag(&mut self, active: EntityRef) -> Result<()> {
        self.drag.begin(&self.model, active)?;
        self.emit(ModelEventKind::DragChanged);
        Ok(())
    }

    /// Feed a pointer position to the drag session. Returns whether the drop
    /// candidate changed.
    pub fn hover(&mut self, pointer: Point, droppables: &[Droppable]) -> bool {
        let changed = self.drag.hover(pointer, droppables);
        if changed {
            self.emit(ModelEventKind::DragChanged);
        }
        changed
    }

    pub fn cancel_drag(&mut self) {
        if self.drag.is_active() {
            self.drag.cancel();
            self.emit(ModelEventKind::DragChanged);
        }
    }

    /// Finish the gesture and commit whatever it resolves to
    pub fn release(&mut self) -> Result<Option<MutationId>> {
        if !self.drag.is_active() {
            return Ok(None);
        }
        let intent = self.drag.release(&self.model);
        self.emit(ModelEventKind::DragChanged);
        match intent {
            Some(intent) => self.commit(&intent),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Local changes
    // =========================================================================

    /// Apply a drop intent locally and persist it in the background.
    ///
    /// Returns as soon as the model has changed. Drops that change nothing
    /// return `Ok(None)` and persist nothing.
    pub fn commit(&mut self, intent: &DragIntent) -> Result<Option<MutationId>> {
        let reorder = match compute_reorder(&self.model, intent) {
            Ok(reorder) => reorder,
            Err(error) => {
                if error.is_fatal() {
                    for collection in intent.collections(&self.model) {
                        if !self.model.is_poisoned(&collection) {
                            self.model.poison(collection);
                        }
                    }
                }
                return Err(error);
            }
        };
        if reorder.changes.is_empty() {
            debug!(entity = %intent.entity(), "drop changed nothing");
            return Ok(None);
        }

        let entities: Vec<EntityRef> = reorder.changes.entities().cloned().collect();
        Ok(self.apply_local(format!("move {}", intent.entity()), reorder.model, entities))
    }

    /// Append a column to the board
    pub fn create_column(&mut self, title: impl Into<String>) -> Result<(ColumnId, MutationId)> {
        let title = require_title("column", title.into())?;
        let column = Column::new(self.model.board().id.clone(), title);
        let id = column.id.clone();

        let mut next = self.model.clone();
        let entities = next.push_column(column)?;
        let mutation = self
            .apply_local(format!("create column {}", id), next, entities)
            .ok_or_else(|| KanbanError::invalid_value("column", "creating it changed nothing"))?;
        Ok((id, mutation))
    }

    pub fn rename_column(&mut self, id: &ColumnId, title: impl Into<String>) -> Result<Option<MutationId>> {
        let title = require_title("column", title.into())?;
        let mut next = self.model.clone();
        let mut entities = next.apply_column_update(id, &ColumnUpdate::default().with_title(title))?;
        entities.push(EntityRef::Column(id.clone()));
        Ok(self.apply_local(format!("rename column {}", id), next, entities))
    }

    /// Delete a column with all of its tasks
    pub fn delete_column(&mut self, id: &ColumnId) -> Result<Option<MutationId>> {
        if !self.model.has_column(id) {
            return Err(KanbanError::ColumnNotFound { id: id.to_string() });
        }
        let mut entities = vec![EntityRef::Column(id.clone())];
        entities.extend(
            self.model
                .tasks_of(id)
                .iter()
                .map(|t| EntityRef::Task(t.id.clone())),
        );

        let mut next = self.model.clone();
        next.remove_column(id);
        Ok(self.apply_local(format!("delete column {}", id), next, entities))
    }

    /// Append a task to the end of its column
    pub fn create_task(&mut self, task: Task) -> Result<(TaskId, MutationId)> {
        require_title("task", task.title.clone())?;
        let id = task.id.clone();

        let mut next = self.model.clone();
        let entities = next.push_task(task)?;
        let mutation = self
            .apply_local(format!("create task {}", id), next, entities)
            .ok_or_else(|| KanbanError::invalid_value("task", "creating it changed nothing"))?;
        Ok((id, mutation))
    }

    pub fn update_task(&mut self, id: &TaskId, update: TaskUpdate) -> Result<Option<MutationId>> {
        if let Some(title) = &update.title {
            require_title("task", title.clone())?;
        }
        let mut next = self.model.clone();
        let mut entities = next.apply_task_update(id, &update)?;
        entities.push(EntityRef::Task(id.clone()));
        Ok(self.apply_local(format!("update task {}", id), next, entities))
    }

    pub fn delete_task(&mut self, id: &TaskId) -> Result<Option<MutationId>> {
        let mut next = self.model.clone();
        if next.remove_task(id).is_none() {
            return Err(KanbanError::TaskNotFound { id: id.to_string() });
        }
        Ok(self.apply_local(format!("delete task {}", id), next, vec![EntityRef::Task(id.clone())]))
    }

    pub fn update_board(&mut self, update: BoardUpdate) -> Result<Option<MutationId>> {
        if let Some(title) = &update.title {
            require_title("board", title.clone())?;
        }
        let mut next = self.model.clone();
        next.update_board(&update);
        let entity = EntityRef::Board(next.board().id.clone());
        Ok(self.apply_local(format!("update {}", entity), next, vec![entity]))
    }

    /// Swap in `next` and record a mutation for the entities that changed
    fn apply_local(&mut self, label: String, next: BoardModel, entities: Vec<EntityRef>) -> Option<MutationId> {
        let mut snapshots: Vec<EntitySnapshot> = Vec::new();
        for entity in entities {
            if snapshots.iter().any(|s| s.entity == entity) {
                continue;
            }
            let snapshot = EntitySnapshot {
                before: self.model.snapshot(&entity),
                after: next.snapshot(&entity),
                entity,
            };
            if snapshot.is_change() {
                snapshots.push(snapshot);
            }
        }
        if snapshots.is_empty() {
            debug!(%label, "local change left every entity as it was");
            return None;
        }
        snapshots.sort_by(|a, b| a.entity.cmp(&b.entity));

        self.model = next;
        self.track_unsettled(&snapshots);
        let ops = ops_for(&snapshots, &self.unsettled);
        Some(self.record(label, MutationKind::Local, snapshots, ops))
    }

    /// Remember what the current owner of each entity started from, since
    /// its write may still fail and leave that state in the store
    fn track_unsettled(&mut self, snapshots: &[EntitySnapshot]) {
        for snapshot in snapshots {
            let Some(owner) = self.owners.get(&snapshot.entity) else {
                self.unsettled.remove(&snapshot.entity);
                continue;
            };
            let earlier = self
                .pending
                .iter()
                .find(|m| &m.id == owner)
                .and_then(|m| m.snapshot(&snapshot.entity))
                .and_then(|s| s.before.clone());
            if let Some(state) = earlier {
                self.unsettled
                    .entry(snapshot.entity.clone())
                    .or_default()
                    .push(state);
            }
        }
    }

    /// Persist the current rank of entities re-ranked by a repair
    fn persist_repairs(&mut self, repaired: Vec<EntityRef>) {
        let mut snapshots: Vec<EntitySnapshot> = Vec::new();
        let mut ops = Vec::new();
        for entity in repaired {
            if snapshots.iter().any(|s| s.entity == entity) {
                continue;
            }
            let Some(state) = self.model.snapshot(&entity) else {
                continue;
            };
            ops.extend(PersistOp::rank_of(&state));
            snapshots.push(EntitySnapshot {
                entity,
                before: Some(state.clone()),
                after: Some(state),
            });
        }
        if ops.is_empty() {
            return;
        }
        self.track_unsettled(&snapshots);
        ops.extend(ops_for(&snapshots, &self.unsettled));
        warn!(count = snapshots.len(), "persisting rank repairs");
        self.record("repair ranks".to_string(), MutationKind::Repair, snapshots, ops);
    }

    /// Take ownership of the snapshotted entities and start persisting.
    fn record(
        &mut self,
        label: String,
        kind: MutationKind,
        snapshots: Vec<EntitySnapshot>,
        ops: Vec<PersistOp>,
    ) -> MutationId {
        let id = MutationId::new();

        let mut superseded: Vec<MutationId> = Vec::new();
        for snapshot in &snapshots {
            if let Some(previous) = self.owners.insert(snapshot.entity.clone(), id.clone()) {
                debug!(entity = %snapshot.entity, superseded = %previous, mutation = %id, "superseding in-flight mutation");
                if !superseded.contains(&previous) {
                    superseded.push(previous);
                }
            }
        }
        // writes of superseded mutations must reach the store first
        let wait_for: Vec<watch::Receiver<bool>> = self
            .pending
            .iter()
            .filter(|m| superseded.contains(&m.id))
            .map(|m| m.done.clone())
            .collect();

        let owners = &self.owners;
        self.pending.retain(|m| {
            let owns_any = m.entities().any(|e| owners.get(e) == Some(&m.id));
            if !owns_any {
                debug!(mutation = %m.id, label = %m.label, "dropping fully superseded mutation");
            }
            owns_any
        });

        let (done_tx, done_rx) = watch::channel(false);
        let repo = Arc::clone(&self.repo);
        let completions = self.completion_tx.clone();
        let limit = self.config.persist_timeout();
        let mutation = id.clone();
        let calls = ops.clone();
        tokio::spawn(async move {
            let result = persist(repo.as_ref(), &calls, wait_for, limit).await;
            done_tx.send_replace(true);
            if completions.send(Completion { mutation, result }).is_err() {
                trace!("coordinator dropped before persistence finished");
            }
        });
        self.in_flight += 1;

        info!(mutation = %id, %label, entities = snapshots.len(), calls = ops.len(), "committed locally");
        self.pending.push(PendingMutation {
            id: id.clone(),
            label,
            kind,
            snapshots,
            ops,
            status: MutationStatus::InFlight,
            done: done_rx,
        });
        self.emit(ModelEventKind::LocalCommit {
            mutation: id.clone(),
        });
        id
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Wait for the next mutation to resolve. `None` when nothing is in flight.
    pub async fn next_resolution(&mut self) -> Option<Resolution> {
        if self.in_flight == 0 {
            return None;
        }
        let completion = self.completion_rx.recv().await?;
        Some(self.complete(completion))
    }

    /// Resolve everything in flight, then reload from the store if the model
    /// may have drifted.
    pub async fn settle(&mut self) -> Result<Vec<Resolution>> {
        let mut resolutions = Vec::new();
        while let Some(resolution) = self.next_resolution().await {
            resolutions.push(resolution);
        }
        self.pump_realtime();
        if self.stale && self.in_flight == 0 {
            self.resync().await?;
        }
        Ok(resolutions)
    }

    fn complete(&mut self, completion: Completion) -> Resolution {
        self.in_flight = self.in_flight.saturating_sub(1);
        // echoes of this mutation's writes are already queued; hold them first
        self.pump_realtime();
        self.resolve(completion)
    }

    /// Apply the outcome of a mutation's persistence.
    ///
    /// Only entities the mutation still owns are affected. On success held
    /// notifications are replayed minus the fields this mutation wrote; on
    /// failure the before state is restored and held notifications are
    /// replayed in full.
    pub fn resolve(&mut self, completion: Completion) -> Resolution {
        let Completion { mutation, result } = completion;

        let Some(index) = self.pending.iter().position(|m| m.id == mutation) else {
            let error = result.err();
            match &error {
                Some(error) => {
                    warn!(%mutation, %error, "superseded mutation failed, resync scheduled");
                    self.stale = true;
                }
                None => debug!(%mutation, "superseded mutation confirmed"),
            }
            let resolution = Resolution::Superseded { mutation, error };
            self.log_resolution(&resolution);
            return resolution;
        };

        let mut pending = self.pending.remove(index);
        let owned: Vec<EntitySnapshot> = pending
            .snapshots
            .iter()
            .filter(|s| self.owners.get(&s.entity) == Some(&pending.id))
            .cloned()
            .collect();
        for snapshot in &owned {
            self.owners.remove(&snapshot.entity);
            self.unsettled.remove(&snapshot.entity);
        }
        let partly_superseded = owned.len() < pending.snapshots.len();

        let resolution = match result {
            Ok(()) => {
                info!(%mutation, label = %pending.label, "mutation confirmed");
                self.emit(ModelEventKind::Confirmed {
                    mutation: mutation.clone(),
                });
                for snapshot in &owned {
                    self.replay_held(snapshot, true);
                }
                Resolution::Confirmed { mutation }
            }
            Err(error) => {
                warn!(%mutation, label = %pending.label, %error, "persistence failed, rolling back");
                let states: Vec<(EntityRef, Option<EntityState>)> = owned
                    .iter()
                    .map(|s| (s.entity.clone(), s.before.clone()))
                    .collect();
                match self.model.restore_all(&states) {
                    Ok(repairs) if pending.kind == MutationKind::Local => self.persist_repairs(repairs),
                    Ok(_) => {}
                    Err(restore_error) => {
                        warn!(%mutation, error = %restore_error, "rollback could not be applied cleanly");
                        self.stale = true;
                    }
                }
                if partly_superseded {
                    self.stale = true;
                }
                self.emit(ModelEventKind::RolledBack {
                    mutation: mutation.clone(),
                    error: error.clone(),
                });
                for snapshot in &owned {
                    self.replay_held(snapshot, false);
                }
                Resolution::RolledBack { mutation, error }
            }
        };
        pending.status = resolution.status();
        debug!(mutation = %pending.id, status = ?pending.status, calls = pending.ops.len(), "mutation left the ledger");
        self.log_resolution(&resolution);
        resolution
    }

    fn replay_held(&mut self, snapshot: &EntitySnapshot, confirmed: bool) {
        let Some(events) = self.held.remove(&snapshot.entity) else {
            return;
        };
        debug!(entity = %snapshot.entity, count = events.len(), confirmed, "replaying held notifications");
        for event in events {
            let event = if confirmed {
                match snapshot.residue(event) {
                    Some(event) => event,
                    None => continue,
                }
            } else {
                event
            };
            self.apply_remote(event);
        }
    }

    fn log_resolution(&self, resolution: &Resolution) {
        let Some(path) = &self.config.completion_log else {
            return;
        };
        let line = match serde_json::to_string(resolution) {
            Ok(line) => line,
            Err(error) => {
                warn!(%error, "could not serialize resolution");
                return;
            }
        };
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{}", line));
        if let Err(error) = written {
            warn!(path = %path.display(), %error, "could not append to completion log");
        }
    }

    // =========================================================================
    // Realtime
    // =========================================================================

    /// Handle one realtime notification.
    ///
    /// Notifications about an entity with an in-flight mutation are held
    /// until that mutation resolves; all others are applied at once.
    pub fn handle_remote(&mut self, event: ChangeEvent) -> RemoteOutcome {
        let entity = event.entity();
        if let Some(owner) = self.owners.get(&entity) {
            debug!(%entity, mutation = %owner, "holding remote change until mutation resolves");
            self.held.entry(entity).or_default().push(event);
            return RemoteOutcome::Held;
        }
        self.apply_remote(event)
    }

    /// Handle every realtime notification already queued, without waiting
    pub fn pump_realtime(&mut self) -> Vec<RemoteOutcome> {
        let mut outcomes = Vec::new();
        loop {
            match self.realtime.try_recv() {
                Ok(event) => outcomes.push(self.handle_remote(event)),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "realtime stream lagged, resync scheduled");
                    self.stale = true;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        outcomes
    }

    fn apply_remote(&mut self, event: ChangeEvent) -> RemoteOutcome {
        let entity = event.entity();
        let applied: Result<Option<Vec<EntityRef>>> = match event {
            ChangeEvent::Board { id, change } => {
                if id != self.model.board().id {
                    Ok(None)
                } else {
                    match change {
                        RowChange::Inserted(board) => {
                            let changed = &board != self.model.board();
                            self.model.set_board(board);
                            Ok(changed.then(Vec::new))
                        }
                        RowChange::Updated(update) => Ok(self.model.update_board(&update).then(Vec::new)),
                        RowChange::Deleted => {
                            warn!(board = %id, "board deleted by another session");
                            let columns: Vec<ColumnId> =
                                self.model.columns().iter().map(|c| c.id.clone()).collect();
                            for column in &columns {
                                self.model.remove_column(column);
                            }
                            Ok(Some(Vec::new()))
                        }
                    }
                }
            }
            ChangeEvent::Column { id, change } => match change {
                RowChange::Inserted(column) => {
                    if column.board_id != self.model.board().id || self.model.column(&id) == Some(&column) {
                        Ok(None)
                    } else {
                        self.model.insert_column(column).map(Some)
                    }
                }
                RowChange::Updated(update) => match self.model.column(&id).cloned() {
                    None => Ok(None),
                    Some(before) => self
                        .model
                        .apply_column_update(&id, &update)
                        .map(|repairs| (self.model.column(&id) != Some(&before)).then_some(repairs)),
                },
                RowChange::Deleted => Ok(self.model.remove_column(&id).map(|_| Vec::new())),
            },
            ChangeEvent::Task { id, change } => match change {
                RowChange::Inserted(task) => {
                    if !self.model.has_column(&task.column_id) || self.model.task(&id) == Some(&task) {
                        Ok(None)
                    } else {
                        self.model.insert_task(task).map(Some)
                    }
                }
                RowChange::Updated(update) => match self.model.task(&id).cloned() {
                    None => Ok(None),
                    Some(_) if update
                        .column_id
                        .as_ref()
                        .is_some_and(|column| !self.model.has_column(column)) =>
                    {
                        debug!(task = %id, "task moved off this board");
                        self.model.remove_task(&id);
                        Ok(Some(Vec::new()))
                    }
                    Some(before) => self
                        .model
                        .apply_task_update(&id, &update)
                        .map(|repairs| (self.model.task(&id) != Some(&before)).then_some(repairs)),
                },
                RowChange::Deleted => Ok(self.model.remove_task(&id).map(|_| Vec::new())),
            },
        };

        match applied {
            Ok(Some(repairs)) => {
                debug!(%entity, "applied remote change");
                self.emit(ModelEventKind::Remote { entity });
                self.persist_repairs(repairs);
                RemoteOutcome::Applied
            }
            Ok(None) => {
                trace!(%entity, "remote change ignored");
                RemoteOutcome::Ignored
            }
            Err(error) => {
                warn!(%entity, %error, "remote change could not be applied, resync scheduled");
                self.stale = true;
                RemoteOutcome::Ignored
            }
        }
    }

    /// Reload the board from the store and re-apply the after state of
    /// every entity still owned by an in-flight mutation.
    pub async fn resync(&mut self) -> Result<()> {
        let board = self.model.board().id.clone();
        let snapshot = self.repo.load_board(&board).await?;
        let (mut model, repaired) = BoardModel::load(snapshot.board, snapshot.columns, snapshot.tasks)?;

        for pending in &self.pending {
            let states: Vec<(EntityRef, Option<EntityState>)> = pending
                .snapshots
                .iter()
                .filter(|s| self.owners.get(&s.entity) == Some(&pending.id))
                .map(|s| (s.entity.clone(), s.after.clone()))
                .collect();
            if let Err(error) = model.restore_all(&states) {
                warn!(mutation = %pending.id, %error, "could not re-apply in-flight change after reload");
            }
        }

        self.model = model;
        self.stale = false;
        info!(board = %board, in_flight = self.pending.len(), "resynced board from store");
        self.emit(ModelEventKind::Resynced);
        self.persist_repairs(repaired);
        Ok(())
    }

    /// Drive one turn of the event loop: resolve a completion or handle a
    /// realtime notification, whichever comes first.
    pub async fn step(&mut self) -> Result<Step> {
        tokio::select! {
            biased;
            Some(completion) = self.completion_rx.recv(), if self.in_flight > 0 => {
                let resolution = self.complete(completion);
                if self.stale && self.in_flight == 0 {
                    self.resync().await?;
                }
                Ok(Step::Resolved(resolution))
            }
            event = self.realtime.recv() => match event {
                Ok(event) => Ok(Step::Remote(self.handle_remote(event))),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "realtime stream lagged, resyncing");
                    self.resync().await?;
                    Ok(Step::Resynced)
                }
                Err(RecvError::Closed) => Ok(Step::Closed),
            },
        }
    }
}

fn require_title(field: &str, title: String) -> Result<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(KanbanError::invalid_value(field, "title must not be empty"));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{BoardSnapshot, InMemoryRepository, RepositoryError};
    use crate::types::{Board, Rank};

    async fn open() -> (Arc<InMemoryRepository>, SyncCoordinator<InMemoryRepository>) {
        let board = Board::new("Board", "owner");
        let mut todo = Column::new(board.id.clone(), "To Do").with_position(Rank::new(1024));
        todo.id = ColumnId::from_string("todo");
        let mut done = Column::new(board.id.clone(), "Done").with_position(Rank::new(2048));
        done.id = ColumnId::from_string("done");
        let mut card = Task::new(todo.id.clone(), "Card");
        card.id = TaskId::from_string("card");
        let board_id = board.id.clone();
        let repo = Arc::new(InMemoryRepository::with_snapshots([BoardSnapshot {
            board,
            columns: vec![todo, done],
            tasks: vec![card],
        }]));
        let coordinator = SyncCoordinator::open(Arc::clone(&repo), &board_id, SyncConfig::default())
            .await
            .unwrap();
        (repo, coordinator)
    }

    #[tokio::test]
    async fn test_noop_commit_persists_nothing() {
        let (repo, mut coordinator) = open().await;
        let intent = DragIntent::task("card", "todo", 0);
        assert_eq!(coordinator.commit(&intent).unwrap(), None);
        assert!(coordinator.pending().is_empty());
        assert!(coordinator.settle().await.unwrap().is_empty());
        assert!(repo.writes().await.is_empty());
    }

    #[tokio::test]
    async fn test_commit_returns_before_persistence() {
        let (repo, mut coordinator) = open().await;
        let mutation = coordinator
            .commit(&DragIntent::task("card", "done", 0))
            .unwrap()
            .unwrap();

        assert_eq!(coordinator.pending().len(), 1);
        assert_eq!(coordinator.pending()[0].status, MutationStatus::InFlight);
        let card = coordinator.model().task(&TaskId::from_string("card")).unwrap();
        assert_eq!(card.column_id, ColumnId::from_string("done"));

        let resolutions = coordinator.settle().await.unwrap();
        assert_eq!(resolutions, vec![Resolution::Confirmed { mutation }]);
        let stored = repo.task(&TaskId::from_string("card")).await.unwrap();
        assert_eq!(stored.column_id, ColumnId::from_string("done"));
    }

    #[tokio::test]
    async fn test_model_events_are_numbered() {
        let (_repo, mut coordinator) = open().await;
        let mut events = coordinator.subscribe_model();
        coordinator
            .begin_drag(EntityRef::Task(TaskId::from_string("card")))
            .unwrap();
        coordinator.cancel_drag();

        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        assert_eq!(first.kind, ModelEventKind::DragChanged);
        assert_eq!(second.revision, first.revision + 1);
        assert_eq!(coordinator.commit(&DragIntent::column("todo", 0)).unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_delete_restores_task() {
        let (repo, mut coordinator) = open().await;
        let before = coordinator.model().clone();
        repo.fail_next(RepositoryError::rejected("read only")).await;

        coordinator.delete_task(&TaskId::from_string("card")).unwrap();
        assert!(coordinator.model().task(&TaskId::from_string("card")).is_none());

        let resolutions = coordinator.settle().await.unwrap();
        assert!(resolutions[0].is_rollback());
        assert_eq!(coordinator.model(), &before);
    }

    #[tokio::test]
    async fn test_empty_titles_are_rejected() {
        let (_repo, mut coordinator) = open().await;
        assert!(matches!(
            coordinator.create_column("   "),
            Err(KanbanError::InvalidValue { .. })
        ));
        assert!(coordinator.pending().is_empty());
    }

    #[tokio::test]
    async fn test_completion_log_records_resolutions() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("resolutions.jsonl");
        let (repo, _) = open().await;
        let board = repo.list_boards("owner").await.unwrap().remove(0);
        let config = SyncConfig {
            completion_log: Some(log.clone()),
            ..SyncConfig::default()
        };
        let mut coordinator = SyncCoordinator::open(Arc::clone(&repo), &board.id, config)
            .await
            .unwrap();

        coordinator.rename_column(&ColumnId::from_string("done"), "Shipped").unwrap();
        coordinator.settle().await.unwrap();

        let contents = std::fs::read_to_string(&log).unwrap();
        let line: serde_json::Value = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(line["resolution"], "confirmed");
    }
}
