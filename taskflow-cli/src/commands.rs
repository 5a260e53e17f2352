//! Subcommand handlers

use crate::cli::Commands;
use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use taskflow_kanban::{
    compute_reorder, BoardModel, BoardSnapshot, ChangeEvent, ColumnId, DragIntent,
    InMemoryRepository, RepositoryError, Resolution, SyncConfig, SyncCoordinator, TaskId,
};
use tracing::{info, warn};

/// One step of a replay script
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScriptStep {
    /// Commit a drop
    Drop { intent: DragIntent },
    /// Make the next repository call fail
    Fail { error: RepositoryError },
    /// Apply an edit from another session
    External { event: ChangeEvent },
    /// Wait for everything in flight to resolve
    Settle,
}

#[derive(Debug, Serialize)]
struct ReplayReport {
    resolutions: Vec<Resolution>,
    board: BoardSnapshot,
}

pub async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Show { snapshot } => show(&snapshot),
        Commands::Move {
            snapshot,
            task,
            column,
            index,
            write,
        } => move_task(&snapshot, &task, &column, index, write),
        Commands::Replay {
            snapshot,
            script,
            config,
        } => replay(&snapshot, &script, config.as_deref()).await,
    }
}

fn show(path: &Path) -> Result<()> {
    let model = load_model(path)?;
    println!("{}", model.board().title);
    for column in model.columns() {
        let tasks = model.tasks_of(&column.id);
        println!();
        println!("{} ({})", column.title, tasks.len());
        for (index, task) in tasks.iter().enumerate() {
            let due = task
                .due_date
                .map(|d| format!(" due {}", d))
                .unwrap_or_default();
            println!(
                "  {}. {} [{}] {}{}",
                index,
                task.title,
                task.id,
                task.priority.as_str(),
                due
            );
        }
    }
    Ok(())
}

fn move_task(path: &Path, task: &str, column: &str, index: usize, write: bool) -> Result<()> {
    let model = load_model(path)?;
    let task = TaskId::from_string(task);
    let column = ColumnId::from_string(column);
    if model.task(&task).is_none() {
        bail!("task {} not found in {}", task, path.display());
    }
    if !model.has_column(&column) {
        bail!("column {} not found in {}", column, path.display());
    }

    let reorder = compute_reorder(&model, &DragIntent::task(task, column, index))?;
    println!("{}", serde_json::to_string_pretty(&reorder.changes)?);

    if write && !reorder.changes.is_empty() {
        write_file(path, &reorder.model.to_snapshot())?;
        info!(path = %path.display(), changes = reorder.changes.len(), "saved reordered board");
    }
    Ok(())
}

async fn replay(snapshot: &Path, script: &Path, config: Option<&Path>) -> Result<()> {
    let config = SyncConfig::load(config)?;
    let snapshot: BoardSnapshot = read_file(snapshot)?;
    let steps: Vec<ScriptStep> = read_file(script)?;
    let board = snapshot.board.id.clone();

    let repo = Arc::new(InMemoryRepository::with_snapshots([snapshot]));
    let mut coordinator = SyncCoordinator::open(Arc::clone(&repo), &board, config).await?;
    let mut resolutions = Vec::new();

    for (number, step) in steps.into_iter().enumerate() {
        match step {
            ScriptStep::Drop { intent } => match coordinator.commit(&intent) {
                Ok(Some(mutation)) => info!(step = number, %mutation, "committed drop"),
                Ok(None) => info!(step = number, "drop changed nothing"),
                Err(error) => warn!(step = number, %error, "drop refused"),
            },
            ScriptStep::Fail { error } => repo.fail_next(error).await,
            ScriptStep::External { event } => {
                repo.apply_external(event)
                    .await
                    .with_context(|| format!("step {} could not be applied to the store", number))?;
                coordinator.pump_realtime();
            }
            ScriptStep::Settle => resolutions.extend(coordinator.settle().await?),
        }
    }
    resolutions.extend(coordinator.settle().await?);

    let report = ReplayReport {
        resolutions,
        board: coordinator.model().to_snapshot(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn load_model(path: &Path) -> Result<BoardModel> {
    let snapshot: BoardSnapshot = read_file(path)?;
    let (model, repaired) = BoardModel::load(snapshot.board, snapshot.columns, snapshot.tasks)?;
    if !repaired.is_empty() {
        warn!(count = repaired.len(), "snapshot had colliding ranks, repaired in memory");
    }
    Ok(model)
}

enum Format {
    Json,
    Yaml,
}

fn format_of(path: &Path) -> Result<Format> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("yaml") | Some("yml") => Ok(Format::Yaml),
        _ => bail!("unsupported file format: {} (expected .json, .yaml or .yml)", path.display()),
    }
}

fn read_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let format = format_of(path)?;
    let contents =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let value = match format {
        Format::Json => serde_json::from_str(&contents)
            .with_context(|| format!("invalid JSON in {}", path.display()))?,
        Format::Yaml => serde_yaml_ng::from_str(&contents)
            .with_context(|| format!("invalid YAML in {}", path.display()))?,
    };
    Ok(value)
}

fn write_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let contents = match format_of(path)? {
        Format::Json => serde_json::to_string_pretty(value)?,
        Format::Yaml => serde_yaml_ng::to_string(value)?,
    };
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}
