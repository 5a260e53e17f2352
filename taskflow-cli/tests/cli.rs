//! End-to-end tests for the taskflow binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use taskflow_kanban::{Board, BoardSnapshot, Column, ColumnId, Rank, Task, TaskId};
use tempfile::TempDir;

fn snapshot() -> BoardSnapshot {
    let board = Board::new("Release", "ana");
    let mut todo = Column::new(board.id.clone(), "To Do").with_position(Rank::new(1024));
    todo.id = ColumnId::from_string("todo");
    let mut done = Column::new(board.id.clone(), "Done").with_position(Rank::new(2048));
    done.id = ColumnId::from_string("done");

    let mut tasks = Vec::new();
    for (id, rank) in [("t1", 1024), ("t2", 2048)] {
        let mut task = Task::new(todo.id.clone(), format!("Task {id}")).with_position(Rank::new(rank));
        task.id = TaskId::from_string(id);
        tasks.push(task);
    }
    BoardSnapshot {
        board,
        columns: vec![todo, done],
        tasks,
    }
}

fn write_snapshot(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    let snapshot = snapshot();
    let contents = if name.ends_with(".json") {
        serde_json::to_string_pretty(&snapshot).unwrap()
    } else {
        serde_yaml_ng::to_string(&snapshot).unwrap()
    };
    fs::write(&path, contents).unwrap();
    path
}

fn taskflow() -> Command {
    Command::cargo_bin("taskflow").unwrap()
}

#[test]
fn test_show_lists_columns_in_order() {
    let dir = TempDir::new().unwrap();
    let path = write_snapshot(dir.path(), "board.yaml");

    taskflow()
        .arg("show")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Release"))
        .stdout(predicate::str::contains("To Do (2)"))
        .stdout(predicate::str::contains("Done (0)"))
        .stdout(predicate::str::is_match(r"(?s)Task t1.*Task t2").unwrap());
}

#[test]
fn test_move_prints_changes_without_writing() {
    let dir = TempDir::new().unwrap();
    let path = write_snapshot(dir.path(), "board.json");
    let before = fs::read_to_string(&path).unwrap();

    let output = taskflow()
        .args(["move", path.to_str().unwrap(), "--task", "t2", "--column", "done", "--index", "0"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let changes: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(changes.as_array().unwrap().len(), 1);
    assert_eq!(changes[0]["entity"]["id"], "t2");
    assert_eq!(changes[0]["column"], "done");
    assert_eq!(fs::read_to_string(&path).unwrap(), before);
}

#[test]
fn test_move_write_saves_snapshot() {
    let dir = TempDir::new().unwrap();
    let path = write_snapshot(dir.path(), "board.yaml");

    taskflow()
        .args(["move", path.to_str().unwrap(), "--task", "t1", "--column", "done", "--index", "0", "--write"])
        .assert()
        .success();

    taskflow()
        .arg("show")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("To Do (1)"))
        .stdout(predicate::str::contains("Done (1)"));
}

#[test]
fn test_move_unknown_task_fails() {
    let dir = TempDir::new().unwrap();
    let path = write_snapshot(dir.path(), "board.json");

    taskflow()
        .args(["move", path.to_str().unwrap(), "--task", "nope", "--column", "done", "--index", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_unsupported_extension_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("board.txt");
    fs::write(&path, "{}").unwrap();

    taskflow()
        .arg("show")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported file format"));
}

#[test]
fn test_replay_reports_rollback() {
    let dir = TempDir::new().unwrap();
    let path = write_snapshot(dir.path(), "board.json");
    let script = dir.path().join("script.yaml");
    fs::write(
        &script,
        r#"
- action: drop
  intent: {kind: task, task: t1, to_column: done, to_index: 0}
- action: settle
- action: fail
  error: {kind: rejected, message: read only}
- action: drop
  intent: {kind: task, task: t2, to_column: done, to_index: 1}
"#,
    )
    .unwrap();

    let output = taskflow()
        .arg("replay")
        .arg(&path)
        .arg(&script)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let report: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let resolutions = report["resolutions"].as_array().unwrap();
    assert_eq!(resolutions.len(), 2);
    assert_eq!(resolutions[0]["resolution"], "confirmed");
    assert_eq!(resolutions[1]["resolution"], "rolled_back");
    assert_eq!(resolutions[1]["error"]["kind"], "rejected");

    let tasks = report["board"]["tasks"].as_array().unwrap();
    let column_of = |id: &str| {
        tasks
            .iter()
            .find(|t| t["id"] == id)
            .map(|t| t["column_id"].clone())
            .unwrap()
    };
    assert_eq!(column_of("t1"), "done");
    assert_eq!(column_of("t2"), "todo");
}

#[test]
fn test_replay_rejects_bad_config() {
    let dir = TempDir::new().unwrap();
    let path = write_snapshot(dir.path(), "board.json");
    let script = dir.path().join("script.json");
    fs::write(&script, "[]").unwrap();
    let config = dir.path().join("sync.toml");
    fs::write(&config, "persist_timeout_ms = 0\n").unwrap();

    taskflow()
        .arg("replay")
        .arg(&path)
        .arg(&script)
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("persist_timeout_ms"));
}
