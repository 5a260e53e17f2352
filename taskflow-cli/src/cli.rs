use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "taskflow")]
#[command(version)]
#[command(about = "Inspect, reorder and replay kanban board snapshots")]
#[command(long_about = "
taskflow works on board snapshot files: one board with all of its columns
and tasks, stored as JSON or YAML (chosen by file extension).

Example usage:
  taskflow show board.yaml
  taskflow move board.yaml --task t1 --column done --index 0
  taskflow move board.yaml --task t1 --column done --index 0 --write
  taskflow replay board.json script.yaml --config sync.toml
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the columns and tasks of a snapshot in display order
    Show {
        /// Board snapshot file
        snapshot: PathBuf,
    },
    /// Drop a task into a column slot and print the rank changes as JSON
    Move {
        /// Board snapshot file
        snapshot: PathBuf,

        /// Task to move
        #[arg(long)]
        task: String,

        /// Target column
        #[arg(long)]
        column: String,

        /// Target index, counted without the moved task
        #[arg(long)]
        index: usize,

        /// Save the reordered board back to the snapshot file
        #[arg(long)]
        write: bool,
    },
    /// Run a script of drops, injected failures and remote edits against an
    /// in-memory store seeded from a snapshot
    Replay {
        /// Board snapshot file
        snapshot: PathBuf,

        /// Script file: a list of steps
        script: PathBuf,

        /// Sync configuration file (TOML, YAML or JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}
