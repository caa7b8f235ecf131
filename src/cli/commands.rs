use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::model::task::{Origin, TaskStatus};

#[derive(Parser)]
#[command(name = "canopy", about = concat!("canopy v", env!("CARGO_PKG_VERSION"), " - projects, phases and tasks as one tree"), version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Run against a different project directory
    #[arg(short = 'C', long = "project-dir", global = true)]
    pub project_dir: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a canopy project in the current directory
    Init(InitArgs),
    /// Add a project, template or task
    Add(AddArgs),
    /// Show the task tree
    Tree(TreeArgs),
    /// Reorder a task or move it under another parent in the same project
    Mv(MvArgs),
    /// Change a task's status
    Status(StatusArgs),
    /// Delete a task and everything under it
    Rm(RmArgs),
    /// Copy a subtree, e.g. start a project from a template
    Clone(CloneArgs),
    /// Search titles and descriptions by regex
    Search(SearchArgs),
    /// Redraw the tree whenever the task store changes
    Watch(TreeArgs),
}

#[derive(Args)]
pub struct InitArgs {
    /// Project name (default: the directory name)
    #[arg(long)]
    pub name: Option<String>,
    /// Recorded as the creator of new tasks and clones
    #[arg(long)]
    pub user: Option<String>,
}

#[derive(Args)]
pub struct AddArgs {
    /// Title of the new task
    pub title: String,
    /// Parent task id (omit to create a project)
    #[arg(long)]
    pub parent: Option<String>,
    /// Create a template instead of a project (roots only)
    #[arg(long, conflicts_with = "parent")]
    pub template: bool,
    #[arg(long, short = 'd')]
    pub description: Option<String>,
    /// Create the task read-only
    #[arg(long)]
    pub locked: bool,
}

#[derive(Args)]
pub struct TreeArgs {
    /// Only show the subtree under this task
    pub id: Option<String>,
    /// Only show projects or only templates
    #[arg(long)]
    pub origin: Option<Origin>,
}

#[derive(Args)]
pub struct MvArgs {
    /// Task to move
    pub id: String,
    /// New parent (default: the current parent)
    #[arg(long)]
    pub parent: Option<String>,
    /// Index among the destination's children (default: last)
    #[arg(long)]
    pub index: Option<usize>,
    /// Move to the first slot
    #[arg(long, conflicts_with = "index")]
    pub top: bool,
    /// Board column to drop into; also sets the status
    #[arg(long)]
    pub status: Option<TaskStatus>,
}

#[derive(Args)]
pub struct StatusArgs {
    pub id: String,
    /// planning, active, todo, in_progress, blocked, complete
    pub status: TaskStatus,
}

#[derive(Args)]
pub struct RmArgs {
    pub id: String,
}

#[derive(Args)]
pub struct CloneArgs {
    /// Root of the subtree to copy
    pub source: String,
    /// Attach the copy under this task (default: a new root)
    #[arg(long)]
    pub parent: Option<String>,
    /// Make the copy a template instead of a project
    #[arg(long)]
    pub template: bool,
    /// Title for the copied root
    #[arg(long)]
    pub title: Option<String>,
    /// Description for the copied root
    #[arg(long, conflicts_with = "clear_description")]
    pub description: Option<String>,
    #[arg(long)]
    pub clear_description: bool,
    /// Start date for the copied root (YYYY-MM-DD)
    #[arg(long, conflicts_with = "clear_dates")]
    pub start: Option<NaiveDate>,
    /// Due date for the copied root (YYYY-MM-DD)
    #[arg(long, conflicts_with = "clear_dates")]
    pub due: Option<NaiveDate>,
    /// Drop the copied root's start and due dates
    #[arg(long)]
    pub clear_dates: bool,
}

#[derive(Args)]
pub struct SearchArgs {
    /// Regex, matched case-insensitively
    pub pattern: String,
    #[arg(long)]
    pub origin: Option<Origin>,
}
