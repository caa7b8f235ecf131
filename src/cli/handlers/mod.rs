mod init;
pub use init::cmd_init;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::commands::*;
use crate::cli::output::*;
use crate::io::json_store::JsonFileStore;
use crate::io::project_io::{self, Project};
use crate::io::watcher::StoreWatcher;
use crate::model::task::{Origin, TaskId};
use crate::model::tree::{Forest, TreeNode};
use crate::ops::clone::{CloneOverrides, CloneRequest};
use crate::ops::move_plan::DropTarget;
use crate::sync::coordinator::TreeSync;
use crate::sync::guard::Guarded;
use crate::sync::store::NewTask;

type CliResult = Result<(), Box<dyn Error>>;
type Engine = TreeSync<JsonFileStore>;

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub async fn dispatch(cli: Cli) -> CliResult {
    let json = cli.json;
    let start = match &cli.project_dir {
        Some(dir) => std::fs::canonicalize(dir)
            .map_err(|e| format!("cannot resolve -C path '{}': {}", dir, e))?,
        None => std::env::current_dir()?,
    };

    match cli.command {
        Commands::Init(args) => cmd_init(&start, args),
        Commands::Add(args) => cmd_add(&start, args, json).await,
        Commands::Tree(args) => cmd_tree(&start, args, json).await,
        Commands::Mv(args) => cmd_mv(&start, args, json).await,
        Commands::Status(args) => cmd_status(&start, args, json).await,
        Commands::Rm(args) => cmd_rm(&start, args, json).await,
        Commands::Clone(args) => cmd_clone(&start, args, json).await,
        Commands::Search(args) => cmd_search(&start, args, json).await,
        Commands::Watch(args) => cmd_watch(&start, args, json).await,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Find the project above `start` and load its whole forest
async fn open_engine(start: &Path) -> Result<(Project, Engine), Box<dyn Error>> {
    let root = project_io::discover_project(start)?;
    let project = project_io::load_project(&root)?;
    let sync = TreeSync::new(Arc::new(project.open_store()), project.config.engine.clone());
    sync.load_all().await?;
    Ok((project, sync))
}

/// Accept a full id or any unambiguous prefix of one
fn resolve_id(forest: &Forest, raw: &str) -> Result<TaskId, Box<dyn Error>> {
    let exact = TaskId::from(raw);
    if forest.contains(&exact) {
        return Ok(exact);
    }
    let mut matches = Vec::new();
    forest.for_each(&mut |node| {
        if node.task.id.as_str().starts_with(raw) {
            matches.push(node.task.id.clone());
        }
    });
    match matches.len() {
        0 => Err(format!("task not found: {}", raw).into()),
        1 => Ok(matches.remove(0)),
        n => Err(format!("ambiguous id '{}' matches {} tasks", raw, n).into()),
    }
}

fn creator(project: &Project) -> String {
    project
        .config
        .project
        .user
        .clone()
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "canopy".to_string())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_tree(forest: &Forest, args: &TreeArgs, json: bool) -> CliResult {
    if let Some(raw) = &args.id {
        let id = resolve_id(forest, raw)?;
        let node = forest
            .find(&id)
            .ok_or_else(|| format!("task not found: {}", raw))?;
        if json {
            return print_json(node);
        }
        println!("{}", format_task_header(&node.task, forest.level(&id).unwrap_or(0)));
        for line in format_task_tree(node, 0) {
            println!("{}", line);
        }
        return Ok(());
    }

    if json {
        let roots: Vec<&TreeNode> = forest
            .roots
            .iter()
            .filter(|n| args.origin.is_none_or(|o| n.task.origin == o))
            .collect();
        return print_json(&roots);
    }
    let lines = format_forest(forest, args.origin);
    if lines.is_empty() {
        println!("No projects yet. Add one with `canopy add <title>`.");
    }
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_add(start: &Path, args: AddArgs, json: bool) -> CliResult {
    let (project, sync) = open_engine(start).await?;
    let parent_id = args
        .parent
        .as_deref()
        .map(|raw| resolve_id(&sync.forest(), raw))
        .transpose()?;
    let new = NewTask {
        title: args.title,
        parent_id,
        origin: if args.template {
            Origin::Template
        } else {
            Origin::Instance
        },
        description: args.description,
        creator_id: Some(creator(&project)),
        is_locked: args.locked,
    };
    let task = sync.create_task(new).await?;
    if json {
        return print_json(&task);
    }
    println!("{}", format_task_line(&task));
    Ok(())
}

async fn cmd_tree(start: &Path, args: TreeArgs, json: bool) -> CliResult {
    let (_, sync) = open_engine(start).await?;
    print_tree(&sync.forest(), &args, json)
}

async fn cmd_mv(start: &Path, args: MvArgs, json: bool) -> CliResult {
    let (_, sync) = open_engine(start).await?;
    let forest = sync.forest();
    let id = resolve_id(&forest, &args.id)?;
    let task = &forest
        .find(&id)
        .ok_or_else(|| format!("task not found: {}", args.id))?
        .task;
    let parent_id = match &args.parent {
        Some(raw) => Some(resolve_id(&forest, raw)?),
        None => task.parent_id.clone(),
    };
    let target = DropTarget {
        origin: task.origin,
        parent_id,
        status: args.status,
        index: if args.top {
            0
        } else {
            args.index.unwrap_or(usize::MAX)
        },
    };

    let outcome = sync.move_task(&id, &target).await?;
    if json {
        return print_json(&move_to_json(&outcome));
    }
    println!("{}", format_move(&outcome));
    Ok(())
}

async fn cmd_status(start: &Path, args: StatusArgs, json: bool) -> CliResult {
    let (_, sync) = open_engine(start).await?;
    let id = resolve_id(&sync.forest(), &args.id)?;
    let outcome = sync.set_status(&id, args.status).await?;
    if json {
        print_json(&status_to_json(&outcome))?;
    } else {
        for line in format_status(&outcome) {
            println!("{}", line);
        }
    }
    if !outcome.cascade.is_complete() {
        return Err(format!(
            "{} subtasks could not be completed",
            outcome.cascade.failed.len()
        )
        .into());
    }
    Ok(())
}

async fn cmd_rm(start: &Path, args: RmArgs, json: bool) -> CliResult {
    let (_, sync) = open_engine(start).await?;
    let id = resolve_id(&sync.forest(), &args.id)?;
    let removed = sync.delete_task(&id).await?;
    if json {
        return print_json(&RemovedJson { removed: &removed });
    }
    println!("deleted {} ({} tasks)", short_id(&id), removed.len());
    Ok(())
}

async fn cmd_clone(start: &Path, args: CloneArgs, json: bool) -> CliResult {
    let (project, sync) = open_engine(start).await?;
    let forest = sync.forest();
    let source_root_id = resolve_id(&forest, &args.source)?;
    let new_parent_id = args
        .parent
        .as_deref()
        .map(|raw| resolve_id(&forest, raw))
        .transpose()?;

    let overrides = CloneOverrides {
        title: args.title,
        description: if args.clear_description {
            Some(None)
        } else {
            args.description.map(Some)
        },
        start_date: if args.clear_dates {
            Some(None)
        } else {
            args.start.map(Some)
        },
        due_date: if args.clear_dates {
            Some(None)
        } else {
            args.due.map(Some)
        },
    };
    let request = CloneRequest {
        source_root_id,
        new_parent_id,
        new_origin: if args.template {
            Origin::Template
        } else {
            Origin::Instance
        },
        creator_id: creator(&project),
        overrides,
    };

    let summary = sync.clone_subtree(&request).await?;
    if json {
        return print_json(&summary);
    }
    println!("{}", format_clone(&summary));
    Ok(())
}

async fn cmd_search(start: &Path, args: SearchArgs, json: bool) -> CliResult {
    let (_, sync) = open_engine(start).await?;
    let Guarded::Current(hits) = sync.search(&args.pattern, args.origin).await? else {
        return Ok(());
    };
    if json {
        return print_json(&hits);
    }
    let forest = sync.forest();
    for task in &hits {
        let project = forest
            .find(&task.root_id)
            .map(|n| n.task.title.as_str())
            .unwrap_or("?");
        println!("[{}] {}", project, format_task_line(task));
    }
    Ok(())
}

async fn cmd_watch(start: &Path, args: TreeArgs, json: bool) -> CliResult {
    let (project, sync) = open_engine(start).await?;
    let store_path: PathBuf = project.store_path();
    let mut watcher = StoreWatcher::start(&store_path)?;
    print_tree(&sync.forest(), &args, json)?;

    loop {
        tokio::select! {
            changed = watcher.changed() => {
                if changed.is_none() {
                    break;
                }
                if let Err(e) = sync.reload().await {
                    tracing::warn!(error = %e, "reload failed");
                    continue;
                }
                if !json {
                    println!();
                }
                print_tree(&sync.forest(), &args, json)?;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}
