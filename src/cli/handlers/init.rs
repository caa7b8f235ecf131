use std::path::Path;

use crate::cli::commands::InitArgs;
use crate::io::config_io::write_config;
use crate::io::project_io::{self, CANOPY_DIR};

/// Infer a project name from a directory name: hyphens and underscores
/// become spaces, each word capitalized.
fn infer_name(dir_name: &str) -> String {
    dir_name
        .split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn cmd_init(root: &Path, args: InitArgs) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = root.parent()
        && let Ok(parent_root) = project_io::discover_project(parent)
    {
        eprintln!(
            "Note: parent project found at {}/",
            parent_root.join(CANOPY_DIR).display()
        );
    }

    let name = args.name.unwrap_or_else(|| {
        root.file_name()
            .and_then(|n| n.to_str())
            .map(infer_name)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "Untitled".to_string())
    });

    let mut project = project_io::init_project(root, &name)?;
    if args.user.is_some() {
        project.config.project.user = args.user;
        write_config(&project.canopy_dir, &project.config)?;
    }

    println!("Initialized canopy project: {}", name);
    Ok(())
}
