//! Setup and project management: `backforge init`, `backforge project`.

use anyhow::{Context, Result};
use backforge::config::{BackforgeToml, Config};
use backforge::state::StateStore;
use console::style;
use std::path::Path;
use walkdir::WalkDir;

use super::super::ProjectCommands;
use super::open_store;

pub async fn cmd_init(config: &Config) -> Result<()> {
    config.ensure_directories()?;
    let config_path = config.config_path();
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
    } else {
        BackforgeToml::default().save(&config_path)?;
        println!("Created {}", config_path.display());
    }
    open_store(config)?;
    println!("Database ready at {}", config.database_path().display());
    println!();
    println!("Next: backforge project create --name <name>");
    Ok(())
}

pub async fn cmd_project(config: &Config, command: ProjectCommands) -> Result<()> {
    config.ensure_directories()?;
    let store = open_store(config)?;
    match command {
        ProjectCommands::Create { name, description } => {
            let project = store.create_project(&name, &description).await?;
            let dir = project.directory(&config.projects_dir());
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            println!("Created project {}", style(&project.id).bold());
            println!("  name:  {}", project.name);
            println!("  ports: app {}, db {}", project.app_port, project.db_port);
            println!("  dir:   {}", dir.display());
            println!();
            println!("Start with: backforge chat {}", project.id);
        }
        ProjectCommands::List => {
            let projects = store.list_projects().await?;
            if projects.is_empty() {
                println!("No projects yet. Create one with: backforge project create --name <name>");
                return Ok(());
            }
            for project in projects {
                println!(
                    "{}  {:<24} {:<10} :{}",
                    style(&project.id).dim(),
                    project.name,
                    project.status,
                    project.app_port
                );
            }
        }
        ProjectCommands::Show { project_id } => {
            let project = store.get_project(&project_id).await?.with_context(|| {
                format!("Project {project_id} not found")
            })?;
            let dir = project.directory(&config.projects_dir());
            println!("{} {}", style("Project").bold(), project.name);
            println!("  id:          {}", project.id);
            if !project.description.is_empty() {
                println!("  description: {}", project.description);
            }
            println!("  status:      {}", project.status);
            println!("  created:     {}", project.created_at.format("%Y-%m-%d %H:%M"));
            println!("  api:         {}", project.api_url());
            println!("  docs:        {}", project.swagger_url());
            println!("  dir:         {}", dir.display());
            println!("  files:       {}", count_files(&dir));
            if let Some(state) = store.load_state(&project.id).await? {
                println!("  phase:       {}", state.phase);
            }
        }
    }
    Ok(())
}

/// Generated files on disk, ignoring version-control internals.
fn count_files(dir: &Path) -> usize {
    WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}
