//! Persisted progress: `backforge status`, `backforge reset`.

use anyhow::{Context, Result};
use backforge::config::Config;
use backforge::state::StateStore;
use backforge::ui::format_status;

use super::open_store;

pub async fn cmd_status(config: &Config, project_id: &str, json: bool) -> Result<()> {
    let store = open_store(config)?;
    store
        .get_project(project_id)
        .await?
        .with_context(|| format!("Project {project_id} not found"))?;
    let Some(state) = store.load_state(project_id).await? else {
        if json {
            println!("null");
        } else {
            println!("Project {project_id} has no progress yet. Start with: backforge chat {project_id}");
        }
        return Ok(());
    };
    let report = state.status_report();
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", format_status(&report));
    }
    Ok(())
}

pub async fn cmd_reset(config: &Config, project_id: &str, force: bool) -> Result<()> {
    use dialoguer::Confirm;

    let store = open_store(config)?;
    store
        .get_project(project_id)
        .await?
        .with_context(|| format!("Project {project_id} not found"))?;

    if !force {
        let confirm = Confirm::new()
            .with_prompt("This will discard all progress for this project. Are you sure?")
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    if store.delete_state(project_id).await? {
        tracing::info!(project = %project_id, "state reset");
        println!("Reset complete");
    } else {
        println!("Nothing to reset");
    }
    Ok(())
}
