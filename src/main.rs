use anyhow::Result;
use backforge::config::{Config, LogFormat};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "backforge")]
#[command(version, about = "Conversational backend generator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Data directory (defaults to $BACKFORGE_HOME or ~/.backforge)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default backforge.toml and create the database
    Init,
    /// Create, list or inspect projects
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Talk to a project's orchestrator. Type /stop to cancel the current step.
    Chat { project_id: String },
    /// Show a project's persisted progress
    Status {
        project_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Discard a project's persisted progress
    Reset {
        project_id: String,
        #[arg(long)]
        force: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ProjectCommands {
    Create {
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    List,
    Show { project_id: String },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    Show,
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.data_dir.clone(), cli.verbose)?;

    let level = if cli.verbose {
        "debug"
    } else {
        config.toml.logging.level.as_str()
    };
    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        config.toml.logging.format
    };
    backforge::telemetry::init_tracing(level, format)?;

    match &cli.command {
        Commands::Init => cmd::cmd_init(&config).await?,
        Commands::Project { command } => cmd::cmd_project(&config, command.clone()).await?,
        Commands::Chat { project_id } => cmd::cmd_chat(&config, project_id).await?,
        Commands::Status { project_id, json } => {
            cmd::cmd_status(&config, project_id, *json).await?
        }
        Commands::Reset { project_id, force } => {
            cmd::cmd_reset(&config, project_id, *force).await?
        }
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
