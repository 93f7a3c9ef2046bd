//! Configuration view and validation commands: `backforge config`.

use anyhow::Result;
use backforge::config::Config;

use super::super::ConfigCommands;

pub fn cmd_config(config: &Config, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config.config_path();
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No backforge.toml at {} (using defaults)", config_path.display());
            }
            println!("Data dir:    {}", config.home.display());
            println!();
            // Effective values, env overrides included.
            print!("{}", toml::to_string_pretty(&config.toml)?);
            println!();
            println!(
                "API key ({}): {}",
                config.toml.llm.api_key_env,
                if config.api_key().is_some() { "set" } else { "not set" }
            );
            println!();
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
    }
    Ok(())
}
