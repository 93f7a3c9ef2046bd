//! CLI command implementations.
//!
//! | Module    | Commands handled               |
//! |-----------|--------------------------------|
//! | `project` | `Init`, `Project`              |
//! | `chat`    | `Chat`                         |
//! | `state`   | `Status`, `Reset`              |
//! | `config`  | `Config`                       |

pub mod chat;
pub mod config;
pub mod project;
pub mod state;

pub use chat::cmd_chat;
pub use config::cmd_config;
pub use project::{cmd_init, cmd_project};
pub use state::{cmd_reset, cmd_status};

use anyhow::Result;
use backforge::config::Config;
use backforge::state::SqliteStore;

/// Open the configured database, creating it if needed.
pub fn open_store(config: &Config) -> Result<SqliteStore> {
    SqliteStore::open(&config.database_path(), config.ports())
}
