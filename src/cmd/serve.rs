//! Board server commands: `ideaboard serve` and `ideaboard init-db`.

use anyhow::{Context, Result};
use std::path::Path;

use ideaboard::board::db::BoardDb;
use ideaboard::config::AppConfig;

/// CLI flags that override the resolved configuration.
#[derive(Debug, Default)]
pub struct ServeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db_path: Option<std::path::PathBuf>,
    pub dev: bool,
}

impl ServeOverrides {
    fn apply(self, config: &mut AppConfig) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(db_path) = self.db_path {
            config.server.db_path = db_path;
        }
        if self.dev {
            config.server.dev_mode = true;
        }
    }
}

pub async fn cmd_serve(config_path: &Path, overrides: ServeOverrides) -> Result<()> {
    let mut config = AppConfig::resolve(config_path)?;
    overrides.apply(&mut config);

    for problem in config.validate() {
        tracing::warn!(%problem, "Configuration problem");
    }

    ideaboard::board::server::start_server(config).await
}

pub fn cmd_init_db(config_path: &Path, db_path: Option<std::path::PathBuf>) -> Result<()> {
    let mut config = AppConfig::resolve(config_path)?;
    if let Some(path) = db_path {
        config.server.db_path = path;
    }
    let db_path = &config.server.db_path;

    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    BoardDb::new(db_path)?;
    println!("Board database initialized at {}", db_path.display());
    Ok(())
}
