//! Configuration view and validation commands: `ideaboard config`.

use anyhow::Result;
use std::path::Path;

use ideaboard::config::AppConfig;

use super::super::ConfigCommands;

pub fn cmd_config(config_path: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let source = if config_path.exists() {
        format!("{}", config_path.display())
    } else {
        "defaults (no config file)".to_string()
    };
    let config = AppConfig::resolve(config_path)?;

    match command {
        None | Some(ConfigCommands::Show) => {
            println!("# Effective configuration from {}", source);
            println!("# Environment overrides applied; secrets redacted.");
            println!();
            print!("{}", config.redacted().to_toml()?);
        }
        Some(ConfigCommands::Validate) => {
            let problems = config.validate();
            if problems.is_empty() {
                println!("Configuration is valid ({}).", source);
            } else {
                println!("Configuration problems ({}):", source);
                for problem in &problems {
                    println!("  - {}", problem);
                }
                anyhow::bail!("{} configuration problem(s) found", problems.len());
            }
        }
    }

    Ok(())
}
