use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cmd;

#[derive(Parser)]
#[command(name = "ideaboard")]
#[command(version, about = "Public idea board with live updates and feedback notifications")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = ideaboard::config::CONFIG_FILE)]
    pub config: PathBuf,

    /// Emit logs as JSON lines (also IDEABOARD_LOG_JSON=1)
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the board HTTP and WebSocket server
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (CORS permissive for a local front-end dev server)
        #[arg(long)]
        dev: bool,
    },
    /// Create the database and apply migrations, then exit
    InitDb {
        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration with secrets redacted
    Show,
    /// Check the configuration for problems
    Validate,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ideaboard=info,warn"));
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr; stdout is reserved for command output.
    if json {
        registry
            .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.log_json || env_flag("IDEABOARD_LOG_JSON"));

    match cli.command {
        Commands::Serve {
            port,
            host,
            db_path,
            dev,
        } => {
            let overrides = cmd::serve::ServeOverrides {
                host,
                port,
                db_path,
                dev,
            };
            cmd::cmd_serve(&cli.config, overrides).await?;
        }
        Commands::InitDb { db_path } => cmd::cmd_init_db(&cli.config, db_path)?,
        Commands::Config { command } => cmd::cmd_config(&cli.config, command)?,
    }

    Ok(())
}
