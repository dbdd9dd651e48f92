//! PharmaDesk Realtime CLI - follows dashboard notifications from a terminal.
//!
//! This is the main binary entry point. See the `pharmadesk_realtime`
//! library for the core functionality.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use pharmadesk_realtime::{commands, env::Environment, Config, Role};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Version of this binary.
const VERSION: &str = env!("CARGO_PKG_VERSION");

// CLI
#[derive(Parser)]
#[command(name = "pharmadesk-realtime")]
#[command(version = VERSION)]
#[command(about = "Real-time notification and unread-count client for PharmaDesk")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the hubs and print counter changes until Ctrl-C
    Listen {
        /// Id of the logged-in user (messages from this id are not counted)
        #[arg(long)]
        user_id: String,
        /// Role of the logged-in user (admin, pharmacy, user)
        #[arg(long)]
        role: Option<Role>,
        /// Pharmacy id the user acts for (its messages are not counted either)
        #[arg(long)]
        pharmacy_id: Option<String>,
    },
    /// List notifications and the unread count
    Notifications,
    /// Mark every notification as read
    MarkAllRead,
    /// Print the effective configuration (token redacted)
    Config,
}

fn main() -> Result<()> {
    let environment = Environment::current();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(environment.default_log_filter()),
    )
    .format_timestamp_secs()
    .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    log::debug!("PharmaDesk Realtime v{} ({})", VERSION, environment);

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config.redacted())?);
            println!("token: {}", if config.has_token() { "set" } else { "not set" });
        }
        command => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to start Tokio runtime")?;
            runtime.block_on(run_async(command, &config))?;
        }
    }

    Ok(())
}

async fn run_async(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Listen {
            user_id,
            role,
            pharmacy_id,
        } => commands::listen::run(config, &user_id, role, pharmacy_id.as_deref()).await,
        Commands::Notifications => commands::notifications::list(config).await,
        Commands::MarkAllRead => commands::notifications::mark_all_read(config).await,
        Commands::Config => Ok(()),
    }
}
