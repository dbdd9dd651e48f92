//! CLI subcommand implementations for pharmadesk-realtime.
//!
//! - [`listen`] - Connect to the hubs and follow the dashboard counters
//! - [`notifications`] - List notifications, mark them all read
//!
//! # Usage
//!
//! ```ignore
//! use pharmadesk_realtime::commands;
//!
//! commands::listen::run(&config, "42", Some(Role::Pharmacy), Some("300")).await?;
//! commands::notifications::list(&config).await?;
//! ```

pub mod listen;
pub mod notifications;

use anyhow::Result;

use crate::config::Config;

/// Fail early with a hint when no token is configured.
pub(crate) fn require_token(config: &Config) -> Result<()> {
    if !config.has_token() {
        anyhow::bail!("No token configured. Set PHARMADESK_TOKEN and try again.");
    }
    Ok(())
}
