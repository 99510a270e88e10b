// Command-line and environment configuration

use crate::chat::moderation::AdminCredentials;
use anyhow::{bail, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// chatrelay - real-time group chat over WebSockets
#[derive(Debug, Parser)]
#[command(name = "chatrelay")]
#[command(author, version, about, long_about = None)]
pub struct RelayCli {
    /// Address to listen on for HTTP and WebSocket connections
    #[arg(short, long, env = "CHATRELAY_BIND", default_value = "0.0.0.0:3000")]
    pub bind: SocketAddr,

    /// Directory of static assets served to browsers
    #[arg(short, long, env = "CHATRELAY_PUBLIC_DIR", default_value = "public")]
    pub public_dir: PathBuf,

    /// Admin account name
    #[arg(long, env = "CHATRELAY_ADMIN_USERNAME", default_value = "admin")]
    pub admin_username: String,

    /// Admin password. Admin login is disabled when unset.
    #[arg(long, env = "CHATRELAY_ADMIN_PASSWORD", hide_env_values = true)]
    pub admin_password: Option<String>,

    /// Seconds between unconditional roster broadcasts
    #[arg(long, env = "CHATRELAY_PRESENCE_INTERVAL", default_value = "5")]
    pub presence_interval: u64,
}

/// Runtime configuration for a relay instance
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: SocketAddr,
    pub public_dir: PathBuf,
    pub admin_credentials: Option<AdminCredentials>,
    pub presence_interval: Duration,
}

impl RelayConfig {
    /// Create configuration from CLI arguments
    pub fn from_cli(cli: RelayCli) -> Result<Self> {
        if cli.presence_interval == 0 {
            bail!("--presence-interval must be at least 1 second");
        }

        let admin_credentials = match cli.admin_password.as_deref() {
            Some(password) if !password.is_empty() => {
                Some(AdminCredentials::new(&cli.admin_username, password))
            }
            _ => {
                tracing::warn!("No admin password configured; admin login is disabled");
                None
            }
        };

        Ok(Self {
            bind_addr: cli.bind,
            public_dir: cli.public_dir,
            admin_credentials,
            presence_interval: Duration::from_secs(cli.presence_interval),
        })
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], 3000).into(),
            public_dir: PathBuf::from("public"),
            admin_credentials: None,
            presence_interval: Duration::from_secs(5),
        }
    }
}
