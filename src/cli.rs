// ABOUTME: Command line interface for the attach client and the bridge server
// Settings resolve as defaults, then the config file, then flags

use crate::config::{AppConfig, ConfigError};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "webterm", version, about = "Attach to container terminals over WebSocket")]
pub struct Cli {
    /// Config file (defaults to ~/.webterm/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Attach this terminal to a container's TTY through a bridge server
    Attach {
        container_id: String,
        #[arg(long)]
        host: Option<String>,
        #[arg(long, short)]
        port: Option<u16>,
    },
    /// Run the bridge server against the local Docker daemon
    Serve {
        /// Address to listen on, e.g. 0.0.0.0:8080
        #[arg(long)]
        bind: Option<String>,
        /// Image for containers created on first connect
        #[arg(long)]
        image: Option<String>,
    },
}

impl Cli {
    pub fn load_config(&self) -> Result<AppConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load_from(path)?,
            None => AppConfig::load()?,
        };
        self.apply_overrides(&mut config);
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut AppConfig) {
        match &self.command {
            Command::Attach { host, port, .. } => {
                if let Some(host) = host {
                    config.client.host.clone_from(host);
                }
                if let Some(port) = port {
                    config.client.port = *port;
                }
            }
            Command::Serve { bind, image } => {
                if let Some(bind) = bind {
                    config.server.bind.clone_from(bind);
                }
                if let Some(image) = image {
                    config.server.image.clone_from(image);
                }
            }
        }
    }

    pub fn is_client(&self) -> bool {
        matches!(self.command, Command::Attach { .. })
    }
}
