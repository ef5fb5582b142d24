//! Headless cube duel: host or join a match from the terminal.
//!
//! ```text
//! cube-duel host
//! cube-duel join 192.168.1.20
//! ```
//!
//! While running, type `restart`, `push`, `status` or `quit`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cubeclash::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cube-duel", about = "Two-player cube arena over the LAN")]
struct Cli {
    /// TOML file overriding the default session settings.
    #[arg(long, env = "CUBE_DUEL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Host a match and wait for an opponent.
    Host {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Join a host by its IPv4 address.
    Join {
        address: String,
        #[arg(long)]
        port: Option<u16>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<ContextConfig, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(ContextConfig::default());
    };
    let text = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&text)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;
    if let Mode::Host { port: Some(port) } | Mode::Join { port: Some(port), .. } = &cli.mode {
        config.session.port = *port;
    }

    let binding = WebSocketBinding::new(WebSocketConfig {
        retry_interval: config.session.connect_retry_interval,
        ..WebSocketConfig::default()
    });
    let handle = spawn_session(config, binding, TracingPresentation, NoInput);

    match &cli.mode {
        Mode::Host { .. } => {
            let endpoint = handle.host().await?;
            eprintln!("hosting on {endpoint}, waiting for an opponent");
        }
        Mode::Join { address, .. } => handle.join(address.as_str()).await?,
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        let result = match line.trim() {
            "" => Ok(()),
            "restart" => handle.restart().await,
            "push" => handle.push().await,
            "status" => handle.snapshot().await.map(|snapshot| {
                eprintln!("{} ({} avatars)", snapshot.phase(), snapshot.entities.len());
                for avatar in &snapshot.entities {
                    eprintln!("  {} {} at {}", avatar.id, avatar.role, avatar.transform.position);
                }
            }),
            "quit" | "exit" => break,
            other => {
                eprintln!("unknown command {other:?}, try restart, push, status or quit");
                Ok(())
            }
        };
        if let Err(error) = result {
            tracing::warn!(%error, "command failed");
        }
    }

    handle.quit().await?;
    Ok(())
}
