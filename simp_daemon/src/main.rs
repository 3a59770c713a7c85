//! SIMP daemon binary.
//!
//! Usage:
//!   daemon <host>
//!
//! Binds the peer socket (UDP 7777) and the client listener (TCP 7778) on
//! `<host>` and serves one chat session until interrupted.

use std::env;

use anyhow::Context;
use simp_daemon::daemon::Daemon;
use simp_shared::config::DaemonConfig;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: daemon <host>");
        std::process::exit(1);
    }

    let cfg = DaemonConfig::for_host(&args[1]);
    info!(
        host = %cfg.host,
        peer_port = cfg.peer_port,
        client_port = cfg.client_port,
        "Starting SIMP daemon"
    );

    let daemon = Daemon::bind(cfg).await.context("bind daemon sockets")?;
    daemon.run().await
}
