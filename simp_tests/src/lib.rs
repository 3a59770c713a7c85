//! Support helpers for the SIMP integration suite.

use std::time::Duration;

use anyhow::Context;
use simp_client::ChatClient;
use simp_daemon::daemon::{bind_ephemeral, Daemon, DaemonHandle};
use simp_shared::config::DaemonConfig;

/// Upper bound for any single expected notification.
pub const WAIT: Duration = Duration::from_secs(5);

/// Installs the test log subscriber (idempotent).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// A running daemon on ephemeral localhost ports with loss disabled.
pub async fn spawn_daemon() -> anyhow::Result<DaemonHandle> {
    Ok(bind_ephemeral().await.context("bind daemon")?.start())
}

/// A running daemon with a custom configuration (ports are forced
/// ephemeral).
pub async fn spawn_daemon_with(cfg: DaemonConfig) -> anyhow::Result<DaemonHandle> {
    let cfg = DaemonConfig {
        host: "127.0.0.1".to_string(),
        peer_port: 0,
        client_port: 0,
        ..cfg
    };
    Ok(Daemon::bind(cfg).await.context("bind daemon")?.start())
}

/// Connects a client to the daemon and logs in.
pub async fn attach_client(daemon: &DaemonHandle, username: &str) -> anyhow::Result<ChatClient> {
    let mut client = ChatClient::connect(daemon.client_addr)
        .await
        .context("connect client")?;
    client.login(username).await.context("login")?;
    Ok(client)
}

/// Connects a client, retrying while the previous attachment drains.
pub async fn attach_client_retry(
    daemon: &DaemonHandle,
    username: &str,
) -> anyhow::Result<ChatClient> {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        match ChatClient::connect(daemon.client_addr).await {
            Ok(mut client) => {
                client.login(username).await.context("login")?;
                return Ok(client);
            }
            Err(e) if tokio::time::Instant::now() < deadline => {
                tracing::debug!(error = %e, "Retrying client attach");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(e) => return Err(e).context("client attach never succeeded"),
        }
    }
}

/// Reads the next notification, failing the test if none arrives in time.
pub async fn expect_line(client: &mut ChatClient) -> anyhow::Result<String> {
    client
        .next_line_timeout(WAIT)
        .await?
        .context("daemon sent no notification in time")
}
