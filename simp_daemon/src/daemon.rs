//! Daemon supervisor.
//!
//! Binds both sockets, owns the process-wide session state, and runs the
//! three long-lived activities: the peer listener (sole UDP reader), the
//! session-dispatch task, and the client accept loop. Failing to bind either
//! socket is the only fatal error; everything after startup is recoverable.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use simp_shared::config::DaemonConfig;
use simp_shared::proto::Datagram;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

use crate::session::Session;
use crate::transport::Transport;
use crate::{client_channel, peer, session};

/// State shared by every daemon activity.
#[derive(Debug)]
pub struct DaemonCtx {
    pub cfg: DaemonConfig,
    /// The single session; the mutex serializes all mutation.
    pub session: Mutex<Session>,
    pub transport: Transport,
    /// Set once at shutdown; the 1 s-bounded loops poll it.
    pub shutdown: AtomicBool,
    /// Whether a client ever attached; only suppresses the shutdown log
    /// lines when the daemon exits without having served anyone.
    pub client_ever_attached: AtomicBool,
}

/// A bound, not-yet-running daemon.
pub struct Daemon {
    ctx: Arc<DaemonCtx>,
    client_listener: TcpListener,
    peer_addr: SocketAddr,
    client_addr: SocketAddr,
}

impl Daemon {
    /// Binds the UDP peer socket and the TCP client listener.
    pub async fn bind(cfg: DaemonConfig) -> anyhow::Result<Self> {
        let peer_bind: SocketAddr = format!("{}:{}", cfg.host, cfg.peer_port)
            .parse()
            .context("parse peer bind address")?;
        let socket = UdpSocket::bind(peer_bind).await.context("udp bind")?;
        let peer_addr = socket.local_addr().context("udp local_addr")?;

        let client_bind: SocketAddr = format!("{}:{}", cfg.host, cfg.client_port)
            .parse()
            .context("parse client bind address")?;
        let client_listener = TcpListener::bind(client_bind).await.context("tcp bind")?;
        let client_addr = client_listener.local_addr().context("tcp local_addr")?;

        let transport = Transport::new(Arc::new(socket), &cfg);
        let ctx = Arc::new(DaemonCtx {
            cfg,
            session: Mutex::new(Session::new()),
            transport,
            shutdown: AtomicBool::new(false),
            client_ever_attached: AtomicBool::new(false),
        });

        Ok(Self {
            ctx,
            client_listener,
            peer_addr,
            client_addr,
        })
    }

    /// Address of the UDP peer socket.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Address of the TCP client listener.
    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    pub fn ctx(&self) -> &DaemonCtx {
        &self.ctx
    }

    /// Spawns the daemon activities.
    pub fn start(self) -> DaemonHandle {
        info!(peer = %self.peer_addr, "Listening for peer datagrams");
        info!(client = %self.client_addr, "Waiting for client connection");

        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let tasks = vec![
            tokio::spawn(peer::run_peer_listener(self.ctx.clone(), dispatch_tx)),
            tokio::spawn(run_dispatch(self.ctx.clone(), dispatch_rx)),
            tokio::spawn(client_channel::run_client_listener(
                self.ctx.clone(),
                self.client_listener,
            )),
        ];

        DaemonHandle {
            ctx: self.ctx,
            peer_addr: self.peer_addr,
            client_addr: self.client_addr,
            tasks,
        }
    }

    /// Runs until interrupted, then shuts down cleanly.
    pub async fn run(self) -> anyhow::Result<()> {
        let handle = self.start();
        tokio::signal::ctrl_c()
            .await
            .context("install ctrl-c handler")?;
        info!("Interrupt received, shutting down");
        handle.shutdown().await;
        Ok(())
    }
}

/// Handle to a running daemon.
pub struct DaemonHandle {
    ctx: Arc<DaemonCtx>,
    pub peer_addr: SocketAddr,
    pub client_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl DaemonHandle {
    pub fn ctx(&self) -> &DaemonCtx {
        &self.ctx
    }

    /// Signals shutdown and joins the daemon activities.
    pub async fn shutdown(self) {
        self.ctx.shutdown.store(true, Ordering::Relaxed);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Feeds datagrams the ACK router did not consume into the state machine,
/// one at a time.
async fn run_dispatch(
    ctx: Arc<DaemonCtx>,
    mut rx: mpsc::UnboundedReceiver<(Datagram, SocketAddr)>,
) {
    while let Some((dgram, addr)) = rx.recv().await {
        session::handle_datagram(&ctx, dgram, addr).await;
    }
}

/// Test helper: both sockets on ephemeral localhost ports, loss simulation
/// off, short ACK windows.
pub async fn bind_ephemeral() -> anyhow::Result<Daemon> {
    Daemon::bind(DaemonConfig {
        host: "127.0.0.1".to_string(),
        peer_port: 0,
        client_port: 0,
        drop_probability: 0.0,
        max_retries: 3,
        ack_timeout_ms: 250,
    })
    .await
}
