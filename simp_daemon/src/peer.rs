//! Peer listener: the daemon socket's only reader.
//!
//! Receives SIMP datagrams from remote daemons, drops malformed ones, offers
//! the rest to the transport's ACK router, and forwards whatever the router
//! does not consume to the session-dispatch task.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use simp_shared::proto::Datagram;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, warn};

use crate::daemon::DaemonCtx;

/// Receive timeout; each expiry re-checks the shutdown flag.
const RECV_POLL: Duration = Duration::from_secs(1);

/// Largest datagram the daemon will read in one receive.
const MAX_DATAGRAM: usize = 64 * 1024;

pub async fn run_peer_listener(
    ctx: Arc<DaemonCtx>,
    dispatch_tx: mpsc::UnboundedSender<(Datagram, SocketAddr)>,
) {
    let socket = ctx.transport.socket();
    let router = ctx.transport.router();
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        if ctx.shutdown.load(Ordering::Relaxed) {
            break;
        }
        match time::timeout(RECV_POLL, socket.recv_from(&mut buf)).await {
            Err(_) => continue,
            Ok(Err(e)) => {
                warn!(error = %e, "UDP receive failed, stopping peer listener");
                break;
            }
            Ok(Ok((n, addr))) => {
                let dgram = match Datagram::decode(&buf[..n]) {
                    Ok(d) => d,
                    Err(e) => {
                        warn!(peer = %addr, error = %e, "Dropping malformed datagram");
                        continue;
                    }
                };
                debug!(peer = %addr, datagram = %dgram, "Received datagram");
                if let Some(dgram) = router.route(dgram) {
                    if dispatch_tx.send((dgram, addr)).is_err() {
                        break;
                    }
                }
            }
        }
    }

    if ctx.client_ever_attached.load(Ordering::Relaxed) {
        info!("Peer listener shut down");
    }
}
