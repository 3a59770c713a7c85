//! Stop-and-wait transport.
//!
//! At most one datagram is in flight at a time. A reliable send transmits
//! (unless the loss simulator eats the attempt), then waits up to the ACK
//! timeout for an acknowledgement with the matching sequence number,
//! retrying up to the attempt limit.
//!
//! The daemon socket has exactly one reader: the peer listener. While a
//! reliable send is waiting, it opens a window on the [`AckRouter`] and the
//! listener diverts every decoded datagram into it; whatever the window
//! consumes that is not the matching ACK is dropped. This replaces the
//! socket-timeout juggling a two-reader design would need.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use simp_shared::config::DaemonConfig;
use simp_shared::proto::{Datagram, Operation};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::session::{Session, REASON_TIMEOUT};

/// Result of a reliable send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The peer acknowledged the datagram.
    Acked,
    /// Every attempt went unanswered; the session has been reset.
    TimedOut,
}

/// Rendezvous point between the peer listener and a waiting reliable send.
#[derive(Debug, Default)]
pub struct AckRouter {
    slot: Mutex<Option<mpsc::UnboundedSender<Datagram>>>,
}

impl AckRouter {
    /// Offers a datagram to the open window, if any. Returns the datagram
    /// back when no window is open so the caller can dispatch it normally.
    pub fn route(&self, dgram: Datagram) -> Option<Datagram> {
        let mut slot = self.slot.lock().expect("ack router lock poisoned");
        match slot.as_ref() {
            Some(tx) => match tx.send(dgram) {
                Ok(()) => None,
                Err(mpsc::error::SendError(dgram)) => {
                    *slot = None;
                    Some(dgram)
                }
            },
            None => Some(dgram),
        }
    }

    fn open_window(self: &Arc<Self>) -> AckWindow {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.slot.lock().expect("ack router lock poisoned") = Some(tx);
        AckWindow {
            router: self.clone(),
            rx,
        }
    }
}

/// Receive side of an open ACK window. Closes the window on drop.
struct AckWindow {
    router: Arc<AckRouter>,
    rx: mpsc::UnboundedReceiver<Datagram>,
}

impl AckWindow {
    async fn recv(&mut self) -> Option<Datagram> {
        self.rx.recv().await
    }
}

impl Drop for AckWindow {
    fn drop(&mut self) {
        *self.router.slot.lock().expect("ack router lock poisoned") = None;
    }
}

/// Sends SIMP datagrams on the shared daemon socket.
#[derive(Debug)]
pub struct Transport {
    socket: Arc<UdpSocket>,
    router: Arc<AckRouter>,
    drop_probability: f64,
    max_retries: u32,
    ack_timeout: Duration,
}

impl Transport {
    pub fn new(socket: Arc<UdpSocket>, cfg: &DaemonConfig) -> Self {
        Self {
            socket,
            router: Arc::new(AckRouter::default()),
            drop_probability: cfg.drop_probability,
            max_retries: cfg.max_retries,
            ack_timeout: Duration::from_millis(cfg.ack_timeout_ms),
        }
    }

    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }

    pub fn router(&self) -> Arc<AckRouter> {
        self.router.clone()
    }

    /// Fire-and-forget send. SYN and ACK go out this way; the loss simulator
    /// only applies to retransmitting sends.
    pub async fn send_plain(&self, dgram: &Datagram, peer: SocketAddr) -> anyhow::Result<()> {
        let bytes = dgram.encode().context("encode datagram")?;
        self.socket
            .send_to(&bytes, peer)
            .await
            .context("udp send")?;
        debug!(%peer, datagram = %dgram, "Sent datagram");
        Ok(())
    }

    /// Sends with retransmission and waits for the matching ACK.
    ///
    /// `skip_seq_check` accepts any ACK; it is used for unsolicited replies
    /// (rejecting a stranger's SYN) where our counters do not apply, and a
    /// send under it never toggles them.
    ///
    /// On timeout this runs the failure path before returning: best-effort
    /// FINERR to the current remote, session reset to Idle, client notified.
    pub async fn send_reliable(
        &self,
        session: &mut Session,
        dgram: Datagram,
        peer: SocketAddr,
        skip_seq_check: bool,
    ) -> anyhow::Result<SendOutcome> {
        if self.send_with_retries(&dgram, peer, skip_seq_check).await? {
            if !skip_seq_check {
                session.toggle_seqs();
            }
            return Ok(SendOutcome::Acked);
        }

        warn!(
            %peer,
            attempts = self.max_retries,
            datagram = %dgram,
            "No ACK received, giving up"
        );
        self.recover_from_timeout(session).await?;
        Ok(SendOutcome::TimedOut)
    }

    async fn send_with_retries(
        &self,
        dgram: &Datagram,
        peer: SocketAddr,
        skip_seq_check: bool,
    ) -> anyhow::Result<bool> {
        let bytes = dgram.encode().context("encode datagram")?;
        let mut window = self.router.open_window();

        for attempt in 1..=self.max_retries {
            if rand::random::<f64>() < self.drop_probability {
                debug!(%peer, attempt, "Loss simulation dropped the transmit");
            } else {
                self.socket
                    .send_to(&bytes, peer)
                    .await
                    .context("udp send")?;
                debug!(%peer, attempt, datagram = %dgram, "Sent datagram, awaiting ACK");
            }

            let deadline = Instant::now() + self.ack_timeout;
            loop {
                match time::timeout_at(deadline, window.recv()).await {
                    Ok(Some(received)) => {
                        if received.op == Operation::Ack
                            && (skip_seq_check || received.seq == dgram.seq)
                        {
                            return Ok(true);
                        }
                        // Not our ACK; it stays consumed by the window.
                        debug!(datagram = %received, "Ignoring datagram inside ACK window");
                    }
                    Ok(None) => anyhow::bail!("ack router channel closed"),
                    Err(_) => break,
                }
            }
            debug!(%peer, attempt, "ACK window expired");
        }
        Ok(false)
    }

    /// Failure path after an exhausted send: tell the current remote the
    /// session is over, reset to Idle, tell the client. The FINERR itself is
    /// bounded; a second timeout here just gives up.
    async fn recover_from_timeout(&self, session: &mut Session) -> anyhow::Result<()> {
        if let Some(peer) = session.current_peer() {
            let finerr = Datagram::control_reason(
                Operation::FinErr,
                session.send_seq,
                session.sender_name(),
                REASON_TIMEOUT,
            );
            match self.send_with_retries(&finerr, peer, false).await {
                Ok(true) => {}
                Ok(false) => warn!(%peer, "Timeout FINERR went unacknowledged"),
                Err(e) => warn!(%peer, error = %e, "Failed to send timeout FINERR"),
            }
        }
        session.reset_to_idle();
        session.notify_client(REASON_TIMEOUT);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simp_shared::proto::MessageKind;

    fn ack(seq: u8) -> Datagram {
        Datagram::control(Operation::Ack, seq, "peer")
    }

    #[test]
    fn router_passes_through_without_window() {
        let router = AckRouter::default();
        let d = ack(0x00);
        assert_eq!(router.route(d.clone()), Some(d));
    }

    #[tokio::test]
    async fn router_diverts_into_open_window() {
        let router = Arc::new(AckRouter::default());
        let mut window = router.open_window();
        assert_eq!(router.route(ack(0x01)), None);
        let received = window.recv().await.unwrap();
        assert_eq!(received.op, Operation::Ack);
        assert_eq!(received.seq, 0x01);
    }

    #[tokio::test]
    async fn closed_window_restores_passthrough() {
        let router = Arc::new(AckRouter::default());
        {
            let _window = router.open_window();
            assert_eq!(router.route(ack(0x00)), None);
        }
        let d = Datagram::chat(0x00, "peer", "hi");
        let back = router.route(d.clone()).unwrap();
        assert_eq!(back.kind, MessageKind::Chat);
        assert_eq!(back, d);
    }
}
