//! Session state machine.
//!
//! One daemon holds exactly one session: the state of its current chat, the
//! alternating-bit sequence counters, and the handle to the attached client.
//! All mutation happens under the session mutex; datagrams from the peer
//! listener are dispatched here one at a time.
//!
//! Toggle discipline: `send_seq` and `expected_seq` flip together, at exactly
//! two call sites. The transport toggles after a successfully ACKed send;
//! this module toggles after a successfully ACKed receive (SYNACK on the
//! initiator, CHAT in chat). Nothing else touches the counters except the
//! reset to Idle.

use std::net::SocketAddr;

use simp_shared::proto::{toggle_seq, Datagram, MessageKind, Operation};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::daemon::DaemonCtx;

/// User name stamped on datagrams the daemon sends on its own behalf,
/// before a client has attached.
pub const DAEMON_USER: &str = "DAEMON";

/// FINERR reason for a SYN arriving while no client is attached.
pub const REASON_NO_CLIENT: &str = "No client is connected to the daemon.";

/// FINERR reason for a SYN arriving while the session is busy.
pub const REASON_BUSY: &str = "User already in chat, or has pending invitation.";

/// FINERR reason sent when the client rejects an invitation.
pub const REASON_REJECTED: &str = "Chat invitation rejected.";

/// FINERR reason and client notification for a retransmission timeout.
pub const REASON_TIMEOUT: &str = "Connection timed out, exiting chat... :(";

/// Where the session is in the chat lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No chat, no invitation.
    Idle,
    /// We sent a SYN and are passively waiting for SYNACK or FINERR.
    Inviting { peer: SocketAddr },
    /// A peer sent us a SYN; waiting for the client to ACCEPT or REJECT.
    /// `syn_seq` is echoed in the SYNACK or the rejection FINERR.
    Invited {
        peer: SocketAddr,
        peer_user: String,
        syn_seq: u8,
    },
    /// Chat established with `peer`.
    Chatting { peer: SocketAddr, peer_user: String },
}

/// Enqueue-side handle to the attached client's writer task.
///
/// Writes are serialized by the channel; any component may notify the client
/// without owning the TCP stream.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub addr: SocketAddr,
    tx: mpsc::UnboundedSender<String>,
}

impl ClientHandle {
    pub fn new(addr: SocketAddr, tx: mpsc::UnboundedSender<String>) -> Self {
        Self { addr, tx }
    }

    pub fn send(&self, line: &str) {
        if self.tx.send(line.to_string()).is_err() {
            debug!(addr = %self.addr, "Client writer gone, dropping notification");
        }
    }
}

/// The daemon's single chat session.
#[derive(Debug)]
pub struct Session {
    pub state: SessionState,
    /// Set when the client attaches; cleared when it detaches.
    pub username: Option<String>,
    /// Sequence stamped on our next reliable send.
    pub send_seq: u8,
    /// Sequence we require on the next non-SYN datagram from the peer.
    pub expected_seq: u8,
    /// Attached client, if any.
    pub client: Option<ClientHandle>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            username: None,
            send_seq: 0x00,
            expected_seq: 0x00,
            client: None,
        }
    }

    pub fn client_attached(&self) -> bool {
        self.client.is_some()
    }

    /// Name stamped on outgoing datagrams.
    pub fn sender_name(&self) -> &str {
        self.username.as_deref().unwrap_or(DAEMON_USER)
    }

    /// The remote this session is currently engaged with, if any.
    pub fn current_peer(&self) -> Option<SocketAddr> {
        match &self.state {
            SessionState::Idle => None,
            SessionState::Inviting { peer }
            | SessionState::Invited { peer, .. }
            | SessionState::Chatting { peer, .. } => Some(*peer),
        }
    }

    /// Flips both alternating-bit counters.
    pub fn toggle_seqs(&mut self) {
        self.send_seq = toggle_seq(self.send_seq);
        self.expected_seq = toggle_seq(self.expected_seq);
    }

    /// Back to Idle with both counters at 0x00. Keeps the client attached.
    pub fn reset_to_idle(&mut self) {
        self.state = SessionState::Idle;
        self.send_seq = 0x00;
        self.expected_seq = 0x00;
    }

    /// Enqueues a line to the attached client, if any.
    pub fn notify_client(&self, line: &str) {
        match &self.client {
            Some(client) => client.send(line),
            None => debug!(line, "No client attached, dropping notification"),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Handles one datagram from the peer listener.
pub async fn handle_datagram(ctx: &DaemonCtx, dgram: Datagram, addr: SocketAddr) {
    let mut session = ctx.session.lock().await;

    // SYN is exempt: a fresh peer cannot know our counter state.
    if dgram.op != Operation::Syn && dgram.seq != session.expected_seq {
        debug!(
            peer = %addr,
            seq = dgram.seq,
            expected = session.expected_seq,
            "Dropping out-of-sequence datagram"
        );
        return;
    }

    let result = match (dgram.kind, dgram.op) {
        (MessageKind::Chat, _) => handle_chat(ctx, &mut session, dgram, addr).await,
        (MessageKind::Control, Operation::Syn) => {
            handle_syn(ctx, &mut session, dgram, addr).await
        }
        (MessageKind::Control, Operation::SynAck) => {
            handle_synack(ctx, &mut session, dgram, addr).await
        }
        (MessageKind::Control, Operation::Fin) => handle_fin(ctx, &mut session, dgram, addr).await,
        (MessageKind::Control, Operation::FinErr) => {
            handle_finerr(ctx, &mut session, dgram, addr).await
        }
        (MessageKind::Control, Operation::Err) => {
            warn!(peer = %addr, reason = %dgram.payload, "Peer reported an error");
            send_ack(ctx, &session, addr, dgram.seq).await
        }
        (MessageKind::Control, Operation::Ack) => {
            // ACKs are normally consumed by an open send window; one landing
            // here arrived after the window closed.
            debug!(peer = %addr, seq = dgram.seq, "Stray ACK outside any send window");
            Ok(())
        }
    };

    if let Err(e) = result {
        warn!(peer = %addr, error = %e, "Failed to handle datagram");
    }
}

async fn handle_syn(
    ctx: &DaemonCtx,
    session: &mut Session,
    dgram: Datagram,
    addr: SocketAddr,
) -> anyhow::Result<()> {
    if session.state != SessionState::Idle {
        let user = session.sender_name().to_string();
        let reply = Datagram::control_reason(Operation::FinErr, dgram.seq, &user, REASON_BUSY);
        info!(peer = %addr, user = %dgram.user, "Rejecting SYN while busy");
        ctx.transport
            .send_reliable(session, reply, addr, true)
            .await?;
        session.notify_client(&format!(
            "User {} tried to start a chat, but was automatically rejected.",
            dgram.user
        ));
        return Ok(());
    }

    if !session.client_attached() {
        let reply =
            Datagram::control_reason(Operation::FinErr, dgram.seq, DAEMON_USER, REASON_NO_CLIENT);
        info!(peer = %addr, user = %dgram.user, "Rejecting SYN, no client attached");
        ctx.transport
            .send_reliable(session, reply, addr, true)
            .await?;
        return Ok(());
    }

    info!(peer = %addr, user = %dgram.user, "Chat invitation received");
    session.notify_client(&format!(
        "CONNECT User {} wants to start a chat.",
        dgram.user
    ));
    session.state = SessionState::Invited {
        peer: addr,
        peer_user: dgram.user,
        syn_seq: dgram.seq,
    };
    Ok(())
}

async fn handle_synack(
    ctx: &DaemonCtx,
    session: &mut Session,
    dgram: Datagram,
    addr: SocketAddr,
) -> anyhow::Result<()> {
    if !matches!(session.state, SessionState::Inviting { .. }) {
        debug!(peer = %addr, "SYNACK outside Inviting, dropping");
        return Ok(());
    }

    info!(peer = %addr, user = %dgram.user, "Invitation accepted, chat established");
    session.notify_client(&format!("Chat connection established with {}.", dgram.user));
    session.state = SessionState::Chatting {
        peer: addr,
        peer_user: dgram.user,
    };
    send_ack(ctx, session, addr, dgram.seq).await?;
    session.toggle_seqs();
    Ok(())
}

async fn handle_fin(
    ctx: &DaemonCtx,
    session: &mut Session,
    dgram: Datagram,
    addr: SocketAddr,
) -> anyhow::Result<()> {
    if !matches!(session.state, SessionState::Chatting { .. }) {
        debug!(peer = %addr, "FIN outside chat, dropping");
        return Ok(());
    }

    info!(peer = %addr, user = %dgram.user, "Peer ended the chat");
    send_ack(ctx, session, addr, dgram.seq).await?;
    session.notify_client(&format!("!! User {} ended the chat. !!", dgram.user));
    session.reset_to_idle();
    Ok(())
}

async fn handle_finerr(
    ctx: &DaemonCtx,
    session: &mut Session,
    dgram: Datagram,
    addr: SocketAddr,
) -> anyhow::Result<()> {
    match session.state {
        SessionState::Inviting { .. } | SessionState::Chatting { .. } => {}
        _ => {
            debug!(peer = %addr, reason = %dgram.payload, "FINERR outside chat or invite, dropping");
            return Ok(());
        }
    }

    info!(peer = %addr, reason = %dgram.payload, "Peer closed the session");
    send_ack(ctx, session, addr, dgram.seq).await?;
    session.notify_client(&format!(
        "Connection could not be established: {}.",
        dgram.payload
    ));
    session.reset_to_idle();
    Ok(())
}

async fn handle_chat(
    ctx: &DaemonCtx,
    session: &mut Session,
    dgram: Datagram,
    addr: SocketAddr,
) -> anyhow::Result<()> {
    if !matches!(session.state, SessionState::Chatting { .. }) {
        debug!(peer = %addr, "Chat datagram outside chat, dropping");
        return Ok(());
    }

    send_ack(ctx, session, addr, dgram.seq).await?;
    session.notify_client(&format!("CHAT {} {}", dgram.user, dgram.payload));
    session.toggle_seqs();
    Ok(())
}

async fn send_ack(
    ctx: &DaemonCtx,
    session: &Session,
    addr: SocketAddr,
    seq: u8,
) -> anyhow::Result<()> {
    ctx.transport
        .send_plain(
            &Datagram::control(Operation::Ack, seq, session.sender_name()),
            addr,
        )
        .await
}
