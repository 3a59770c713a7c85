//! Client control channel.
//!
//! TCP listener for the local client. At most one client is attached at a
//! time; later connections are told so and closed. The admitted client sends
//! newline-terminated commands; notifications flow back through an unbounded
//! channel drained by a per-connection writer task, so any daemon component
//! can enqueue a line without owning the stream.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use simp_shared::config::PEER_PORT;
use simp_shared::control::{Command, GREETING, REJECT_SECOND_CLIENT};
use simp_shared::proto::{Datagram, Operation, USER_FIELD_LEN};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, warn};

use crate::daemon::DaemonCtx;
use crate::session::{ClientHandle, SessionState};
use crate::transport::SendOutcome;

/// Accept/read timeout; each expiry re-checks the shutdown flag.
const POLL: Duration = Duration::from_secs(1);

pub async fn run_client_listener(ctx: Arc<DaemonCtx>, listener: TcpListener) {
    loop {
        if ctx.shutdown.load(Ordering::Relaxed) {
            break;
        }
        match time::timeout(POLL, listener.accept()).await {
            Err(_) => continue,
            Ok(Err(e)) => {
                warn!(error = %e, "TCP accept failed, stopping client listener");
                break;
            }
            Ok(Ok((stream, addr))) => {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_client(&ctx, stream, addr).await {
                        warn!(client = %addr, error = %e, "Client connection ended with error");
                    }
                });
            }
        }
    }

    if ctx.client_ever_attached.load(Ordering::Relaxed) {
        info!("Client listener shut down");
    }
}

async fn serve_client(ctx: &DaemonCtx, stream: TcpStream, addr: SocketAddr) -> anyhow::Result<()> {
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(write_lines(write_half, rx));

    // Admission gate: first connection in wins, held under the session lock.
    // The greeting is enqueued inside the critical section so it is always
    // the first line the client sees.
    let admitted = {
        let mut session = ctx.session.lock().await;
        if session.client_attached() {
            false
        } else {
            session.client = Some(ClientHandle::new(addr, tx.clone()));
            let _ = tx.send(GREETING.to_string());
            true
        }
    };
    if !admitted {
        info!(client = %addr, "Rejected connection, a client is already attached");
        let _ = tx.send(REJECT_SECOND_CLIENT.to_string());
        return Ok(());
    }

    ctx.client_ever_attached.store(true, Ordering::Relaxed);
    info!(client = %addr, "Local SIMP client connected");

    let mut reader = BufReader::new(read_half);
    match next_line(ctx, &mut reader).await? {
        Some(name) if valid_username(&name) => {
            let mut session = ctx.session.lock().await;
            session.username = Some(name.clone());
            info!(client = %addr, username = %name, "Client username set");
        }
        Some(name) => {
            warn!(client = %addr, username = %name, "Invalid username, disconnecting client");
            let _ = tx.send("Invalid username, disconnecting.".to_string());
            teardown(ctx).await;
            return Ok(());
        }
        None => {
            teardown(ctx).await;
            return Ok(());
        }
    }

    let result = command_loop(ctx, &mut reader, &tx).await;
    teardown(ctx).await;
    info!(client = %addr, "Client disconnected");
    result
}

async fn command_loop(
    ctx: &DaemonCtx,
    reader: &mut BufReader<OwnedReadHalf>,
    tx: &mpsc::UnboundedSender<String>,
) -> anyhow::Result<()> {
    loop {
        let line = match next_line(ctx, reader).await? {
            Some(line) => line,
            None => return Ok(()),
        };
        if line.is_empty() {
            continue;
        }
        match Command::parse(&line) {
            Some(Command::Quit) => {
                info!("Client quit");
                return Ok(());
            }
            Some(cmd) => handle_command(ctx, cmd).await?,
            None => {
                warn!(line = %line, "Invalid client command");
                let _ = tx.send("Invalid command.".to_string());
            }
        }
    }
}

async fn handle_command(ctx: &DaemonCtx, cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Connect(target) => {
            let peer = match resolve_peer(&target) {
                Some(peer) => peer,
                None => {
                    let session = ctx.session.lock().await;
                    session.notify_client(&format!("Invalid address: {target}"));
                    return Ok(());
                }
            };
            let mut session = ctx.session.lock().await;
            if session.state != SessionState::Idle {
                session.notify_client("Cannot connect: already in a chat or awaiting one.");
                return Ok(());
            }
            let syn = Datagram::control(Operation::Syn, session.send_seq, session.sender_name());
            // The initiating SYN is deliberately not retransmitted: a silent
            // peer leaves us Inviting until the client quits or a SYNACK
            // arrives.
            ctx.transport.send_plain(&syn, peer).await?;
            session.state = SessionState::Inviting { peer };
            info!(%peer, "Chat invitation sent");
        }
        Command::Chat(text) => {
            if !text.is_ascii() {
                let session = ctx.session.lock().await;
                session.notify_client("Chat messages must be ASCII.");
                return Ok(());
            }
            let mut session = ctx.session.lock().await;
            match &session.state {
                SessionState::Chatting { peer, .. } => {
                    let peer = *peer;
                    let dgram = Datagram::chat(session.send_seq, session.sender_name(), &text);
                    ctx.transport
                        .send_reliable(&mut session, dgram, peer, false)
                        .await?;
                }
                _ => {
                    debug!("Chat command outside chat");
                    session.notify_client("Not in chat, can not send message.");
                }
            }
        }
        Command::Accept => {
            let mut session = ctx.session.lock().await;
            match &session.state {
                SessionState::Invited {
                    peer,
                    peer_user,
                    syn_seq,
                } => {
                    let (peer, peer_user, syn_seq) = (*peer, peer_user.clone(), *syn_seq);
                    let user = session.sender_name().to_string();
                    let synack = Datagram::control(Operation::SynAck, syn_seq, &user);
                    match ctx
                        .transport
                        .send_reliable(&mut session, synack, peer, false)
                        .await?
                    {
                        SendOutcome::Acked => {
                            info!(%peer, user = %peer_user, "Chat established");
                            session.state = SessionState::Chatting {
                                peer,
                                peer_user: peer_user.clone(),
                            };
                            session.notify_client(&format!(
                                "Chat connection established with {peer_user}."
                            ));
                        }
                        SendOutcome::TimedOut => {} // transport already reset and notified
                    }
                }
                _ => session.notify_client("No pending chat invitations to accept."),
            }
        }
        Command::Reject => {
            let mut session = ctx.session.lock().await;
            match &session.state {
                SessionState::Invited { peer, syn_seq, .. } => {
                    let (peer, syn_seq) = (*peer, *syn_seq);
                    let user = session.sender_name().to_string();
                    let finerr = Datagram::control_reason(
                        Operation::FinErr,
                        syn_seq,
                        &user,
                        crate::session::REASON_REJECTED,
                    );
                    let outcome = ctx
                        .transport
                        .send_reliable(&mut session, finerr, peer, true)
                        .await?;
                    if outcome == SendOutcome::Acked {
                        info!(%peer, "Invitation rejected");
                        session.state = SessionState::Idle;
                        session.notify_client("Chat invitation rejected.");
                    }
                }
                _ => session.notify_client("No pending chat invitations to reject."),
            }
        }
        // Quit never reaches here; the command loop intercepts it.
        Command::Quit => {}
    }
    Ok(())
}

/// Ends the attachment: FIN to the peer if a chat or invitation of ours is
/// live, session reset, client detached.
async fn teardown(ctx: &DaemonCtx) {
    let mut session = ctx.session.lock().await;
    let fin_peer = match &session.state {
        SessionState::Chatting { peer, .. } | SessionState::Inviting { peer } => Some(*peer),
        _ => None,
    };
    if let Some(peer) = fin_peer {
        if !ctx.shutdown.load(Ordering::Relaxed) {
            let user = session.sender_name().to_string();
            let fin = Datagram::control(Operation::Fin, session.send_seq, &user);
            if let Err(e) = ctx
                .transport
                .send_reliable(&mut session, fin, peer, false)
                .await
            {
                warn!(%peer, error = %e, "Failed to send FIN on client disconnect");
            }
        }
    }
    session.reset_to_idle();
    session.client = None;
    session.username = None;
}

/// Resolves a `CONNECT` argument: a bare IP targets the fixed peer port, an
/// explicit `ip:port` is taken as-is.
fn resolve_peer(target: &str) -> Option<SocketAddr> {
    if let Ok(addr) = target.parse::<SocketAddr>() {
        return Some(addr);
    }
    target
        .parse::<std::net::IpAddr>()
        .ok()
        .map(|ip| SocketAddr::new(ip, PEER_PORT))
}

fn valid_username(name: &str) -> bool {
    !name.is_empty() && name.len() <= USER_FIELD_LEN && name.is_ascii() && !name.contains('\0')
}

/// Reads one `\n`-terminated line, polling the shutdown flag between
/// timeouts. Returns `None` on EOF or shutdown.
async fn next_line(
    ctx: &DaemonCtx,
    reader: &mut BufReader<OwnedReadHalf>,
) -> anyhow::Result<Option<String>> {
    let mut buf = Vec::new();
    loop {
        if ctx.shutdown.load(Ordering::Relaxed) {
            return Ok(None);
        }
        match time::timeout(POLL, reader.read_until(b'\n', &mut buf)).await {
            Err(_) => continue, // partial input stays in buf
            Ok(Ok(0)) if buf.is_empty() => return Ok(None),
            Ok(Ok(_)) => {
                return Ok(Some(String::from_utf8_lossy(&buf).trim().to_string()));
            }
            Ok(Err(e)) => return Err(e).context("client read"),
        }
    }
}

async fn write_lines(mut half: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = rx.recv().await {
        let framed = format!("{line}\n");
        if half.write_all(framed.as_bytes()).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_bare_ip_to_peer_port() {
        assert_eq!(
            resolve_peer("10.0.0.2"),
            Some("10.0.0.2:7777".parse().unwrap())
        );
    }

    #[test]
    fn resolves_explicit_port() {
        assert_eq!(
            resolve_peer("127.0.0.1:40100"),
            Some("127.0.0.1:40100".parse().unwrap())
        );
    }

    #[test]
    fn rejects_garbage_address() {
        assert_eq!(resolve_peer("not-an-ip"), None);
    }

    #[test]
    fn username_rules() {
        assert!(valid_username("alice"));
        assert!(valid_username(&"x".repeat(32)));
        assert!(!valid_username(""));
        assert!(!valid_username(&"x".repeat(33)));
        assert!(!valid_username("émile"));
    }
}
