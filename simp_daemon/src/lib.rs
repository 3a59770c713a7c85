//! `simp_daemon`
//!
//! The SIMP daemon holds one chat session between a local client (TCP line
//! protocol, port 7778) and a remote peer daemon (SIMP datagrams over UDP,
//! port 7777).
//!
//! Layering, bottom-up:
//! - [`transport`]: stop-and-wait retransmission with alternating-bit
//!   sequencing and loss simulation.
//! - [`session`]: the Idle/Inviting/Invited/Chatting state machine.
//! - [`client_channel`]: at-most-one local client, commands in,
//!   notifications out.
//! - [`peer`]: the single UDP reader.
//! - [`daemon`]: supervisor wiring it all together.

pub mod client_channel;
pub mod daemon;
pub mod peer;
pub mod session;
pub mod transport;
