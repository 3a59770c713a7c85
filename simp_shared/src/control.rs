//! Client control-channel line protocol.
//!
//! The client and its local daemon speak newline-terminated ASCII lines over
//! TCP. Client-to-daemon lines are commands; daemon-to-client lines are
//! free-form notifications the client recognizes by prefix.

/// Greeting sent to the single admitted client.
pub const GREETING: &str = "Only client, connection successfully established.";

/// Sent to any further connection attempt while a client is attached.
pub const REJECT_SECOND_CLIENT: &str = "Another client is already connected.";

/// Prefix of an incoming chat-invitation notification.
pub const INVITE_PREFIX: &str = "CONNECT ";

/// Prefix of a delivered chat line (`CHAT <user> <text>`).
pub const CHAT_PREFIX: &str = "CHAT ";

/// A command line from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Invite the peer daemon at the given address to a chat.
    ///
    /// The argument is an IP, optionally with an explicit `:port`; without
    /// one the daemon targets the fixed peer port.
    Connect(String),
    /// Accept a pending invitation.
    Accept,
    /// Reject a pending invitation.
    Reject,
    /// Send a chat line to the current peer.
    Chat(String),
    /// Detach from the daemon, ending any chat in progress.
    Quit,
}

impl Command {
    /// Parses a trimmed command line. Returns `None` for anything the
    /// protocol does not recognize.
    pub fn parse(line: &str) -> Option<Command> {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("CONNECT ") {
            let target = rest.trim();
            if target.is_empty() {
                return None;
            }
            return Some(Command::Connect(target.to_string()));
        }
        if let Some(rest) = line.strip_prefix("CHAT ") {
            if rest.is_empty() {
                return None;
            }
            return Some(Command::Chat(rest.to_string()));
        }
        match line {
            "ACCEPT" => Some(Command::Accept),
            "REJECT" => Some(Command::Reject),
            "QUIT" => Some(Command::Quit),
            _ => None,
        }
    }
}
