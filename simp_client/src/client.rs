//! Client connection to the local daemon.
//!
//! Speaks the newline-terminated control-line protocol over TCP. The same
//! API drives both the interactive shell and the integration tests.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context};
use simp_shared::control::{GREETING, REJECT_SECOND_CLIENT};
use simp_shared::proto::USER_FIELD_LEN;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time;
use tracing::debug;

/// An admitted connection to a SIMP daemon.
#[derive(Debug)]
pub struct ChatClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    line_buf: Vec<u8>,
}

impl ChatClient {
    /// Connects to the daemon's client port and consumes the greeting.
    ///
    /// Fails if the daemon already has a client attached.
    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connect to daemon at {addr}"))?;
        let (read_half, write_half) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            line_buf: Vec::new(),
        };

        match client.next_line().await? {
            Some(line) if line == GREETING => {
                debug!(%addr, "Connected to daemon");
                Ok(client)
            }
            Some(line) if line == REJECT_SECOND_CLIENT => {
                bail!("daemon at {addr} refused: {line}")
            }
            Some(line) => bail!("unexpected greeting from daemon: {line}"),
            None => bail!("daemon at {addr} closed the connection"),
        }
    }

    /// Registers the username for this attachment. Must be the first line
    /// after the greeting.
    pub async fn login(&mut self, username: &str) -> anyhow::Result<()> {
        if username.is_empty() || username.len() > USER_FIELD_LEN || !username.is_ascii() {
            bail!("username must be 1..={USER_FIELD_LEN} ASCII characters");
        }
        self.send_line(username).await
    }

    /// Sends one raw command line (`CONNECT <ip>`, `CHAT <text>`, `ACCEPT`,
    /// `REJECT`, `QUIT`).
    pub async fn send_command(&mut self, command: &str) -> anyhow::Result<()> {
        self.send_line(command).await
    }

    /// Reads the next notification line. `None` means the daemon closed the
    /// connection.
    pub async fn next_line(&mut self) -> anyhow::Result<Option<String>> {
        // A timed-out read leaves its partial line in `line_buf`; the next
        // call picks it back up.
        let n = self
            .reader
            .read_until(b'\n', &mut self.line_buf)
            .await
            .context("read from daemon")?;
        if n == 0 && self.line_buf.is_empty() {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&self.line_buf).trim().to_string();
        self.line_buf.clear();
        Ok(Some(line))
    }

    /// Like [`next_line`](Self::next_line) with an upper bound on the wait.
    /// `None` means the wait expired.
    pub async fn next_line_timeout(&mut self, wait: Duration) -> anyhow::Result<Option<String>> {
        match time::timeout(wait, self.next_line()).await {
            Ok(result) => result,
            Err(_) => Ok(None),
        }
    }

    async fn send_line(&mut self, line: &str) -> anyhow::Result<()> {
        let framed = format!("{line}\n");
        self.writer
            .write_all(framed.as_bytes())
            .await
            .context("write to daemon")?;
        Ok(())
    }
}
