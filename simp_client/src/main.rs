//! SIMP client binary.
//!
//! Usage:
//!   client <host>
//!
//! Connects to the daemon at `<host>:7778`, asks for a username, and turns
//! terminal input into control-channel commands:
//!   CONNECT <ip>   - invite the user at <ip> to a chat
//!   ACCEPT/REJECT  - answer a pending invitation
//!   CHAT <message> - send a chat line
//!   QUIT           - leave the chat and exit

use std::env;
use std::io::{BufRead, Write};
use std::net::SocketAddr;

use anyhow::Context;
use simp_client::ChatClient;
use simp_shared::config::CLIENT_PORT;
use simp_shared::control::{Command, CHAT_PREFIX, INVITE_PREFIX};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: client <host>");
        std::process::exit(1);
    }

    let addr: SocketAddr = format!("{}:{}", args[1], CLIENT_PORT)
        .parse()
        .context("parse daemon address")?;

    let mut client = ChatClient::connect(addr).await?;
    println!("Connected to daemon at {addr}.");

    let username = prompt_username()?;
    client.login(&username).await?;

    // Spawn stdin reader thread.
    let (input_tx, mut input_rx) = mpsc::channel::<String>(32);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        loop {
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                break;
            }
            let line = line.trim().to_string();
            if !line.is_empty() && input_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Enter commands: CONNECT <ip>, CHAT <message>, QUIT");
    println!();

    loop {
        tokio::select! {
            line = client.next_line() => {
                match line? {
                    Some(line) => print_notification(&line),
                    None => {
                        println!("Daemon closed the connection.");
                        break;
                    }
                }
            }
            input = input_rx.recv() => {
                let Some(line) = input else { break };
                match Command::parse(&line) {
                    Some(Command::Quit) => {
                        client.send_command("QUIT").await?;
                        println!("Disconnected from daemon.");
                        break;
                    }
                    Some(_) => client.send_command(&line).await?,
                    None => {
                        println!("Unknown command. Use CONNECT <ip>, CHAT <message>, ACCEPT, REJECT or QUIT.");
                    }
                }
            }
        }
    }

    Ok(())
}

fn prompt_username() -> anyhow::Result<String> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        print!("Enter username (max 32 ASCII characters): ");
        stdout.flush().context("flush stdout")?;
        let mut line = String::new();
        stdin.lock().read_line(&mut line).context("read username")?;
        let name = line.trim().to_string();
        if !name.is_empty() && name.len() <= 32 && name.is_ascii() {
            return Ok(name);
        }
        println!("Invalid username, try again.");
    }
}

/// Formats a daemon notification for the terminal.
fn print_notification(line: &str) {
    if let Some(rest) = line.strip_prefix(INVITE_PREFIX) {
        println!("{rest}");
        println!("Type ACCEPT to join the chat or REJECT to decline.");
    } else if let Some(rest) = line.strip_prefix(CHAT_PREFIX) {
        match rest.split_once(' ') {
            Some((user, text)) => println!("[{user}] {text}"),
            None => println!("{rest}"),
        }
    } else {
        println!("{line}");
    }
}
