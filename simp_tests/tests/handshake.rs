//! Full socket-based handshake and chat flows between two daemons.

use simp_tests::{attach_client, attach_client_retry, expect_line, init_tracing, spawn_daemon};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handshake_accept_and_chat_both_ways() -> anyhow::Result<()> {
    init_tracing();

    let daemon_a = spawn_daemon().await?;
    let daemon_b = spawn_daemon().await?;
    let mut alice = attach_client(&daemon_a, "alice").await?;
    let mut bob = attach_client(&daemon_b, "bob").await?;

    alice
        .send_command(&format!("CONNECT {}", daemon_b.peer_addr))
        .await?;

    let invite = expect_line(&mut bob).await?;
    assert_eq!(invite, "CONNECT User alice wants to start a chat.");

    bob.send_command("ACCEPT").await?;
    assert_eq!(
        expect_line(&mut bob).await?,
        "Chat connection established with alice."
    );
    assert_eq!(
        expect_line(&mut alice).await?,
        "Chat connection established with bob."
    );

    // Stop-and-wait chat in both directions.
    alice.send_command("CHAT hello bob").await?;
    assert_eq!(expect_line(&mut bob).await?, "CHAT alice hello bob");

    bob.send_command("CHAT hi alice").await?;
    assert_eq!(expect_line(&mut alice).await?, "CHAT bob hi alice");

    alice.send_command("CHAT still there?").await?;
    assert_eq!(expect_line(&mut bob).await?, "CHAT alice still there?");

    // Quitting ends the chat for the peer too.
    alice.send_command("QUIT").await?;
    assert_eq!(
        expect_line(&mut bob).await?,
        "!! User alice ended the chat. !!"
    );

    daemon_a.shutdown().await;
    daemon_b.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_invitation_returns_both_sides_to_idle() -> anyhow::Result<()> {
    init_tracing();

    let daemon_a = spawn_daemon().await?;
    let daemon_b = spawn_daemon().await?;
    let mut alice = attach_client(&daemon_a, "alice").await?;
    let mut bob = attach_client(&daemon_b, "bob").await?;

    alice
        .send_command(&format!("CONNECT {}", daemon_b.peer_addr))
        .await?;
    assert!(expect_line(&mut bob).await?.starts_with("CONNECT "));

    bob.send_command("REJECT").await?;
    assert_eq!(expect_line(&mut bob).await?, "Chat invitation rejected.");

    let notice = expect_line(&mut alice).await?;
    assert!(
        notice.contains("invitation rejected"),
        "unexpected line: {notice}"
    );

    // Both ends are idle again: the same pair can now complete a handshake.
    alice
        .send_command(&format!("CONNECT {}", daemon_b.peer_addr))
        .await?;
    assert!(expect_line(&mut bob).await?.starts_with("CONNECT "));
    bob.send_command("ACCEPT").await?;
    assert_eq!(
        expect_line(&mut bob).await?,
        "Chat connection established with alice."
    );
    assert_eq!(
        expect_line(&mut alice).await?,
        "Chat connection established with bob."
    );

    daemon_a.shutdown().await;
    daemon_b.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fresh_chat_after_quit_restarts_sequences() -> anyhow::Result<()> {
    init_tracing();

    let daemon_a = spawn_daemon().await?;
    let daemon_b = spawn_daemon().await?;
    let mut alice = attach_client(&daemon_a, "alice").await?;
    let mut bob = attach_client(&daemon_b, "bob").await?;

    // First chat: a couple of messages, then bob quits.
    alice
        .send_command(&format!("CONNECT {}", daemon_b.peer_addr))
        .await?;
    assert!(expect_line(&mut bob).await?.starts_with("CONNECT "));
    bob.send_command("ACCEPT").await?;
    expect_line(&mut bob).await?;
    expect_line(&mut alice).await?;

    alice.send_command("CHAT one").await?;
    assert_eq!(expect_line(&mut bob).await?, "CHAT alice one");

    bob.send_command("QUIT").await?;
    assert_eq!(
        expect_line(&mut alice).await?,
        "!! User bob ended the chat. !!"
    );

    // Bob reattaches; a second handshake must work from sequence zero.
    let mut bob = attach_client_retry(&daemon_b, "bob").await?;
    alice
        .send_command(&format!("CONNECT {}", daemon_b.peer_addr))
        .await?;
    assert!(expect_line(&mut bob).await?.starts_with("CONNECT "));
    bob.send_command("ACCEPT").await?;
    expect_line(&mut bob).await?;
    expect_line(&mut alice).await?;

    bob.send_command("CHAT round two").await?;
    assert_eq!(expect_line(&mut alice).await?, "CHAT bob round two");

    daemon_a.shutdown().await;
    daemon_b.shutdown().await;
    Ok(())
}
