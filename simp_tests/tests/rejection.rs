//! Daemons refusing invitations on their own: no client attached, or busy.

use simp_tests::{attach_client, expect_line, init_tracing, spawn_daemon};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn syn_to_unattached_daemon_is_refused() -> anyhow::Result<()> {
    init_tracing();

    let daemon_a = spawn_daemon().await?;
    let daemon_b = spawn_daemon().await?; // nobody attaches to B
    let mut alice = attach_client(&daemon_a, "alice").await?;

    alice
        .send_command(&format!("CONNECT {}", daemon_b.peer_addr))
        .await?;

    let notice = expect_line(&mut alice).await?;
    assert!(
        notice.contains("No client is connected"),
        "unexpected line: {notice}"
    );

    daemon_a.shutdown().await;
    daemon_b.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn busy_daemon_rejects_third_party_syn() -> anyhow::Result<()> {
    init_tracing();

    let daemon_a = spawn_daemon().await?;
    let daemon_b = spawn_daemon().await?;
    let daemon_c = spawn_daemon().await?;
    let mut alice = attach_client(&daemon_a, "alice").await?;
    let mut bob = attach_client(&daemon_b, "bob").await?;
    let mut carol = attach_client(&daemon_c, "carol").await?;

    // Alice and Bob establish a chat.
    alice
        .send_command(&format!("CONNECT {}", daemon_b.peer_addr))
        .await?;
    assert!(expect_line(&mut bob).await?.starts_with("CONNECT "));
    bob.send_command("ACCEPT").await?;
    expect_line(&mut bob).await?;
    expect_line(&mut alice).await?;

    // Carol tries to reach busy Bob.
    carol
        .send_command(&format!("CONNECT {}", daemon_b.peer_addr))
        .await?;

    let notice = expect_line(&mut carol).await?;
    assert!(
        notice.contains("already in chat"),
        "unexpected line: {notice}"
    );
    assert_eq!(
        expect_line(&mut bob).await?,
        "User carol tried to start a chat, but was automatically rejected."
    );

    // The existing chat is untouched.
    alice.send_command("CHAT still here").await?;
    assert_eq!(expect_line(&mut bob).await?, "CHAT alice still here");

    daemon_a.shutdown().await;
    daemon_b.shutdown().await;
    daemon_c.shutdown().await;
    Ok(())
}
