mod common;

use common::*;
use parley_common::frame::error_text;
use parley_common::{ClientFrame, ClientId, MessageStatus, ServerFrame};
use std::time::Duration;

#[tokio::test]
async fn live_delivery_between_two_clients() {
    let (addr, _state) = start_server().await;

    let mut alice = TestClient::connect_as(&addr, "alice").await;
    let mut bob = TestClient::connect_as(&addr, "bob").await;

    alice.send_message("alice", "bob", "hi").await;

    match bob.recv_frame().await {
        ServerFrame::Message {
            id,
            sender,
            recipient,
            content,
            ..
        } => {
            assert!(id.is_some());
            assert_eq!(sender.as_str(), "alice");
            assert_eq!(recipient.as_str(), "bob");
            assert_eq!(content, "hi");
        }
        other => panic!("expected message, got {other:?}"),
    }
    match alice.recv_frame().await {
        ServerFrame::MessageSent { recipient, .. } => assert_eq!(recipient.as_str(), "bob"),
        other => panic!("expected message_sent, got {other:?}"),
    }
    assert!(alice
        .recv_frame_timeout(Duration::from_millis(200))
        .await
        .is_none());
}

#[tokio::test]
async fn offline_recipient_gets_backlog_on_authentication() {
    let (addr, state) = start_server().await;

    let mut alice = TestClient::connect_as(&addr, "alice").await;
    alice.send_message("alice", "bob", "hello?").await;

    assert!(matches!(
        alice.recv_frame().await,
        ServerFrame::MessageSent { .. }
    ));
    assert_eq!(
        alice.recv_frame().await,
        ServerFrame::error(error_text::RECIPIENT_OFFLINE)
    );
    assert_eq!(state.store.len(), 1);

    let mut bob = TestClient::connect(&addr).await;
    bob.send(&ClientFrame::authenticate("bob")).await;
    assert_eq!(bob.recv_frame().await, ServerFrame::authentication_success());
    match bob.recv_frame().await {
        ServerFrame::Message {
            sender,
            content,
            status,
            ..
        } => {
            assert_eq!(sender.as_str(), "alice");
            assert_eq!(content, "hello?");
            assert_eq!(status, Some(MessageStatus::Pending));
        }
        other => panic!("expected backlog message, got {other:?}"),
    }
}

#[tokio::test]
async fn backlog_preserves_send_order() {
    let (addr, _state) = start_server().await;

    let mut alice = TestClient::connect_as(&addr, "alice").await;
    for content in ["one", "two", "three"] {
        alice.send_message("alice", "bob", content).await;
    }

    let mut bob = TestClient::connect_as(&addr, "bob").await;
    let mut received = Vec::new();
    for _ in 0..3 {
        match bob.recv_frame().await {
            ServerFrame::Message { content, .. } => received.push(content),
            other => panic!("expected message, got {other:?}"),
        }
    }
    assert_eq!(received, vec!["one", "two", "three"]);
}

#[tokio::test]
async fn mark_read_of_unknown_id_gets_no_reply() {
    let (addr, _state) = start_server().await;

    let mut bob = TestClient::connect_as(&addr, "bob").await;
    bob.send(&ClientFrame::mark_read("no-such-message", "bob"))
        .await;
    bob.send_raw(r#"{"type":"ping"}"#).await;

    assert!(matches!(bob.recv_frame().await, ServerFrame::Pong { .. }));
}

#[tokio::test]
async fn mark_read_moves_message_to_read() {
    let (addr, state) = start_server().await;

    let mut alice = TestClient::connect_as(&addr, "alice").await;
    let mut bob = TestClient::connect_as(&addr, "bob").await;
    alice.send_message("alice", "bob", "read me").await;

    let ServerFrame::Message { id: Some(id), .. } = bob.recv_frame().await else {
        panic!("expected message with id");
    };
    bob.send(&ClientFrame::mark_read(id.as_str(), "bob")).await;

    let bob_id = ClientId::from("bob");
    assert!(
        eventually(|| {
            state
                .store
                .drain(&bob_id)
                .first()
                .is_some_and(|m| m.status == MessageStatus::Read && m.expires_at.is_some())
        })
        .await
    );
}

#[tokio::test]
async fn ack_moves_message_to_delivered() {
    let (addr, state) = start_server().await;

    let mut alice = TestClient::connect_as(&addr, "alice").await;
    let mut bob = TestClient::connect_as(&addr, "bob").await;
    alice.send_message("alice", "bob", "got it?").await;

    let ServerFrame::Message { id: Some(id), .. } = bob.recv_frame().await else {
        panic!("expected message with id");
    };
    bob.send(&ClientFrame::ack(id.as_str())).await;

    let bob_id = ClientId::from("bob");
    assert!(
        eventually(|| {
            state
                .store
                .drain(&bob_id)
                .first()
                .is_some_and(|m| m.status == MessageStatus::Delivered)
        })
        .await
    );
}

#[tokio::test]
async fn newest_connection_wins_identifier() {
    let (addr, _state) = start_server().await;

    let mut first = TestClient::connect_as(&addr, "alice").await;
    let mut second = TestClient::connect_as(&addr, "alice").await;
    let mut bob = TestClient::connect_as(&addr, "bob").await;

    bob.send_message("bob", "alice", "which one?").await;

    assert!(matches!(
        second.recv_frame().await,
        ServerFrame::Message { .. }
    ));
    assert!(first
        .recv_frame_timeout(Duration::from_millis(200))
        .await
        .is_none());
}

#[tokio::test]
async fn stale_close_does_not_unregister_replacement() {
    let (addr, state) = start_server().await;

    let first = TestClient::connect_as(&addr, "alice").await;
    let mut second = TestClient::connect_as(&addr, "alice").await;
    drop(first);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(state.registry.lookup(&"alice".into()).is_some());

    let mut bob = TestClient::connect_as(&addr, "bob").await;
    bob.send_message("bob", "alice", "still there").await;
    assert!(matches!(
        second.recv_frame().await,
        ServerFrame::Message { .. }
    ));
}

#[tokio::test]
async fn disconnect_unregisters_and_buffers() {
    let (addr, state) = start_server().await;

    let bob = TestClient::connect_as(&addr, "bob").await;
    let mut alice = TestClient::connect_as(&addr, "alice").await;
    drop(bob);

    let bob_id = ClientId::from("bob");
    assert!(eventually(|| state.registry.lookup(&bob_id).is_none()).await);

    alice.send_message("alice", "bob", "later").await;
    assert!(matches!(
        alice.recv_frame().await,
        ServerFrame::MessageSent { .. }
    ));
    assert_eq!(
        alice.recv_frame().await,
        ServerFrame::error(error_text::RECIPIENT_OFFLINE)
    );
}

#[tokio::test]
async fn malformed_frame_keeps_connection_open() {
    let (addr, _state) = start_server().await;

    let mut alice = TestClient::connect_as(&addr, "alice").await;
    alice.send_raw("this is not json").await;
    assert_eq!(
        alice.recv_frame().await,
        ServerFrame::error(error_text::MALFORMED)
    );

    alice.send_message("alice", "bob", "after garbage").await;
    assert!(matches!(
        alice.recv_frame().await,
        ServerFrame::MessageSent { .. }
    ));
}

#[tokio::test]
async fn message_missing_content_is_invalid() {
    let (addr, state) = start_server().await;

    let mut alice = TestClient::connect_as(&addr, "alice").await;
    alice
        .send_raw(r#"{"type":"message","sender":"alice","recipient":"bob"}"#)
        .await;

    match alice.recv_frame().await {
        ServerFrame::Error { message } => assert!(message.starts_with("Invalid message")),
        other => panic!("expected error, got {other:?}"),
    }
    assert!(state.store.is_empty());
}

#[tokio::test]
async fn unauthenticated_message_is_refused() {
    let (addr, state) = start_server().await;

    let mut client = TestClient::connect(&addr).await;
    client.send_message("alice", "bob", "sneaky").await;

    assert_eq!(
        client.recv_frame().await,
        ServerFrame::error(error_text::NOT_AUTHENTICATED)
    );
    assert!(state.store.is_empty());
}

#[tokio::test]
async fn oversized_content_is_rejected() {
    let (addr, _state, _shutdown) = start_server_with(|c| c.max_payload = 1024).await;

    let mut alice = TestClient::connect_as(&addr, "alice").await;
    alice
        .send_message("alice", "bob", &"x".repeat(1025))
        .await;

    assert_eq!(
        alice.recv_frame().await,
        ServerFrame::error(error_text::PAYLOAD_TOO_LARGE)
    );
}

#[tokio::test]
async fn escaped_content_at_limit_is_accepted() {
    let (addr, _state, _shutdown) = start_server_with(|c| c.max_payload = 4096).await;

    let mut alice = TestClient::connect_as(&addr, "alice").await;
    let mut bob = TestClient::connect_as(&addr, "bob").await;
    let quotes = "\"".repeat(4096);
    alice.send_message("alice", "bob", &quotes).await;

    assert!(matches!(
        alice.recv_frame().await,
        ServerFrame::MessageSent { .. }
    ));
    match bob.recv_frame().await {
        ServerFrame::Message { content, .. } => assert_eq!(content, quotes),
        other => panic!("expected message, got {other:?}"),
    }

    alice.send_raw(r#"{"type":"ping"}"#).await;
    assert!(matches!(alice.recv_frame().await, ServerFrame::Pong { .. }));
}

#[tokio::test]
async fn rate_limit_rejects_excess() {
    let (addr, _state, _shutdown) = start_server_with(|c| c.msg_rate = 3).await;

    let mut alice = TestClient::connect_as(&addr, "alice").await;
    let mut bob = TestClient::connect_as(&addr, "bob").await;
    for i in 0..4 {
        alice.send_message("alice", "bob", &format!("msg {i}")).await;
    }

    for _ in 0..3 {
        assert!(matches!(
            alice.recv_frame().await,
            ServerFrame::MessageSent { .. }
        ));
    }
    assert_eq!(
        alice.recv_frame().await,
        ServerFrame::error(error_text::RATE_LIMITED)
    );
    for _ in 0..3 {
        assert!(matches!(bob.recv_frame().await, ServerFrame::Message { .. }));
    }
}

#[tokio::test]
async fn unauthenticated_connection_times_out() {
    let (addr, _state, _shutdown) = start_server_with(|c| c.auth_timeout = 1).await;

    let mut client = TestClient::connect(&addr).await;
    assert!(client.closed_within(Duration::from_secs(3)).await);
}

#[tokio::test]
async fn idle_connection_is_reaped() {
    let (addr, state, _shutdown) = start_server_with(|c| {
        c.ping_interval = 1;
        c.idle_timeout = 1;
    })
    .await;

    let _silent = TestClient::connect_as(&addr, "ghost").await;
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let ghost = ClientId::from("ghost");
    assert!(eventually(|| state.registry.lookup(&ghost).is_none()).await);
}

#[tokio::test]
async fn max_connections_limit() {
    let (addr, _state, _shutdown) = start_server_with(|c| {
        c.max_conns = 2;
        c.max_conns_ip = 2;
    })
    .await;

    let _client1 = TestClient::connect(&addr).await;
    let _client2 = TestClient::connect(&addr).await;

    let result = tokio::time::timeout(
        Duration::from_secs(3),
        tokio_tungstenite::connect_async(format!("ws://{addr}")),
    )
    .await;
    assert!(
        !matches!(result, Ok(Ok(_))),
        "expected 3rd connection to be refused"
    );
}

#[tokio::test]
async fn shutdown_closes_sessions() {
    let (addr, state, shutdown) = start_server_with(|_| {}).await;

    let mut alice = TestClient::connect_as(&addr, "alice").await;
    shutdown.send(()).unwrap();

    assert!(alice.closed_within(Duration::from_secs(3)).await);
    assert!(eventually(|| state.registry.is_empty()).await);
}

#[tokio::test]
async fn concurrent_clients_exchange_messages() {
    let (addr, _state) = start_server().await;

    let mut clients = Vec::new();
    for i in 0..10 {
        clients.push(TestClient::connect_as(&addr, &format!("peer-{i}")).await);
    }

    for i in 0..10 {
        let to = format!("peer-{}", (i + 1) % 10);
        let from = format!("peer-{i}");
        clients[i].send_message(&from, &to, &format!("from {i}")).await;
    }

    for (i, client) in clients.iter_mut().enumerate() {
        let expected_sender = format!("peer-{}", (i + 9) % 10);
        let mut saw_message = false;
        for _ in 0..2 {
            match client.recv_frame().await {
                ServerFrame::Message { sender, .. } => {
                    assert_eq!(sender.as_str(), expected_sender);
                    saw_message = true;
                }
                ServerFrame::MessageSent { .. } => {}
                other => panic!("unexpected frame {other:?}"),
            }
        }
        assert!(saw_message);
    }
}
