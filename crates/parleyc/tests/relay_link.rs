use parley_common::{ClientFrame, ServerFrame};
use parleyc::backoff::ReconnectState;
use parleyc::config::ClientConfig;
use parleyc::relay::relay_connection_manager;
use parleys::auth::IdentityPolicy;
use parleys::config::ServerConfig;
use parleys::server::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

async fn start_relay(identity: IdentityPolicy) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ServerConfig {
        listen: addr,
        identity,
        ..ServerConfig::default()
    };
    let state = Arc::new(ServerState::new(config));
    tokio::spawn(parleys::run(listener, state));
    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

struct Client {
    outbox: mpsc::Sender<ClientFrame>,
    inbox: broadcast::Receiver<ServerFrame>,
    state: watch::Receiver<ReconnectState>,
    task: JoinHandle<anyhow::Result<()>>,
}

fn spawn_client(config: ClientConfig) -> Client {
    let (outbox, outbox_rx) = mpsc::channel(16);
    let (inbox_tx, inbox) = broadcast::channel(16);
    let (state_tx, state) = watch::channel(ReconnectState::Disconnected);
    let task = tokio::spawn(relay_connection_manager(
        Arc::new(config),
        outbox_rx,
        inbox_tx,
        state_tx,
    ));
    Client {
        outbox,
        inbox,
        state,
        task,
    }
}

fn fast_config(relay: String, wallet: &str) -> ClientConfig {
    let mut config = ClientConfig::new(relay, wallet);
    config.reconnect.initial_delay_ms = 10;
    config.reconnect.max_delay_ms = 50;
    config.reconnect.max_attempts = 2;
    config
}

async fn wait_connected(client: &mut Client) {
    tokio::time::timeout(
        Duration::from_secs(5),
        client.state.wait_for(|s| *s == ReconnectState::Connected),
    )
    .await
    .expect("timeout waiting for connection")
    .unwrap();
}

#[tokio::test]
async fn message_flows_between_two_links() {
    let addr = start_relay(IdentityPolicy::Opaque).await;
    let mut alice = spawn_client(fast_config(format!("ws://{addr}"), "alice"));
    let mut bob = spawn_client(fast_config(format!("ws://{addr}"), "bob"));
    wait_connected(&mut alice).await;
    wait_connected(&mut bob).await;

    alice
        .outbox
        .send(ClientFrame::message("alice", "bob", "over the link"))
        .await
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), bob.inbox.recv())
        .await
        .unwrap()
        .unwrap();
    match frame {
        ServerFrame::Message { sender, content, .. } => {
            assert_eq!(sender.as_str(), "alice");
            assert_eq!(content, "over the link");
        }
        other => panic!("expected message, got {other:?}"),
    }
    assert!(matches!(
        alice.inbox.recv().await.unwrap(),
        ServerFrame::MessageSent { .. }
    ));
}

#[tokio::test]
async fn closing_outbox_ends_manager_cleanly() {
    let addr = start_relay(IdentityPolicy::Opaque).await;
    let mut alice = spawn_client(fast_config(format!("ws://{addr}"), "alice"));
    wait_connected(&mut alice).await;

    drop(alice.outbox);
    let result = tokio::time::timeout(Duration::from_secs(5), alice.task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(*alice.state.borrow(), ReconnectState::Disconnected);
}

#[tokio::test]
async fn unreachable_relay_exhausts_attempts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = spawn_client(fast_config(format!("ws://{addr}"), "alice"));
    let result = tokio::time::timeout(Duration::from_secs(5), client.task)
        .await
        .unwrap()
        .unwrap();

    assert!(result.unwrap_err().to_string().contains("giving up"));
    assert_eq!(*client.state.borrow(), ReconnectState::Disconnected);
}

#[tokio::test]
async fn rejected_authentication_is_fatal() {
    let addr = start_relay(IdentityPolicy::Wallet).await;
    let client = spawn_client(fast_config(format!("ws://{addr}"), "not-base58-0OIl"));

    let result = tokio::time::timeout(Duration::from_secs(5), client.task)
        .await
        .unwrap()
        .unwrap();

    assert!(result
        .unwrap_err()
        .to_string()
        .contains("authentication rejected"));
}
