#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use parley_common::{ClientFrame, ServerFrame};
use parleys::auth::IdentityPolicy;
use parleys::config::ServerConfig;
use parleys::server::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;

pub fn test_config(listen: SocketAddr) -> ServerConfig {
    ServerConfig {
        listen,
        metrics_addr: "127.0.0.1:0".parse().unwrap(),
        max_conns: 1000,
        max_conns_ip: 100,
        msg_rate: 120,
        bw_rate: 1_048_576,
        max_payload: 65_535,
        auth_timeout: 30,
        ping_interval: 30,
        idle_timeout: 120,
        sweep_interval: 60,
        read_retention: 86_400,
        unread_retention: None,
        max_pending_per_recipient: 10_000,
        identity: IdentityPolicy::Opaque,
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct TestClient {
    pub ws_tx: futures_util::stream::SplitSink<WsStream, Message>,
    pub ws_rx: futures_util::stream::SplitStream<WsStream>,
}

impl TestClient {
    pub async fn connect(addr: &SocketAddr) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        let (ws_tx, ws_rx) = ws.split();
        Self { ws_tx, ws_rx }
    }

    /// Connect and authenticate as `id`. Any backlog is left unread.
    pub async fn connect_as(addr: &SocketAddr, id: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client.authenticate(id).await;
        client
    }

    pub async fn authenticate(&mut self, id: &str) {
        self.send(&ClientFrame::authenticate(id)).await;
        let frame = self.recv_frame().await;
        assert_eq!(
            frame,
            ServerFrame::authentication_success(),
            "expected authentication_success"
        );
    }

    pub async fn send(&mut self, frame: &ClientFrame) {
        self.send_raw(&frame.encode().unwrap()).await;
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws_tx
            .send(Message::Text(text.to_string()))
            .await
            .unwrap();
    }

    pub async fn send_message(&mut self, from: &str, to: &str, content: &str) {
        self.send(&ClientFrame::message(from, to, content)).await;
    }

    pub async fn recv_frame(&mut self) -> ServerFrame {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.ws_rx.next())
                .await
                .expect("timeout waiting for frame")
                .unwrap()
                .unwrap();
            match msg {
                Message::Text(text) => return ServerFrame::parse(&text).unwrap(),
                Message::Ping(_) | Message::Pong(_) => {}
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    }

    pub async fn recv_frame_timeout(&mut self, timeout: Duration) -> Option<ServerFrame> {
        tokio::time::timeout(timeout, self.recv_frame()).await.ok()
    }

    /// Wait for the server to close the connection.
    pub async fn closed_within(&mut self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while let Some(msg) = self.ws_rx.next().await {
                match msg {
                    Ok(Message::Close(_)) | Err(_) => return true,
                    _ => {}
                }
            }
            true
        })
        .await
        .unwrap_or(false)
    }
}

pub async fn start_server_with(
    configure: impl FnOnce(&mut ServerConfig),
) -> (SocketAddr, Arc<ServerState>, watch::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut config = test_config(addr);
    configure(&mut config);
    let state = Arc::new(ServerState::new(config));

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let state_clone = state.clone();
    tokio::spawn(async move {
        if let Err(e) = parleys::run_with_shutdown(listener, state_clone, shutdown_rx).await {
            eprintln!("server error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, state, shutdown_tx)
}

pub async fn start_server() -> (SocketAddr, Arc<ServerState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(ServerState::new(test_config(addr)));

    let state_clone = state.clone();
    tokio::spawn(async move {
        if let Err(e) = parleys::run(listener, state_clone).await {
            eprintln!("server error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, state)
}

/// Poll until `cond` holds or a second passes.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
