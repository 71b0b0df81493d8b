use crate::backoff::{ReconnectState, Reconnector};
use crate::config::ClientConfig;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parley_common::{ClientFrame, ServerFrame};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
enum RelayError {
    Fatal(anyhow::Error),
    Transient(anyhow::Error),
}

fn transient(e: impl Into<anyhow::Error>) -> RelayError {
    RelayError::Transient(e.into())
}

/// Top-level relay connection loop with automatic reconnection and backoff.
///
/// Frames queued on `outbox_rx` are written to the relay while connected.
/// Every server frame is published on `inbox_tx`, and the link state on
/// `state_tx`. Returns when `outbox_rx` closes.
///
/// # Errors
///
/// Returns an error if the relay refuses authentication or the reconnect
/// budget is exhausted.
pub async fn relay_connection_manager(
    config: Arc<ClientConfig>,
    mut outbox_rx: mpsc::Receiver<ClientFrame>,
    inbox_tx: broadcast::Sender<ServerFrame>,
    state_tx: watch::Sender<ReconnectState>,
) -> anyhow::Result<()> {
    let mut reconnector = config.reconnect.reconnector();

    loop {
        reconnector.connecting();
        state_tx.send_replace(reconnector.state());

        let result =
            connect_and_run(&config, &mut outbox_rx, &inbox_tx, &state_tx, &mut reconnector).await;
        match result {
            Ok(()) => {
                info!("relay connection closed cleanly");
                reconnector.stop();
                state_tx.send_replace(reconnector.state());
                return Ok(());
            }
            Err(RelayError::Fatal(e)) => {
                error!(error = %e, "fatal relay error, not retrying");
                reconnector.stop();
                state_tx.send_replace(reconnector.state());
                return Err(e);
            }
            Err(RelayError::Transient(e)) => {
                warn!(error = %e, attempt = reconnector.failures() + 1, "relay connection lost");
                let Some(delay) = reconnector.failed() else {
                    state_tx.send_replace(reconnector.state());
                    return Err(e.context(format!(
                        "giving up after {} attempts",
                        reconnector.failures()
                    )));
                };
                state_tx.send_replace(reconnector.state());
                info!(
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "reconnecting"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn send_frame<S>(
    ws_tx: &mut SplitSink<WebSocketStream<S>, Message>,
    frame: &ClientFrame,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let text = frame.encode().map_err(|e| RelayError::Fatal(e.into()))?;
    ws_tx.send(Message::Text(text)).await.map_err(transient)
}

async fn authenticate<S>(
    ws_tx: &mut SplitSink<WebSocketStream<S>, Message>,
    ws_rx: &mut SplitStream<WebSocketStream<S>>,
    wallet: &str,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    send_frame(ws_tx, &ClientFrame::authenticate(wallet)).await?;

    loop {
        let msg = ws_rx
            .next()
            .await
            .ok_or_else(|| transient(anyhow::anyhow!("connection closed before authentication")))?
            .map_err(transient)?;
        let Message::Text(text) = msg else {
            continue;
        };
        match ServerFrame::parse(&text) {
            Ok(ServerFrame::AuthenticationSuccess { .. }) => return Ok(()),
            Ok(ServerFrame::Error { message }) => {
                return Err(RelayError::Fatal(anyhow::anyhow!(
                    "authentication rejected: {message}"
                )))
            }
            Ok(other) => debug!(?other, "ignoring frame before authentication_success"),
            Err(e) => return Err(transient(e)),
        }
    }
}

async fn connect_and_run(
    config: &ClientConfig,
    outbox_rx: &mut mpsc::Receiver<ClientFrame>,
    inbox_tx: &broadcast::Sender<ServerFrame>,
    state_tx: &watch::Sender<ReconnectState>,
    reconnector: &mut Reconnector,
) -> Result<(), RelayError> {
    let (ws, _) = tokio_tungstenite::connect_async(config.relay.as_str())
        .await
        .map_err(transient)?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    authenticate(&mut ws_tx, &mut ws_rx, &config.wallet).await?;

    reconnector.connected();
    state_tx.send_replace(reconnector.state());
    info!(relay = %config.relay, wallet = %config.wallet, "authenticated with relay");

    let mut ping_interval = tokio::time::interval(Duration::from_secs(config.keepalive_interval_s));
    ping_interval.tick().await;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let msg = msg
                    .ok_or_else(|| transient(anyhow::anyhow!("connection closed")))?
                    .map_err(transient)?;
                match msg {
                    Message::Text(text) => match ServerFrame::parse(&text) {
                        Ok(frame) => {
                            if inbox_tx.send(frame).is_err() {
                                debug!("inbound frame dropped: no active subscribers");
                            }
                        }
                        Err(e) => debug!(error = %e, "ignoring unparseable frame"),
                    },
                    Message::Ping(data) => {
                        ws_tx.send(Message::Pong(data)).await.map_err(transient)?;
                    }
                    Message::Close(_) => {
                        return Err(transient(anyhow::anyhow!("relay closed the connection")));
                    }
                    _ => {}
                }
            }

            outbound = outbox_rx.recv() => {
                let Some(frame) = outbound else {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                };
                debug!(frame_type = frame.frame_type(), "sending frame");
                send_frame(&mut ws_tx, &frame).await?;
            }

            _ = ping_interval.tick() => {
                ws_tx.send(Message::Ping(vec![])).await.map_err(transient)?;
            }
        }
    }

    Ok(())
}
