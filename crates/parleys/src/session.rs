use crate::error::{ParleysError, RouteError};
use crate::metrics::{counters, gauges, histograms};
use crate::ratelimit::RateLimiter;
use crate::registry::{ConnHandle, ConnId, Outbound};
use crate::server::ServerState;
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use parley_common::frame::error_text;
use parley_common::{ClientFrame, ClientId, MessageId, ServerFrame};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Duration};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsRecv = SplitStream<WebSocketStream<TcpStream>>;

/// Capacity of each connection's outbound queue.
const OUTBOUND_QUEUE: usize = 256;

/// Room for the JSON envelope around a maximum-size `content` field.
const ENVELOPE_SLACK: usize = 4096;

/// Longest JSON escape of a single content byte (`\u00XX`).
const JSON_ESCAPE_WIDTH: usize = 6;

/// Largest inbound WebSocket message that can still carry `max_content`
/// bytes of decoded content. The exact content limit is enforced after
/// decoding, so escaped content at the limit must get through the transport.
fn transport_limit(max_content: usize) -> usize {
    max_content
        .saturating_mul(JSON_ESCAPE_WIDTH)
        .saturating_add(ENVELOPE_SLACK)
}

/// Where a session is in its lifecycle. `Closed` is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Only `authenticate` is acted upon.
    Unauthenticated,
    /// Registered under this identifier.
    Authenticated(ClientId),
    /// The transport is gone.
    Closed,
}

/// Per-connection state machine.
///
/// Decodes inbound text frames, dispatches them to the registry, router and
/// store, and returns the frames to write back to the same peer. Frames for
/// other peers travel through their registry handles.
pub struct ConnectionSession {
    conn_id: ConnId,
    state: SessionState,
    tx: mpsc::Sender<Outbound>,
    connected_at: Instant,
    rate_limiter: RateLimiter,
}

impl ConnectionSession {
    /// New unauthenticated session whose live frames arrive on `tx`'s receiver.
    #[must_use]
    pub(crate) fn new(tx: mpsc::Sender<Outbound>, rate_limiter: RateLimiter) -> Self {
        Self {
            conn_id: ConnId::next(),
            state: SessionState::Unauthenticated,
            tx,
            connected_at: Instant::now(),
            rate_limiter,
        }
    }

    /// Identity of this session's transport connection.
    #[must_use]
    pub const fn conn_id(&self) -> ConnId {
        self.conn_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Authenticated identifier, if any.
    #[must_use]
    pub const fn client_id(&self) -> Option<&ClientId> {
        match &self.state {
            SessionState::Authenticated(id) => Some(id),
            _ => None,
        }
    }

    fn handle(&self, client_id: ClientId) -> ConnHandle {
        ConnHandle {
            conn_id: self.conn_id,
            client_id,
            tx: self.tx.clone(),
            connected_at: self.connected_at,
        }
    }

    /// Process one inbound text frame. Returns the replies for this peer.
    pub fn handle_text(&mut self, text: &str, state: &ServerState) -> Vec<ServerFrame> {
        if self.state == SessionState::Closed {
            return Vec::new();
        }
        let frame = match ClientFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                counters::frames_malformed_total();
                debug!(conn_id = %self.conn_id, error = %e, "malformed frame");
                return vec![ServerFrame::error(error_text::MALFORMED)];
            }
        };

        match (frame, self.client_id().cloned()) {
            (ClientFrame::Authenticate { wallet_address }, _) => {
                self.authenticate(wallet_address.as_deref(), state)
            }
            (ClientFrame::Ping, _) => vec![ServerFrame::pong(Utc::now())],
            (ClientFrame::Unknown, _) => {
                debug!(conn_id = %self.conn_id, "ignoring unknown frame type");
                Vec::new()
            }
            (other, None) => {
                debug!(
                    conn_id = %self.conn_id,
                    frame_type = other.frame_type(),
                    "frame before authentication"
                );
                vec![ServerFrame::error(error_text::NOT_AUTHENTICATED)]
            }
            (
                ClientFrame::Message {
                    sender,
                    recipient,
                    content,
                },
                Some(me),
            ) => self.send(&me, sender, recipient, content, state),
            (
                ClientFrame::MarkRead {
                    message_id,
                    recipient,
                },
                Some(me),
            ) => {
                match (message_id, recipient) {
                    (Some(id), Some(recipient)) if recipient == me.as_str() => {
                        let changed = state
                            .store
                            .mark_read(&me, &MessageId::from(id), Utc::now());
                        debug!(client = %me, changed, "mark_read");
                    }
                    _ => debug!(client = %me, "ignoring mark_read for another recipient"),
                }
                Vec::new()
            }
            (ClientFrame::Ack { message_id }, Some(me)) => {
                if let Some(id) = message_id {
                    let changed = state
                        .store
                        .mark_delivered(&me, &MessageId::from(id), Utc::now());
                    debug!(client = %me, changed, "ack");
                }
                Vec::new()
            }
        }
    }

    fn authenticate(&mut self, wallet_address: Option<&str>, state: &ServerState) -> Vec<ServerFrame> {
        let client_id = match state.authenticator.authenticate(wallet_address) {
            Ok(id) => id,
            Err(e) => {
                counters::authentications_total("rejected");
                debug!(conn_id = %self.conn_id, error = %e, "authentication rejected");
                return vec![ServerFrame::error(format!("Authentication failed: {e}"))];
            }
        };

        if let SessionState::Authenticated(previous) = &self.state {
            if previous != &client_id {
                state.registry.unregister(previous, self.conn_id);
            }
        }
        if let Some(old) = state.registry.register(self.handle(client_id.clone())) {
            if old.conn_id != self.conn_id {
                info!(
                    client = %client_id,
                    old_conn = %old.conn_id,
                    new_conn = %self.conn_id,
                    "identifier re-authenticated, previous connection replaced"
                );
            }
        }
        counters::authentications_total("accepted");
        info!(client = %client_id, conn_id = %self.conn_id, "client authenticated");

        let backlog = state.store.drain(&client_id);
        if !backlog.is_empty() {
            debug!(client = %client_id, count = backlog.len(), "delivering backlog");
        }
        self.state = SessionState::Authenticated(client_id);

        let mut replies = Vec::with_capacity(1 + backlog.len());
        replies.push(ServerFrame::authentication_success());
        replies.extend(backlog.iter().map(ServerFrame::deliver));
        replies
    }

    fn send(
        &mut self,
        me: &ClientId,
        sender: Option<String>,
        recipient: Option<String>,
        content: Option<String>,
        state: &ServerState,
    ) -> Vec<ServerFrame> {
        let size = content.as_ref().map_or(0, String::len);
        if let Err(limit) = self.rate_limiter.check(size) {
            counters::messages_dropped_total(limit.label());
            debug!(client = %me, limit = limit.label(), "rate limited");
            return vec![ServerFrame::error(error_text::RATE_LIMITED)];
        }

        let start = Instant::now();
        let result = state.router.route(
            me,
            sender.as_deref(),
            recipient.as_deref(),
            content.as_deref(),
            Utc::now(),
        );
        histograms::route_latency_seconds(start.elapsed().as_secs_f64());

        match result {
            Ok(outcome) => outcome.sender_replies(),
            Err(RouteError::TooLarge { .. }) => {
                counters::messages_dropped_total("oversize");
                vec![ServerFrame::error(error_text::PAYLOAD_TOO_LARGE)]
            }
            Err(e) => {
                counters::messages_dropped_total("invalid");
                debug!(client = %me, error = %e, "invalid message");
                vec![ServerFrame::error(format!("Invalid message: {e}"))]
            }
        }
    }

    /// Transport closed: unregister if this connection still owns its
    /// identifier. Pending messages stay buffered.
    pub fn close(&mut self, state: &ServerState) {
        if let SessionState::Authenticated(id) = &self.state {
            if state.registry.unregister(id, self.conn_id) {
                info!(client = %id, conn_id = %self.conn_id, "client disconnected");
            } else {
                debug!(client = %id, conn_id = %self.conn_id, "stale connection closed");
            }
        }
        self.state = SessionState::Closed;
    }
}

struct IpGuard {
    state: Arc<ServerState>,
    ip: IpAddr,
}

impl Drop for IpGuard {
    fn drop(&mut self) {
        let mut remove = false;
        if let Some(mut entry) = self.state.ip_connections.get_mut(&self.ip) {
            *entry = entry.saturating_sub(1);
            if *entry == 0 {
                remove = true;
            }
        }
        if remove {
            self.state
                .ip_connections
                .remove_if(&self.ip, |_, v| *v == 0);
        }
    }
}

struct ActiveGuard {
    state: Arc<ServerState>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.state.active_connections.fetch_sub(1, Ordering::AcqRel);
        gauges::dec_connections_active();
    }
}

fn admit_ip(state: &ServerState, ip: IpAddr) -> bool {
    match state.ip_connections.entry(ip) {
        dashmap::mapref::entry::Entry::Occupied(mut entry) => {
            if *entry.get() >= state.config.max_conns_ip {
                return false;
            }
            *entry.get_mut() += 1;
        }
        dashmap::mapref::entry::Entry::Vacant(entry) => {
            entry.insert(1);
        }
    }
    true
}

async fn send_frames<S>(ws_tx: &mut S, frames: &[ServerFrame]) -> Result<(), ParleysError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    for frame in frames {
        match frame.encode() {
            Ok(text) => ws_tx.send(Message::Text(text)).await?,
            Err(e) => debug!(error = %e, "dropping unencodable frame"),
        }
    }
    Ok(())
}

/// Drive one connection until its transport closes, it idles out, it fails
/// to authenticate in time, or the server shuts down.
async fn run_session(
    ws_tx: &mut WsSink,
    ws_rx: &mut WsRecv,
    outbound_rx: &mut mpsc::Receiver<Outbound>,
    session: &mut ConnectionSession,
    state: &ServerState,
    shutdown: &mut watch::Receiver<()>,
) -> Result<(), ParleysError> {
    let idle_timeout = Duration::from_secs(state.config.idle_timeout);
    let auth_deadline = sleep(Duration::from_secs(state.config.auth_timeout));
    tokio::pin!(auth_deadline);
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                last_activity = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let replies = session.handle_text(&text, state);
                        send_frames(ws_tx, &replies).await?;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        counters::frames_malformed_total();
                        send_frames(ws_tx, &[ServerFrame::error(error_text::MALFORMED)]).await?;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            debug!("failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Err(e)) => return Err(ParleysError::WebSocket(e)),
                    _ => {}
                }
            }
            Some(out) = outbound_rx.recv() => {
                match out {
                    Outbound::Frame(text) => ws_tx.send(Message::Text(text)).await?,
                    Outbound::Probe => {
                        if last_activity.elapsed() >= idle_timeout {
                            debug!(conn_id = %session.conn_id(), "idle timeout reached, closing connection");
                            return Ok(());
                        }
                        ws_tx.send(Message::Ping(Vec::new())).await?;
                    }
                }
            }
            () = &mut auth_deadline, if session.client_id().is_none() => {
                debug!(conn_id = %session.conn_id(), "authentication timeout");
                return Err(ParleysError::AuthTimeout);
            }
            _ = shutdown.changed() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                return Ok(());
            }
        }
    }
}

/// Accept the WebSocket handshake on `stream` and run its session.
///
/// # Errors
///
/// Returns an error if a connection limit refuses the peer, the handshake
/// fails, or the transport errors. The registry is cleaned up either way.
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<()>,
) -> Result<(), ParleysError> {
    let active = state.active_connections.fetch_add(1, Ordering::AcqRel);
    gauges::inc_connections_active();
    let _active_guard = ActiveGuard {
        state: state.clone(),
    };
    if active >= state.config.max_conns {
        debug!(peer = %peer_addr, "max connections reached");
        return Err(ParleysError::ConnectionClosed);
    }

    let ip = peer_addr.ip();
    if !admit_ip(&state, ip) {
        debug!(%ip, limit = state.config.max_conns_ip, "per-IP connection limit exceeded");
        return Err(ParleysError::ConnectionClosed);
    }
    let _ip_guard = IpGuard {
        state: state.clone(),
        ip,
    };

    let limit = transport_limit(state.config.max_payload);
    let ws_config = WebSocketConfig {
        max_message_size: Some(limit),
        max_frame_size: Some(limit),
        ..WebSocketConfig::default()
    };
    let ws_stream = tokio_tungstenite::accept_async_with_config(stream, Some(ws_config))
        .await
        .map_err(ParleysError::WebSocket)?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let (tx, mut outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let mut session = ConnectionSession::new(
        tx,
        RateLimiter::new(state.config.msg_rate, state.config.bw_rate),
    );
    debug!(peer = %peer_addr, conn_id = %session.conn_id(), "client connected");

    let result = run_session(
        &mut ws_tx,
        &mut ws_rx,
        &mut outbound_rx,
        &mut session,
        &state,
        &mut shutdown,
    )
    .await;

    session.close(&state);
    result
}
