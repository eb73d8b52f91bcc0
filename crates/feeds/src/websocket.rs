//! WebSocket connection manager for the realtime price feed.
//!
//! One manager owns one connection. It decodes inbound frames into
//! [`PriceRecord`](ticker_core::PriceRecord) batches and forwards queued
//! control frames; it publishes to a channel and never mutates cache or
//! subscription state itself. There is no reconnect loop here: once a
//! connection reaches `Closed`, a supervisor has to build a new manager.

use crate::{
    decode_frame, ConnectionEvent, ConnectionId, ConnectionState, ControlFrame, FeedConfig,
    FeedError, FeedMessage,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};
use url::Url;

/// Malformed frames are logged at WARN once per this many, DEBUG otherwise.
const DECODE_WARN_EVERY: u64 = 100;

/// Owner of a single streaming connection to the price feed.
pub struct ConnectionManager {
    id: ConnectionId,
    config: FeedConfig,
    events: mpsc::Sender<FeedMessage>,
    state: Arc<watch::Sender<ConnectionState>>,
    outbound: Option<mpsc::UnboundedSender<ControlFrame>>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Create a manager that publishes to `events`. Nothing connects until [`open`](Self::open).
    pub fn new(config: FeedConfig, events: mpsc::Sender<FeedMessage>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            id: ConnectionId::next(),
            config,
            events,
            state: Arc::new(state),
            outbound: None,
            task: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Start connecting to `endpoint`.
    ///
    /// Idempotent: a second call on the same manager is a no-op. Only URL
    /// syntax is checked here; everything else is up to the transport.
    pub fn open(&mut self, endpoint: &str) -> Result<(), FeedError> {
        if self.task.is_some() {
            debug!(connection = %self.id, "Connection already opened, ignoring");
            return Ok(());
        }

        let url = parse_endpoint(endpoint)?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound = Some(tx);

        let link = FeedLink::new(self.id, self.events.clone(), Arc::clone(&self.state));
        self.task = Some(tokio::spawn(run_connection(
            url,
            self.config.clone(),
            rx,
            link,
        )));
        Ok(())
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Queue a control frame for the server.
    ///
    /// Returns `false` without error when the connection is not open or the
    /// manager has been closed.
    pub fn send(&self, frame: ControlFrame) -> bool {
        if !self.state().is_open() {
            return false;
        }
        match &self.outbound {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Close the connection.
    ///
    /// Control frames already queued are still written before the close
    /// frame, so a final unsubscribe goes out if the socket allows it.
    ///
    /// The state is `Closed` as soon as this returns; a handshake still in
    /// flight is abandoned and never reports `Connected`.
    pub fn close(&mut self) {
        if self.outbound.take().is_some() {
            debug!(connection = %self.id, "Closing price feed connection");
        }
        self.state.send_replace(ConnectionState::Closed);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("id", &self.id)
            .field("ws_url", &self.config.ws_url)
            .field("state", &self.state())
            .finish()
    }
}

/// Parse a feed endpoint; only `ws` and `wss` are accepted.
pub fn parse_endpoint(endpoint: &str) -> Result<Url, FeedError> {
    let url = Url::parse(endpoint)?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(FeedError::InvalidEndpoint(format!(
            "unsupported scheme {other:?} in {endpoint}"
        ))),
    }
}

/// Downstream side of a connection: state updates and published messages.
struct FeedLink {
    id: ConnectionId,
    events: mpsc::Sender<FeedMessage>,
    state: Arc<watch::Sender<ConnectionState>>,
    frames: u64,
    decode_errors: u64,
}

impl FeedLink {
    fn new(
        id: ConnectionId,
        events: mpsc::Sender<FeedMessage>,
        state: Arc<watch::Sender<ConnectionState>>,
    ) -> Self {
        Self {
            id,
            events,
            state,
            frames: 0,
            decode_errors: 0,
        }
    }

    /// Returns `Ok(false)` if the owner closed the connection during the handshake.
    async fn mark_open(&self) -> Result<bool, FeedError> {
        self.state.send_modify(|state| *state = state.opened());
        if self.state.borrow().is_closed() {
            return Ok(false);
        }
        self.events
            .send(ConnectionEvent::Connected(self.id).into())
            .await
            .map(|_| true)
            .map_err(|_| FeedError::ChannelClosed)
    }

    async fn mark_closed(&self) {
        self.state.send_replace(ConnectionState::Closed);
        let _ = self
            .events
            .send(ConnectionEvent::Closed(self.id).into())
            .await;
    }

    /// Decode a frame and publish its records. Malformed frames are dropped.
    async fn forward_text(&mut self, text: &str) -> Result<(), FeedError> {
        self.frames += 1;
        match decode_frame(text) {
            Ok(records) if records.is_empty() => Ok(()),
            Ok(records) => self
                .events
                .send(FeedMessage::Records {
                    connection: self.id,
                    records,
                })
                .await
                .map_err(|_| FeedError::ChannelClosed),
            Err(e) => {
                self.decode_errors += 1;
                if self.decode_errors % DECODE_WARN_EVERY == 1 {
                    warn!(
                        connection = %self.id,
                        discarded = self.decode_errors,
                        frames = self.frames,
                        "Discarding malformed frame: {}",
                        e
                    );
                } else {
                    debug!(connection = %self.id, "Discarding malformed frame: {}", e);
                }
                Ok(())
            }
        }
    }
}

async fn run_connection(
    url: Url,
    config: FeedConfig,
    outbound: mpsc::UnboundedReceiver<ControlFrame>,
    mut link: FeedLink,
) {
    debug!(connection = %link.id, endpoint = %url, "Connecting to price feed");

    let connect = tokio::time::timeout(config.connect_timeout(), connect_async(url.as_str()));
    let connected = tokio::select! {
        connected = connect => connected,
        _ = closed_by_owner(link.state.subscribe()) => {
            debug!(connection = %link.id, "Closed before the handshake finished");
            link.mark_closed().await;
            return;
        }
    };

    let result = match connected {
        Ok(Ok((ws_stream, response))) => {
            info!(connection = %link.id, status = ?response.status(), "Price feed connected");
            let (write, read) = ws_stream.split();
            match link.mark_open().await {
                Ok(true) => drive(write, read, outbound, &mut link, &config).await,
                Ok(false) => {
                    debug!(connection = %link.id, "Closed before the handshake finished");
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(FeedError::Timeout(format!(
            "connect exceeded {:?}",
            config.connect_timeout()
        ))),
    };

    match result {
        Ok(()) => debug!(connection = %link.id, frames = link.frames, "Price feed closed"),
        Err(e) => warn!(
            connection = %link.id,
            frames = link.frames,
            "Price feed connection lost: {}",
            e
        ),
    }
    link.mark_closed().await;
}

/// Resolves once the manager has been closed.
async fn closed_by_owner(mut state: watch::Receiver<ConnectionState>) {
    loop {
        let closed = state.borrow_and_update().is_closed();
        if closed {
            return;
        }
        if state.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

/// Pump one established connection until it closes.
///
/// `Ok` means an orderly close (either side); `Err` means the transport failed.
async fn drive<S, R>(
    mut write: S,
    mut read: R,
    mut outbound: mpsc::UnboundedReceiver<ControlFrame>,
    link: &mut FeedLink,
    config: &FeedConfig,
) -> Result<(), FeedError>
where
    S: Sink<Message, Error = WsError> + Unpin,
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let period = config.ping_interval();
    let mut ping_timer = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    let mut last_frame = Instant::now();
    let mut ping_sent: Option<Instant> = None;

    loop {
        tokio::select! {
            msg = read.next() => {
                last_frame = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => link.forward_text(&text).await?,
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => link.forward_text(&text).await?,
                        Err(_) => debug!(connection = %link.id, "Ignoring non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Ping(data))) => write.send(Message::Pong(data)).await?,
                    Some(Ok(Message::Pong(_))) => ping_sent = None,
                    Some(Ok(Message::Close(frame))) => {
                        debug!(connection = %link.id, ?frame, "Received close frame");
                        return Ok(());
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(FeedError::Disconnected("Stream ended".to_string())),
                }
            }
            frame = outbound.recv() => match frame {
                Some(frame) => send_control(&mut write, &frame, link.id).await?,
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            },
            _ = ping_timer.tick() => {
                if last_frame.elapsed() > config.stale_timeout() {
                    return Err(FeedError::Disconnected(
                        "Stale connection - no frames received".to_string(),
                    ));
                }
                match ping_sent {
                    Some(sent) if sent.elapsed() > config.ping_timeout() => {
                        return Err(FeedError::Disconnected(
                            "Ping timeout - no PONG received".to_string(),
                        ));
                    }
                    Some(_) => {}
                    None => {
                        write.send(Message::Ping(Vec::new())).await?;
                        ping_sent = Some(Instant::now());
                    }
                }
            }
        }
    }
}

async fn send_control<S>(
    write: &mut S,
    frame: &ControlFrame,
    connection: ConnectionId,
) -> Result<(), FeedError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let text = match frame.to_json() {
        Ok(text) => text,
        Err(e) => {
            warn!(%connection, "Dropping control frame: {}", e);
            return Ok(());
        }
    };
    debug!(
        %connection,
        action = ?frame.action,
        symbols = ?frame.symbols,
        currency = %frame.currency,
        "Sending control frame"
    );
    write.send(Message::Text(text)).await?;
    Ok(())
}
