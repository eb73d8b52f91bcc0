//! Consumer surface for realtime prices.
//!
//! [`RealtimeHandle::spawn`] starts a hub task that owns the subscription
//! tracker, the price cache and at most one [`ConnectionManager`]. Consumers
//! register interest through [`PriceWatch`] handles; the connection is opened
//! for the first one and torn down when the last one is dropped.
//!
//! All state changes happen on the hub task, one message at a time, and are
//! published afterwards as a [`RealtimeView`]. Readers never lock anything.
//!
//! ```rust,no_run
//! use ticker_feeds::{FeedConfig, RealtimeHandle};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handle = RealtimeHandle::spawn(FeedConfig::new("wss://feed.example.com/prices"))?;
//! let mut watch = handle.watch(["AAPL-USD"], "USD")?;
//!
//! loop {
//!     let view = watch.changed().await?;
//!     if let Some(display) = view.prices.resolve("AAPL-USD", None) {
//!         println!("AAPL {:.2}", display.value);
//!     }
//! }
//! # }
//! ```

use crate::{
    validate_symbols, ConnectionEvent, ConnectionManager, ConnectionState, ControlFrame,
    FeedConfig, FeedError, FeedMessage, PriceCache, PriceChange, PriceEntry, PriceSnapshot,
    SubscriptionError, SubscriptionTracker,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use ticker_core::Currency;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

/// Capacity of the price-transition broadcast; slow receivers lag, never block.
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// Published state: latest prices plus connectivity.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeView {
    pub prices: PriceSnapshot,
    /// Currency context the prices belong to
    pub currency: Option<Currency>,
    pub status: ConnectionState,
    /// Registered `PriceWatch` handles
    pub consumers: usize,
}

impl RealtimeView {
    fn idle() -> Self {
        Self {
            prices: PriceSnapshot::default(),
            currency: None,
            status: ConnectionState::Closed,
            consumers: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status.is_open()
    }
}

#[derive(Debug)]
enum HubCommand {
    /// Register or replace a consumer's interest
    Interest {
        consumer: u64,
        symbols: BTreeSet<String>,
        currency: Currency,
    },
    Detach {
        consumer: u64,
    },
    Reconnect,
}

/// Cloneable entry point to the realtime hub.
#[derive(Debug, Clone)]
pub struct RealtimeHandle {
    commands: mpsc::UnboundedSender<HubCommand>,
    view: watch::Receiver<RealtimeView>,
    changes: broadcast::Sender<PriceChange>,
    next_consumer: Arc<AtomicU64>,
}

impl RealtimeHandle {
    /// Validate the endpoint and start the hub task. Nothing connects until
    /// the first [`watch`](Self::watch).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(config: FeedConfig) -> Result<Self, FeedError> {
        crate::parse_endpoint(&config.ws_url)?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (feed_tx, feed_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (view_tx, view) = watch::channel(RealtimeView::idle());
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        let worker = HubWorker {
            config,
            consumers: HashMap::new(),
            currency: None,
            tracker: SubscriptionTracker::new(),
            cache: PriceCache::new(),
            connection: None,
            status: ConnectionState::Closed,
            feed_tx,
            view: view_tx,
            changes: changes.clone(),
        };
        tokio::spawn(worker.run(command_rx, feed_rx));

        Ok(Self {
            commands,
            view,
            changes,
            next_consumer: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Register interest in `symbols` priced in `currency`.
    ///
    /// A different currency than the one currently active switches the
    /// context for every consumer.
    pub fn watch<I, S>(&self, symbols: I, currency: &str) -> Result<PriceWatch, SubscriptionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let symbols = validate_symbols(symbols)?;
        let currency = Currency::new(currency)?;
        let consumer = self.next_consumer.fetch_add(1, Ordering::Relaxed);

        self.commands
            .send(HubCommand::Interest {
                consumer,
                symbols,
                currency,
            })
            .map_err(|_| SubscriptionError::HubClosed)?;

        Ok(PriceWatch {
            consumer,
            commands: self.commands.clone(),
            view: self.view.clone(),
            changes: self.changes.clone(),
        })
    }

    /// Latest published view.
    pub fn view(&self) -> RealtimeView {
        self.view.borrow().clone()
    }

    pub fn watch_view(&self) -> watch::Receiver<RealtimeView> {
        self.view.clone()
    }

    /// Price transitions for every watched symbol.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<PriceChange> {
        self.changes.subscribe()
    }

    /// Replace a `Closed` connection with a fresh one.
    ///
    /// Ignored while a connection is alive or nobody is watching. Desired
    /// subscriptions are sent once the new connection opens.
    pub fn reconnect(&self) -> Result<(), SubscriptionError> {
        self.commands
            .send(HubCommand::Reconnect)
            .map_err(|_| SubscriptionError::HubClosed)
    }
}

/// One consumer's registration. Dropping it deregisters the consumer.
#[derive(Debug)]
pub struct PriceWatch {
    consumer: u64,
    commands: mpsc::UnboundedSender<HubCommand>,
    view: watch::Receiver<RealtimeView>,
    changes: broadcast::Sender<PriceChange>,
}

impl PriceWatch {
    /// Replace this consumer's symbols and currency.
    pub fn update<I, S>(&self, symbols: I, currency: &str) -> Result<(), SubscriptionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let symbols = validate_symbols(symbols)?;
        let currency = Currency::new(currency)?;
        self.commands
            .send(HubCommand::Interest {
                consumer: self.consumer,
                symbols,
                currency,
            })
            .map_err(|_| SubscriptionError::HubClosed)
    }

    pub fn view(&self) -> RealtimeView {
        self.view.borrow().clone()
    }

    /// Live entry for `symbol`; `None` means no realtime data yet.
    pub fn price(&self, symbol: &str) -> Option<PriceEntry> {
        self.view.borrow().prices.get(symbol).copied()
    }

    pub fn is_connected(&self) -> bool {
        self.view.borrow().is_connected()
    }

    /// Wait for the next published view.
    pub async fn changed(&mut self) -> Result<RealtimeView, SubscriptionError> {
        self.view
            .changed()
            .await
            .map_err(|_| SubscriptionError::HubClosed)?;
        Ok(self.view.borrow_and_update().clone())
    }

    pub fn changes(&self) -> broadcast::Receiver<PriceChange> {
        self.changes.subscribe()
    }
}

impl Drop for PriceWatch {
    fn drop(&mut self) {
        let _ = self.commands.send(HubCommand::Detach {
            consumer: self.consumer,
        });
    }
}

/// Hub task state. Only this task mutates the tracker and cache.
struct HubWorker {
    config: FeedConfig,
    consumers: HashMap<u64, BTreeSet<String>>,
    currency: Option<Currency>,
    tracker: SubscriptionTracker,
    cache: PriceCache,
    connection: Option<ConnectionManager>,
    status: ConnectionState,
    feed_tx: mpsc::Sender<FeedMessage>,
    view: watch::Sender<RealtimeView>,
    changes: broadcast::Sender<PriceChange>,
}

impl HubWorker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<HubCommand>,
        mut feed_rx: mpsc::Receiver<FeedMessage>,
    ) {
        debug!(endpoint = %self.config.ws_url, "Realtime hub started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(message) = feed_rx.recv() => self.handle_feed(message),
            }
        }
        debug!("Realtime hub stopped");
    }

    fn handle_command(&mut self, command: HubCommand) {
        match command {
            HubCommand::Interest {
                consumer,
                symbols,
                currency,
            } => {
                debug!(consumer, symbols = ?symbols, currency = %currency, "Consumer interest");
                self.consumers.insert(consumer, symbols);
                if self.currency.as_ref() != Some(&currency) {
                    info!(
                        from = ?self.currency.as_ref().map(Currency::as_str),
                        to = %currency,
                        "Switching realtime currency"
                    );
                }
                self.currency = Some(currency);
                self.sync_desired();
                if self.connection.is_none() {
                    self.open_connection();
                }
            }
            HubCommand::Detach { consumer } => {
                if self.consumers.remove(&consumer).is_none() {
                    return;
                }
                debug!(consumer, remaining = self.consumers.len(), "Consumer detached");
                if self.consumers.is_empty() {
                    self.teardown();
                } else {
                    self.sync_desired();
                }
            }
            HubCommand::Reconnect => {
                let alive = self.connection.is_some() && !self.status.is_closed();
                if alive || self.consumers.is_empty() {
                    debug!(status = ?self.status, "Ignoring reconnect request");
                    return;
                }
                info!("Reconnecting realtime price feed");
                self.open_connection();
            }
        }
        self.publish();
    }

    fn handle_feed(&mut self, message: FeedMessage) {
        let current = self.connection.as_ref().map(ConnectionManager::id);
        if current != Some(message.connection()) {
            debug!(connection = %message.connection(), "Ignoring message from stale connection");
            return;
        }

        match message {
            FeedMessage::Event(ConnectionEvent::Connected(id)) => {
                info!(connection = %id, "Realtime price feed open");
                self.status = ConnectionState::Open;
                let frames = self.tracker.on_open();
                self.send_frames(frames);
            }
            FeedMessage::Event(ConnectionEvent::Closed(id)) => {
                warn!(connection = %id, "Realtime price feed closed");
                self.status = ConnectionState::Closed;
                self.tracker.on_closed();
            }
            FeedMessage::Records { records, .. } => {
                let Some(currency) = self.currency.as_ref() else {
                    return;
                };
                let outcome = self.cache.apply_records(&records, currency);
                if outcome.applied == 0 {
                    return;
                }
                // Receivers of a change must find it in the published view.
                self.publish();
                for change in outcome.changes {
                    // No receivers is fine.
                    let _ = self.changes.send(change);
                }
                return;
            }
        }
        self.publish();
    }

    /// Push the union of all consumers' symbols into the tracker.
    fn sync_desired(&mut self) {
        let Some(currency) = self.currency.clone() else {
            return;
        };
        let desired: BTreeSet<String> = self.consumers.values().flatten().cloned().collect();

        match self.tracker.set_desired(desired, currency) {
            Ok(plan) => {
                if plan.clear_cache {
                    self.cache.clear();
                }
                self.send_frames(plan.frames);
            }
            Err(e) => error!("Rejected desired subscriptions: {}", e),
        }
    }

    fn open_connection(&mut self) {
        // Nothing is active on a connection that has not opened yet.
        self.tracker.on_closed();

        let mut manager = ConnectionManager::new(self.config.clone(), self.feed_tx.clone());
        match manager.open(&self.config.ws_url) {
            Ok(()) => {
                debug!(connection = %manager.id(), "Opening realtime price feed");
                self.status = ConnectionState::Connecting;
                self.connection = Some(manager);
            }
            Err(e) => {
                error!("Failed to open realtime price feed: {}", e);
                self.status = ConnectionState::Closed;
                self.connection = None;
            }
        }
    }

    /// Last consumer left: unsubscribe, close, forget everything.
    fn teardown(&mut self) {
        let frames = self.tracker.teardown();
        self.send_frames(frames);
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
        self.tracker = SubscriptionTracker::new();
        self.cache.clear();
        self.currency = None;
        self.status = ConnectionState::Closed;
        info!("Realtime price feed released");
    }

    fn send_frames(&self, frames: Vec<ControlFrame>) {
        let Some(connection) = self.connection.as_ref() else {
            return;
        };
        for frame in frames {
            if !connection.send(frame) {
                debug!(connection = %connection.id(), "Control frame not sent, connection not open");
            }
        }
    }

    fn publish(&self) {
        let next = RealtimeView {
            prices: self.cache.snapshot(),
            currency: self.currency.clone(),
            status: self.status,
            consumers: self.consumers.len(),
        };
        self.view.send_if_modified(|view| {
            if *view == next {
                false
            } else {
                *view = next;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{spawn_mock_feed, within, MockCommand};
    use pretty_assertions::assert_eq;
    use ticker_core::PriceDirection;

    fn currency(code: &str) -> Currency {
        Currency::new(code).unwrap()
    }

    fn strings(symbols: &[&str]) -> Vec<String> {
        symbols.iter().map(|s| s.to_string()).collect()
    }

    async fn wait_for<F>(watch: &mut PriceWatch, cond: F) -> RealtimeView
    where
        F: Fn(&RealtimeView) -> bool,
    {
        within(async {
            loop {
                let view = watch.view();
                if cond(&view) {
                    return view;
                }
                watch.changed().await.unwrap();
            }
        })
        .await
    }

    #[test]
    fn test_spawn_rejects_invalid_endpoint() {
        assert!(matches!(
            RealtimeHandle::spawn(FeedConfig::new("http://feed.example.com")),
            Err(FeedError::InvalidEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_input_fails_at_call_boundary() {
        let handle = RealtimeHandle::spawn(FeedConfig::new("ws://127.0.0.1:9")).unwrap();

        assert!(matches!(
            handle.watch(["BAD SYMBOL"], "USD"),
            Err(SubscriptionError::InvalidSymbol(s)) if s == "BAD SYMBOL"
        ));
        assert!(matches!(
            handle.watch(["AAPL-USD"], "U"),
            Err(SubscriptionError::InvalidCurrency(_))
        ));

        let view = handle.view();
        assert_eq!(view.status, ConnectionState::Closed);
        assert!(view.prices.is_empty());
    }

    #[tokio::test]
    async fn test_currency_switch_drops_late_ticks() {
        let mut feed = spawn_mock_feed().await;
        let handle = RealtimeHandle::spawn(FeedConfig::new(&feed.url)).unwrap();
        let mut watch = handle.watch(["AAPL-USD"], "USD").unwrap();
        let mut changes = watch.changes();

        assert_eq!(
            within(feed.received.recv()).await.unwrap(),
            ControlFrame::subscribe(strings(&["AAPL-USD"]), currency("USD"))
        );

        // A malformed frame is skipped; the next one still lands.
        feed.commands
            .send(MockCommand::Send("{not json".to_string()))
            .unwrap();
        feed.commands
            .send(MockCommand::Send(
                r#"{"symbol":"AAPL-USD","p":189.5,"d1":1.2,"currency":"USD"}"#.to_string(),
            ))
            .unwrap();
        let view = wait_for(&mut watch, |v| v.prices.contains("AAPL-USD")).await;
        assert_eq!(view.prices.get("AAPL-USD").unwrap().price(), Some(189.5));
        assert!(watch.is_connected());

        feed.commands
            .send(MockCommand::Send(
                r#"{"symbol":"AAPL-USD","p":190.25,"currency":"USD"}"#.to_string(),
            ))
            .unwrap();
        assert_eq!(
            within(changes.recv()).await.unwrap(),
            PriceChange {
                symbol: "AAPL-USD".to_string(),
                previous: 189.5,
                current: 190.25,
                direction: PriceDirection::Up,
            }
        );

        watch.update(["AAPL-USD"], "TRY").unwrap();
        let view = wait_for(&mut watch, |v| v.currency == Some(currency("TRY"))).await;
        assert!(view.prices.is_empty());

        assert_eq!(
            within(feed.received.recv()).await.unwrap(),
            ControlFrame::unsubscribe(strings(&["AAPL-USD"]), currency("USD"))
        );
        assert_eq!(
            within(feed.received.recv()).await.unwrap(),
            ControlFrame::subscribe(strings(&["AAPL-USD"]), currency("TRY"))
        );

        feed.commands
            .send(MockCommand::Send(
                r#"{"symbol":"AAPL-USD","p":191.0,"currency":"USD"}"#.to_string(),
            ))
            .unwrap();
        feed.commands
            .send(MockCommand::Send(
                r#"[{"symbol":"AAPL-USD","p":6100.0,"currency":"TRY"}]"#.to_string(),
            ))
            .unwrap();

        let view = wait_for(&mut watch, |v| v.prices.contains("AAPL-USD")).await;
        assert_eq!(watch.price("AAPL-USD").and_then(|e| e.price()), Some(6100.0));
        assert_eq!(view.prices.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_change_event_follows_published_view() {
        let mut feed = spawn_mock_feed().await;
        let handle = RealtimeHandle::spawn(FeedConfig::new(&feed.url)).unwrap();
        let mut watch = handle.watch(["A"], "USD").unwrap();
        let mut changes = watch.changes();

        within(feed.received.recv()).await.unwrap();
        feed.commands
            .send(MockCommand::Send(
                r#"{"symbol":"A","p":1.0,"currency":"USD"}"#.to_string(),
            ))
            .unwrap();
        wait_for(&mut watch, |v| v.prices.contains("A")).await;

        for n in 2..=100 {
            let price = n as f64;
            feed.commands
                .send(MockCommand::Send(format!(
                    r#"{{"symbol":"A","p":{price:.1},"currency":"USD"}}"#
                )))
                .unwrap();

            let change = within(changes.recv()).await.unwrap();
            assert_eq!(change.current, price);
            assert_eq!(
                watch.price("A").and_then(|entry| entry.price()),
                Some(change.current)
            );
        }
    }

    #[tokio::test]
    async fn test_consumers_share_one_connection() {
        let mut feed = spawn_mock_feed().await;
        let handle = RealtimeHandle::spawn(FeedConfig::new(&feed.url)).unwrap();

        let first = handle.watch(["X", "Y"], "USD").unwrap();
        assert_eq!(
            within(feed.received.recv()).await.unwrap(),
            ControlFrame::subscribe(strings(&["X", "Y"]), currency("USD"))
        );

        let second = handle.watch(["Y", "Z"], "USD").unwrap();
        assert_eq!(
            within(feed.received.recv()).await.unwrap(),
            ControlFrame::subscribe(strings(&["Z"]), currency("USD"))
        );

        drop(first);
        assert_eq!(
            within(feed.received.recv()).await.unwrap(),
            ControlFrame::unsubscribe(strings(&["X"]), currency("USD"))
        );

        let mut view_rx = handle.watch_view();
        drop(second);
        assert_eq!(
            within(feed.received.recv()).await.unwrap(),
            ControlFrame::unsubscribe(strings(&["Y", "Z"]), currency("USD"))
        );

        within(view_rx.wait_for(|v| v.status.is_closed() && v.currency.is_none()))
            .await
            .unwrap();
        assert_eq!(within(feed.accepted.recv()).await, Some(1));
    }

    #[tokio::test]
    async fn test_reconnect_resubscribes_desired_set() {
        let mut feed = spawn_mock_feed().await;
        let handle = RealtimeHandle::spawn(FeedConfig::new(&feed.url)).unwrap();
        let mut watch = handle.watch(["BTC-USD"], "USD").unwrap();

        assert_eq!(
            within(feed.received.recv()).await.unwrap(),
            ControlFrame::subscribe(strings(&["BTC-USD"]), currency("USD"))
        );
        wait_for(&mut watch, RealtimeView::is_connected).await;

        feed.commands.send(MockCommand::Close).unwrap();
        wait_for(&mut watch, |v| v.status.is_closed()).await;

        handle.reconnect().unwrap();
        assert_eq!(
            within(feed.received.recv()).await.unwrap(),
            ControlFrame::subscribe(strings(&["BTC-USD"]), currency("USD"))
        );
        wait_for(&mut watch, RealtimeView::is_connected).await;

        assert_eq!(within(feed.accepted.recv()).await, Some(1));
        assert_eq!(within(feed.accepted.recv()).await, Some(2));
    }

    #[tokio::test]
    async fn test_reconnect_while_open_is_ignored() {
        let mut feed = spawn_mock_feed().await;
        let handle = RealtimeHandle::spawn(FeedConfig::new(&feed.url)).unwrap();
        let watch = handle.watch(["X"], "USD").unwrap();

        assert_eq!(
            within(feed.received.recv()).await.unwrap(),
            ControlFrame::subscribe(strings(&["X"]), currency("USD"))
        );

        handle.reconnect().unwrap();
        watch.update(["X", "Y"], "USD").unwrap();

        // Same connection: only the diff goes out.
        assert_eq!(
            within(feed.received.recv()).await.unwrap(),
            ControlFrame::subscribe(strings(&["Y"]), currency("USD"))
        );
        assert_eq!(within(feed.accepted.recv()).await, Some(1));
        assert!(feed.accepted.try_recv().is_err());
    }
}
