//! Quote Session
//!
//! Single event loop owning all subscription state. Caller commands,
//! transport events and the deferred-subscribe poll are processed one at a
//! time, so the quote book needs no locking.
//!
//! # Subscribe sequence
//!
//! 1. Tear down the previous ticker (topic unsubscribes + REST disable,
//!    awaited when the new ticker is the same one)
//! 2. Clear the snapshot and execution log
//! 3. REST enable for the new ticker (spawned, or awaited in sequenced mode)
//! 4. Open the order book and execution topics
//! 5. Record the ticker as active

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::view::QuoteView;
use crate::application::ports::{
    BusCommand, BusEvent, ControlError, SubscriptionControl, SubscriptionId,
};
use crate::domain::connection::{ConnectionEvent, ConnectionState};
use crate::domain::execution_log::DEFAULT_EXECUTION_CAPACITY;
use crate::domain::market::{OrderBookSnapshot, Ticker, TradeExecution};
use crate::domain::subscription::{ExecutionOutcome, QuoteBook, SnapshotOutcome, TopicKind};
use crate::infrastructure::metrics::{self, DiscardReason, RestAction};

/// Default interval between checks while a subscription waits for a connection.
pub const DEFAULT_SUBSCRIBE_RETRY: Duration = Duration::from_secs(1);

// =============================================================================
// Settings and Commands
// =============================================================================

/// Behavioural settings of a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Maximum executions retained.
    pub execution_capacity: usize,
    /// Poll interval for subscriptions requested while disconnected.
    pub subscribe_retry: Duration,
    /// Await the REST enable call before opening topics, failing the
    /// subscription if it is rejected.
    pub sequenced_enable: bool,
    /// Re-open the active ticker's topics after a reconnect.
    ///
    /// Upstream forwarding is left as it was; a dropped bus connection does
    /// not change the server's subscriber count, so no REST call is made.
    pub resubscribe_on_reconnect: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            execution_capacity: DEFAULT_EXECUTION_CAPACITY,
            subscribe_retry: DEFAULT_SUBSCRIBE_RETRY,
            sequenced_enable: false,
            resubscribe_on_reconnect: false,
        }
    }
}

/// Why a confirmed subscription did not take effect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    /// Upstream forwarding could not be enabled (sequenced mode only).
    #[error("upstream enable for {ticker} failed: {source}")]
    EnableFailed {
        /// Ticker that was requested.
        ticker: Ticker,
        /// REST failure.
        source: ControlError,
    },

    /// Transport task is gone.
    #[error("transport is closed")]
    TransportClosed,

    /// A newer subscription request replaced this one while it was deferred.
    #[error("subscription to {0} was superseded")]
    Superseded(Ticker),

    /// Session stopped before the subscription took effect.
    #[error("client is closed")]
    Closed,
}

/// Acknowledgement channel for confirmed subscriptions.
pub type SubscribeAck = oneshot::Sender<Result<(), SubscribeError>>;

/// Commands sent from the client handle to the session.
#[derive(Debug)]
pub enum SessionCommand {
    /// Subscribe to a ticker, replacing the current one.
    Subscribe {
        /// Ticker to subscribe to.
        ticker: Ticker,
        /// Resolved once the subscription takes effect or fails.
        ack: Option<SubscribeAck>,
    },
    /// Drop the current subscription.
    Unsubscribe,
}

#[derive(Debug)]
struct PendingSubscribe {
    ticker: Ticker,
    ack: Option<SubscribeAck>,
    next_poll: Instant,
}

#[derive(Debug, Clone)]
struct TopicHandles {
    order_book: SubscriptionId,
    execution: SubscriptionId,
}

fn respond(ack: Option<SubscribeAck>, result: Result<(), SubscribeError>) {
    if let Some(ack) = ack {
        let _ = ack.send(result);
    }
}

fn new_subscription_id(kind: TopicKind) -> SubscriptionId {
    format!("{}-{}", kind.as_str(), Uuid::new_v4())
}

// =============================================================================
// Quote Session
// =============================================================================

/// Owns the connection state, the quote book and the topic handles.
pub struct QuoteSession {
    settings: SessionSettings,
    control: Arc<dyn SubscriptionControl>,
    bus: mpsc::Sender<BusCommand>,
    transport_cancel: CancellationToken,
    state: ConnectionState,
    has_connected: bool,
    book: QuoteBook,
    topics: Option<TopicHandles>,
    pending: Option<PendingSubscribe>,
    view_tx: watch::Sender<QuoteView>,
}

impl QuoteSession {
    /// Create a session and the receiver its views are published on.
    #[must_use]
    pub fn new(
        settings: SessionSettings,
        control: Arc<dyn SubscriptionControl>,
        bus: mpsc::Sender<BusCommand>,
        transport_cancel: CancellationToken,
    ) -> (Self, watch::Receiver<QuoteView>) {
        let (view_tx, view_rx) = watch::channel(QuoteView::default());
        let book = QuoteBook::new(settings.execution_capacity);
        let session = Self {
            settings,
            control,
            bus,
            transport_cancel,
            state: ConnectionState::Disconnected,
            has_connected: false,
            book,
            topics: None,
            pending: None,
            view_tx,
        };
        (session, view_rx)
    }

    /// Run until cancelled or every client handle is dropped.
    ///
    /// On exit the active subscription is torn down and the transport is
    /// cancelled.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        mut events: mpsc::Receiver<BusEvent>,
        cancel: CancellationToken,
    ) {
        let mut events_open = true;

        loop {
            let next_poll = self
                .pending
                .as_ref()
                .map_or_else(Instant::now, |p| p.next_poll);

            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Quote session cancelled");
                    break;
                }
                command = commands.recv() => {
                    if let Some(command) = command {
                        self.handle_command(command).await;
                    } else {
                        tracing::debug!("All client handles dropped");
                        break;
                    }
                }
                event = events.recv(), if events_open => {
                    if let Some(event) = event {
                        self.handle_bus_event(event).await;
                    } else {
                        tracing::warn!("Transport event channel closed");
                        events_open = false;
                        self.on_connection_event(&ConnectionEvent::Disconnected).await;
                    }
                }
                () = tokio::time::sleep_until(next_poll), if self.pending.is_some() => {
                    self.poll_pending().await;
                }
            }
        }

        self.shutdown().await;
    }

    /// Process one caller command.
    pub async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Subscribe { ticker, ack } => {
                if let Some(previous) = self.pending.take() {
                    tracing::debug!(
                        previous = %previous.ticker,
                        ticker = %ticker,
                        "Deferred subscription superseded"
                    );
                    respond(previous.ack, Err(SubscribeError::Superseded(previous.ticker)));
                }

                if self.state.is_connected() {
                    self.subscribe(ticker, ack).await;
                } else {
                    tracing::warn!(
                        ticker = %ticker,
                        retry_ms = self.settings.subscribe_retry.as_millis(),
                        "Message bus not connected, deferring subscription"
                    );
                    self.pending = Some(PendingSubscribe {
                        ticker,
                        ack,
                        next_poll: Instant::now() + self.settings.subscribe_retry,
                    });
                }
            }
            SessionCommand::Unsubscribe => {
                if let Some(ticker) = self.teardown().await {
                    self.spawn_disable(ticker);
                }
                self.publish();
            }
        }
    }

    /// Process one transport event.
    pub async fn handle_bus_event(&mut self, event: BusEvent) {
        match event {
            BusEvent::Connection(event) => self.on_connection_event(&event).await,
            BusEvent::Message {
                subscription,
                destination,
                body,
            } => self.on_message(&subscription, &destination, &body),
        }
    }

    /// Current connection state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current quote book.
    #[must_use]
    pub const fn book(&self) -> &QuoteBook {
        &self.book
    }

    // -------------------------------------------------------------------------
    // Subscription lifecycle
    // -------------------------------------------------------------------------

    async fn poll_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        if self.state.is_connected() {
            tracing::info!(ticker = %pending.ticker, "Message bus connected, running deferred subscription");
            self.subscribe(pending.ticker, pending.ack).await;
        } else {
            tracing::debug!(ticker = %pending.ticker, "Still not connected, waiting");
            self.pending = Some(PendingSubscribe {
                next_poll: Instant::now() + self.settings.subscribe_retry,
                ..pending
            });
        }
    }

    async fn subscribe(&mut self, ticker: Ticker, ack: Option<SubscribeAck>) {
        if let Some(previous) = self.teardown().await {
            if previous == ticker {
                // The disable must land before the re-enable below.
                disable_upstream(self.control.as_ref(), &previous).await;
            } else {
                self.spawn_disable(previous);
            }
        }
        self.book.reset();

        if self.settings.sequenced_enable {
            if let Err(source) = self.control.enable(&ticker).await {
                metrics::record_rest_failure(RestAction::Enable);
                tracing::warn!(
                    ticker = %ticker,
                    error = %source,
                    "Upstream enable failed, subscription aborted"
                );
                self.publish();
                respond(ack, Err(SubscribeError::EnableFailed { ticker, source }));
                return;
            }
            tracing::info!(ticker = %ticker, "Upstream forwarding enabled");
        } else {
            self.spawn_enable(ticker.clone());
        }

        match self.open_topics(&ticker).await {
            Ok(handles) => self.topics = Some(handles),
            Err(e) => {
                tracing::error!(ticker = %ticker, error = %e, "Failed to open topic subscriptions");
                self.publish();
                respond(ack, Err(e));
                return;
            }
        }

        tracing::info!(ticker = %ticker, "Subscribed");
        self.book.activate(ticker);
        self.publish();
        respond(ack, Ok(()));
    }

    /// Close the active topics and clear the active ticker and snapshot.
    ///
    /// Returns the ticker that was active so the caller can disable upstream
    /// forwarding.
    async fn teardown(&mut self) -> Option<Ticker> {
        if let Some(handles) = self.topics.take() {
            for id in [handles.order_book, handles.execution] {
                if self.bus.send(BusCommand::Unsubscribe { id }).await.is_err() {
                    tracing::debug!("Transport closed, topic subscription already gone");
                }
            }
        }

        let ended = self.book.end();
        if let Some(ticker) = &ended {
            tracing::info!(ticker = %ticker, "Unsubscribed");
        }
        ended
    }

    async fn open_topics(&self, ticker: &str) -> Result<TopicHandles, SubscribeError> {
        let handles = TopicHandles {
            order_book: new_subscription_id(TopicKind::OrderBook),
            execution: new_subscription_id(TopicKind::Execution),
        };

        for (id, kind) in [
            (&handles.order_book, TopicKind::OrderBook),
            (&handles.execution, TopicKind::Execution),
        ] {
            let destination = kind.destination(ticker);
            tracing::debug!(ticker, topic = %destination, "Opening topic subscription");
            self.bus
                .send(BusCommand::Subscribe {
                    id: id.clone(),
                    destination,
                })
                .await
                .map_err(|_| SubscribeError::TransportClosed)?;
        }

        Ok(handles)
    }

    async fn restore_subscription(&mut self) {
        let Some(ticker) = self.book.active_symbol().map(str::to_owned) else {
            return;
        };

        // Forwarding is counted per ticker upstream and survived the drop.
        tracing::info!(ticker = %ticker, "Restoring topic subscriptions after reconnect");
        match self.open_topics(&ticker).await {
            Ok(handles) => self.topics = Some(handles),
            Err(e) => tracing::warn!(ticker = %ticker, error = %e, "Failed to restore subscription"),
        }
    }

    fn spawn_enable(&self, ticker: Ticker) {
        let control = Arc::clone(&self.control);
        tokio::spawn(async move {
            match control.enable(&ticker).await {
                Ok(()) => tracing::info!(ticker = %ticker, "Upstream forwarding enabled"),
                Err(e) => {
                    metrics::record_rest_failure(RestAction::Enable);
                    tracing::warn!(ticker = %ticker, error = %e, "Upstream enable failed");
                }
            }
        });
    }

    fn spawn_disable(&self, ticker: Ticker) {
        let control = Arc::clone(&self.control);
        tokio::spawn(async move {
            disable_upstream(control.as_ref(), &ticker).await;
        });
    }

    async fn shutdown(&mut self) {
        if let Some(pending) = self.pending.take() {
            respond(pending.ack, Err(SubscribeError::Closed));
        }

        if let Some(ticker) = self.teardown().await {
            disable_upstream(self.control.as_ref(), &ticker).await;
        }

        self.transport_cancel.cancel();
        self.state = ConnectionState::Disconnected;
        metrics::set_connection_state(self.state);
        self.publish();
        tracing::info!("Quote session stopped");
    }

    // -------------------------------------------------------------------------
    // Event handling
    // -------------------------------------------------------------------------

    async fn on_connection_event(&mut self, event: &ConnectionEvent) {
        let previous = self.state;
        self.state = previous.apply(event);

        match event {
            ConnectionEvent::Connecting => tracing::debug!("Connecting to message bus"),
            ConnectionEvent::Connected => tracing::info!("Message bus connected"),
            ConnectionEvent::Disconnected => tracing::warn!("Message bus disconnected"),
            ConnectionEvent::TransportError(reason) => {
                tracing::warn!(error = %reason, "Message bus transport error");
            }
            ConnectionEvent::ProtocolError(reason) => {
                tracing::warn!(error = %reason, "Message bus protocol error");
            }
        }
        metrics::set_connection_state(self.state);

        let reconnected = self.has_connected && !previous.is_connected() && self.state.is_connected();
        if self.state.is_connected() {
            self.has_connected = true;
        }

        if reconnected {
            if self.settings.resubscribe_on_reconnect {
                self.restore_subscription().await;
            } else if let Some(ticker) = self.book.active_symbol() {
                tracing::info!(
                    ticker,
                    "Reconnected; topics are not restored until subscribe is called again"
                );
            }
        }

        if previous != self.state {
            self.publish();
        }
    }

    fn on_message(&mut self, subscription: &str, destination: &str, body: &str) {
        let Some((kind, _)) = TopicKind::parse(destination) else {
            tracing::debug!(destination, subscription, "Ignoring message on unknown destination");
            return;
        };
        metrics::record_message_received(kind);

        let changed = match kind {
            TopicKind::OrderBook => self.on_order_book(body),
            TopicKind::Execution => self.on_execution(body),
        };

        if changed {
            self.publish();
        }
    }

    fn on_order_book(&mut self, body: &str) -> bool {
        let snapshot = match OrderBookSnapshot::from_json(body) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                metrics::record_parse_failure(TopicKind::OrderBook);
                tracing::warn!(error = %e, raw = %body, "Failed to parse order book message");
                return false;
            }
        };

        let ticker = snapshot.ticker.clone();
        match self.book.apply_snapshot(snapshot) {
            SnapshotOutcome::Applied => {
                tracing::trace!(ticker = %ticker, "Order book updated");
                true
            }
            SnapshotOutcome::StaleSymbol => {
                metrics::record_message_discarded(TopicKind::OrderBook, DiscardReason::StaleSymbol);
                tracing::debug!(
                    received = %ticker,
                    active = ?self.book.active_symbol(),
                    "Discarding order book for inactive ticker"
                );
                false
            }
        }
    }

    fn on_execution(&mut self, body: &str) -> bool {
        let execution = match TradeExecution::from_json(body) {
            Ok(execution) => execution,
            Err(e) => {
                metrics::record_parse_failure(TopicKind::Execution);
                tracing::warn!(error = %e, raw = %body, "Failed to parse execution message");
                return false;
            }
        };

        let ticker = execution.ticker.clone();
        let outcome = self.book.apply_execution(execution);
        match outcome {
            ExecutionOutcome::Inserted => {
                tracing::trace!(ticker = %ticker, "Execution recorded");
            }
            ExecutionOutcome::Duplicate => {
                metrics::record_message_discarded(TopicKind::Execution, DiscardReason::Duplicate);
                tracing::debug!(ticker = %ticker, "Dropping duplicate execution");
            }
            ExecutionOutcome::OutsideWindow => {
                metrics::record_message_discarded(
                    TopicKind::Execution,
                    DiscardReason::OutsideWindow,
                );
                tracing::debug!(ticker = %ticker, "Execution older than retained window");
            }
            ExecutionOutcome::StaleSymbol => {
                metrics::record_message_discarded(TopicKind::Execution, DiscardReason::StaleSymbol);
                tracing::debug!(
                    received = %ticker,
                    active = ?self.book.active_symbol(),
                    "Discarding execution for inactive ticker"
                );
            }
        }
        outcome.changed()
    }

    fn publish(&self) {
        let view = QuoteView {
            connection: self.state,
            active_symbol: self.book.active_symbol().map(str::to_owned),
            stock_data: self.book.snapshot().cloned(),
            executions: self.book.executions().entries().to_vec(),
        };
        self.view_tx.send_replace(view);
    }
}

async fn disable_upstream(control: &dyn SubscriptionControl, ticker: &str) {
    match control.disable(ticker).await {
        Ok(()) => tracing::info!(ticker, "Upstream forwarding disabled"),
        Err(e) => {
            metrics::record_rest_failure(RestAction::Disable);
            tracing::warn!(ticker, error = %e, "Upstream disable failed");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
