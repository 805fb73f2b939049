//! Quote Subscription Client
//!
//! Caller-facing handle. Construction spawns the session (and, via
//! [`QuoteSubscriptionClient::connect`], the STOMP transport) and starts
//! connecting immediately. Commands are fire-and-forget; state is read from
//! the most recently published [`QuoteView`].
//!
//! # Example
//!
//! ```rust,no_run
//! use quote_stream_client::{ClientConfig, QuoteSubscriptionClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = QuoteSubscriptionClient::connect(&ClientConfig::new("http://localhost:8080"))?;
//! client.subscribe_to_stock("005930")?;
//!
//! let mut changes = client.changes();
//! while changes.changed().await.is_ok() {
//!     if let Some(book) = &changes.borrow().stock_data {
//!         println!("{} @ {}", book.ticker, book.price);
//!     }
//! }
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

use super::session::{QuoteSession, SessionCommand, SessionSettings, SubscribeError};
use super::view::QuoteView;
use crate::application::ports::{BusCommand, BusEvent, SubscriptionControl};
use crate::domain::connection::ConnectionState;
use crate::domain::market::{OrderBookSnapshot, Ticker, TradeExecution};
use crate::infrastructure::config::{ClientConfig, ConfigError};
use crate::infrastructure::rest::{RestError, SubscriptionApi};
use crate::infrastructure::stomp::{StompTransport, StompTransportConfig};

const BUS_COMMAND_CAPACITY: usize = 64;
const BUS_EVENT_CAPACITY: usize = 1024;

/// Errors from the client handle.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Session task has stopped.
    #[error("client session is closed")]
    Closed,

    /// Configuration is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// REST client could not be built.
    #[error("subscription API error: {0}")]
    Rest(#[from] RestError),
}

/// Handle to a running quote session.
///
/// Dropping the handle cancels the session and the transport; use
/// [`close`](Self::close) to also wait for the unsubscribe to go out.
pub struct QuoteSubscriptionClient {
    commands: mpsc::UnboundedSender<SessionCommand>,
    view: watch::Receiver<QuoteView>,
    cancel: CancellationToken,
    transport_cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl QuoteSubscriptionClient {
    /// Build the REST adapter and STOMP transport from configuration and
    /// start connecting.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is unusable or the HTTP client cannot
    /// be built.
    pub fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let control = Arc::new(SubscriptionApi::from_config(config)?);
        let transport = StompTransportConfig::from_client_config(config)?;
        Ok(Self::with_transport(
            config.session_settings(),
            control,
            transport,
        ))
    }

    /// Start a session with the STOMP transport and the given REST port.
    #[must_use]
    pub fn with_transport(
        settings: SessionSettings,
        control: Arc<dyn SubscriptionControl>,
        transport: StompTransportConfig,
    ) -> Self {
        let transport_cancel = CancellationToken::new();
        let (bus_tx, bus_rx) = mpsc::channel(BUS_COMMAND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(BUS_EVENT_CAPACITY);

        let transport = StompTransport::new(transport, event_tx, transport_cancel.clone());
        let transport_task = tokio::spawn(async move {
            if let Err(e) = transport.run(bus_rx).await {
                tracing::error!(error = %e, "Bus transport stopped");
            }
        });

        let mut client = Self::with_parts(settings, control, bus_tx, event_rx, transport_cancel);
        client.tasks.push(transport_task);
        client
    }

    /// Start a session on an already running transport.
    ///
    /// The transport consumes `bus` commands, reports on `events`, and stops
    /// when `transport_cancel` fires.
    #[must_use]
    pub fn with_parts(
        settings: SessionSettings,
        control: Arc<dyn SubscriptionControl>,
        bus: mpsc::Sender<BusCommand>,
        events: mpsc::Receiver<BusEvent>,
        transport_cancel: CancellationToken,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (session, view) = QuoteSession::new(settings, control, bus, transport_cancel.clone());
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let session_task = tokio::spawn(session.run(commands_rx, events, cancel.clone()));

        Self {
            commands,
            view,
            cancel,
            transport_cancel,
            tasks: vec![session_task],
        }
    }

    /// Subscribe to `ticker`, replacing any current subscription.
    ///
    /// Deferred until the bus is connected.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] if the session has stopped.
    pub fn subscribe_to_stock(&self, ticker: impl Into<Ticker>) -> Result<(), ClientError> {
        self.send(SessionCommand::Subscribe {
            ticker: ticker.into(),
            ack: None,
        })
    }

    /// Subscribe and wait until the subscription is in effect.
    ///
    /// # Errors
    ///
    /// Returns a [`SubscribeError`] if the subscription was superseded,
    /// rejected upstream (sequenced mode) or the client closed first.
    pub async fn subscribe_confirmed(&self, ticker: impl Into<Ticker>) -> Result<(), SubscribeError> {
        let (ack, confirmation) = oneshot::channel();
        self.send(SessionCommand::Subscribe {
            ticker: ticker.into(),
            ack: Some(ack),
        })
        .map_err(|_| SubscribeError::Closed)?;

        confirmation.await.map_err(|_| SubscribeError::Closed)?
    }

    /// Drop the current subscription. No-op when nothing is subscribed.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] if the session has stopped.
    pub fn unsubscribe_from_stock(&self) -> Result<(), ClientError> {
        self.send(SessionCommand::Unsubscribe)
    }

    /// Whether the bus is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.view.borrow().is_connected()
    }

    /// Bus connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.view.borrow().connection
    }

    /// Latest order book for the active ticker.
    #[must_use]
    pub fn stock_data(&self) -> Option<OrderBookSnapshot> {
        self.view.borrow().stock_data.clone()
    }

    /// Recent executions, newest first.
    #[must_use]
    pub fn executions(&self) -> Vec<TradeExecution> {
        self.view.borrow().executions.clone()
    }

    /// Subscribed ticker.
    #[must_use]
    pub fn active_symbol(&self) -> Option<Ticker> {
        self.view.borrow().active_symbol.clone()
    }

    /// Current view.
    #[must_use]
    pub fn view(&self) -> QuoteView {
        self.view.borrow().clone()
    }

    /// Receiver notified after every state change.
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<QuoteView> {
        self.view.clone()
    }

    /// Stream of views, starting with the current one.
    #[must_use]
    pub fn updates(&self) -> WatchStream<QuoteView> {
        WatchStream::new(self.view.clone())
    }

    /// Unsubscribe, disconnect and wait for background tasks to finish.
    pub async fn close(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Client task ended abnormally");
            }
        }
    }

    fn send(&self, command: SessionCommand) -> Result<(), ClientError> {
        self.commands.send(command).map_err(|_| ClientError::Closed)
    }
}

impl Drop for QuoteSubscriptionClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.transport_cancel.cancel();
    }
}
