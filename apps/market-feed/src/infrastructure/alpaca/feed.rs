//! Market Data Feed
//!
//! Protocol client for Alpaca's bar stream, running on top of a
//! [`StreamSession`].
//!
//! # Stream URL
//!
//! - Production: `wss://stream.data.alpaca.markets/v2/{feed}`
//! - Sandbox: `wss://stream.data.sandbox.alpaca.markets/v2/{feed}`
//! - Test mode: `/v2/test` on either host, which replays a fake symbol
//!   (`FAKEPACA`) around the clock
//!
//! An explicit URL override replaces all of the above; a local relay
//! without a port gets 8765.
//!
//! # Protocol
//!
//! Every reconnect starts over: the server greets with `connected`, the
//! feed answers with credentials, and once `authenticated` arrives the
//! current subscription is sent. Nothing from an earlier connection is
//! replayed.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::TimeDelta;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::auth::{AuthHandler, AuthState, AuthStep, Credentials};
use super::codec::JsonCodec;
use super::messages::{StreamMessage, SubscribeRequest, SuccessMessage};
use crate::application::ports::{FrameHandler, Outbox, Transport};
use crate::domain::bar::Bar;
use crate::domain::signal::{Connection, Signal};
use crate::infrastructure::metrics;
use crate::infrastructure::websocket::{
    ConnectionState, EndpointError, SessionConfig, SessionHandle, StreamEndpoint, StreamSession,
    WsTransport,
};

/// Production market-data host.
pub const PRODUCTION_HOST: &str = "stream.data.alpaca.markets";

/// Sandbox market-data host.
pub const SANDBOX_HOST: &str = "stream.data.sandbox.alpaca.markets";

/// Port used when an override URL names none.
pub const DEFAULT_RELAY_PORT: u16 = 8765;

// =============================================================================
// Error Type
// =============================================================================

/// Errors raised by the feed client.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// `start` called twice.
    #[error("feed already started")]
    AlreadyStarted,

    /// Endpoint could not be built.
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] EndpointError),

    /// Unknown mode name.
    #[error("invalid feed mode '{0}', expected production, sandbox or test")]
    InvalidMode(String),

    /// Unknown data feed name.
    #[error("invalid data feed '{0}', expected iex or sip")]
    InvalidFeed(String),
}

// =============================================================================
// Configuration
// =============================================================================

/// Which server to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedMode {
    /// Live market data.
    #[default]
    Production,
    /// Sandbox host.
    Sandbox,
    /// Test stream (`/v2/test`) on the production host.
    Test,
}

impl FromStr for FeedMode {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "live" => Ok(Self::Production),
            "sandbox" => Ok(Self::Sandbox),
            "test" => Ok(Self::Test),
            _ => Err(FeedError::InvalidMode(s.to_string())),
        }
    }
}

/// Market-data feed (data source).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataFeed {
    /// Investors Exchange only, available on free plans.
    #[default]
    Iex,
    /// Consolidated SIP.
    Sip,
}

impl DataFeed {
    /// Path segment for this feed.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Iex => "iex",
            Self::Sip => "sip",
        }
    }
}

impl FromStr for DataFeed {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "iex" => Ok(Self::Iex),
            "sip" => Ok(Self::Sip),
            _ => Err(FeedError::InvalidFeed(s.to_string())),
        }
    }
}

impl fmt::Display for DataFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for the feed client.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// API credentials.
    pub credentials: Credentials,
    /// Data feed.
    pub feed: DataFeed,
    /// Server selection.
    pub mode: FeedMode,
    /// Full URL replacing host, port and path.
    pub url_override: Option<String>,
    /// Duration stamped on decoded bars.
    pub bar_duration: TimeDelta,
    /// Session timing.
    pub session: SessionConfig,
}

impl FeedConfig {
    /// Production IEX feed with one-minute bars.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            feed: DataFeed::default(),
            mode: FeedMode::default(),
            url_override: None,
            bar_duration: TimeDelta::minutes(1),
            session: SessionConfig::default(),
        }
    }

    /// Set the data feed.
    #[must_use]
    pub const fn with_feed(mut self, feed: DataFeed) -> Self {
        self.feed = feed;
        self
    }

    /// Set the server mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: FeedMode) -> Self {
        self.mode = mode;
        self
    }

    /// Connect to `url` instead of an Alpaca host.
    #[must_use]
    pub fn with_url_override(mut self, url: impl Into<String>) -> Self {
        self.url_override = Some(url.into());
        self
    }

    /// Resolve where the session connects.
    ///
    /// # Errors
    ///
    /// Returns an error if the override URL is invalid.
    pub fn endpoint(&self) -> Result<StreamEndpoint, EndpointError> {
        if let Some(url) = &self.url_override {
            return StreamEndpoint::parse_with_default_port(url, Some(DEFAULT_RELAY_PORT));
        }

        let host = match self.mode {
            FeedMode::Sandbox => SANDBOX_HOST,
            FeedMode::Production | FeedMode::Test => PRODUCTION_HOST,
        };
        let path = match self.mode {
            FeedMode::Test => "/v2/test".to_string(),
            FeedMode::Production | FeedMode::Sandbox => format!("/v2/{}", self.feed),
        };
        Ok(StreamEndpoint::secure(host, 443, path))
    }
}

// =============================================================================
// Frame Handling
// =============================================================================

#[derive(Debug)]
struct FeedState {
    auth: AuthHandler,
    desired: Option<Vec<String>>,
}

struct FeedShared {
    state: Mutex<FeedState>,
    codec: JsonCodec,
    bars: Signal<Bar>,
}

impl FeedShared {
    fn handle_frame(&self, frame: &str, outbox: &mut Outbox) {
        let messages = match self.codec.decode(frame) {
            Ok(messages) => messages,
            Err(e) => {
                metrics::record_decode_error();
                tracing::error!(error = %e, frame, "Dropping undecodable frame");
                return;
            }
        };

        for message in messages {
            match message {
                Ok(StreamMessage::Success(success)) => self.on_success(&success, outbox),
                Ok(StreamMessage::Error(error)) => {
                    let classified = self.state.lock().auth.on_error(&error);
                    tracing::error!(
                        code = error.code,
                        msg = %error.msg,
                        error = %classified,
                        "Stream error"
                    );
                }
                Ok(StreamMessage::Subscription(sub)) => {
                    tracing::debug!(bars = ?sub.bars, "Subscription confirmed");
                }
                Ok(StreamMessage::Bar(bar)) => {
                    metrics::record_bar(bar.symbol());
                    self.bars.emit(&bar);
                }
                Ok(StreamMessage::Other(kind)) => {
                    tracing::trace!(kind, "Ignoring unhandled message type");
                }
                Err(e) => {
                    metrics::record_decode_error();
                    tracing::warn!(error = %e, frame, "Skipping malformed message");
                }
            }
        }
    }

    fn on_success(&self, success: &SuccessMessage, outbox: &mut Outbox) {
        let mut state = self.state.lock();
        match state.auth.on_success(success) {
            AuthStep::SendCredentials(request) => {
                tracing::info!("Connected to market data stream, sending credentials");
                self.enqueue(outbox, &request);
            }
            AuthStep::Authenticated => {
                tracing::info!("Market data stream authenticated");
                if let Some(symbols) = &state.desired {
                    tracing::info!(?symbols, "Subscribing to bars");
                    self.enqueue(outbox, &SubscribeRequest::bars(symbols.clone()));
                }
            }
            AuthStep::None => {
                tracing::debug!(msg = ?success.msg, "Ignoring success message");
            }
        }
    }

    fn enqueue<T: serde::Serialize>(&self, outbox: &mut Outbox, message: &T) {
        match self.codec.encode(message) {
            Ok(json) => outbox.send(json),
            Err(e) => tracing::error!(error = %e, "Failed to encode control message"),
        }
    }
}

struct FeedFrameHandler {
    shared: Arc<FeedShared>,
}

impl FrameHandler for FeedFrameHandler {
    fn on_frame(&mut self, frame: &str, outbox: &mut Outbox) {
        self.shared.handle_frame(frame, outbox);
    }

    fn on_disconnected(&mut self) {
        self.shared.state.lock().auth.reset();
        tracing::info!("Market data stream disconnected");
    }
}

// =============================================================================
// Feed Client
// =============================================================================

/// Alpaca bar stream client.
///
/// # Example
///
/// ```no_run
/// use market_feed::infrastructure::alpaca::{Credentials, FeedConfig, FeedMode, MarketFeed};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let credentials = Credentials::new("key", "secret")?;
/// let mut feed = MarketFeed::new(FeedConfig::new(credentials).with_mode(FeedMode::Test));
/// let _bars = feed.connect_handler(|bar| println!("{} {}", bar.symbol(), bar.close()));
/// feed.subscribe_all();
/// feed.start()?;
/// feed.join().await;
/// # Ok(())
/// # }
/// ```
pub struct MarketFeed {
    config: FeedConfig,
    shared: Arc<FeedShared>,
    cancel: CancellationToken,
    session: Option<SessionHandle>,
    task: Option<JoinHandle<()>>,
}

impl fmt::Debug for MarketFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarketFeed")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("listeners", &self.shared.bars.listener_count())
            .finish_non_exhaustive()
    }
}

impl MarketFeed {
    /// Create a feed. Nothing connects until [`MarketFeed::start`].
    #[must_use]
    pub fn new(config: FeedConfig) -> Self {
        let shared = Arc::new(FeedShared {
            state: Mutex::new(FeedState {
                auth: AuthHandler::new(config.credentials.clone()),
                desired: None,
            }),
            codec: JsonCodec::new(config.bar_duration),
            bars: Signal::new(),
        });

        Self {
            config,
            shared,
            cancel: CancellationToken::new(),
            session: None,
            task: None,
        }
    }

    /// Stop the feed when `parent` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// Feed configuration.
    #[must_use]
    pub const fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// URL the feed connects to.
    ///
    /// # Errors
    ///
    /// Returns an error if the override URL is invalid.
    pub fn websocket_url(&self) -> Result<String, FeedError> {
        Ok(self.config.endpoint()?.url())
    }

    /// Connect over the network.
    ///
    /// # Errors
    ///
    /// Returns an error if already started or the endpoint is invalid.
    pub fn start(&mut self) -> Result<(), FeedError> {
        let endpoint = self.config.endpoint()?;
        tracing::info!(url = %endpoint, feed = %self.config.feed, "Starting market data feed");
        self.start_with_transport(WsTransport::new(endpoint))
    }

    /// Connect through a caller-supplied transport.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::AlreadyStarted`] on a second call.
    pub fn start_with_transport<T>(&mut self, transport: T) -> Result<(), FeedError>
    where
        T: Transport + 'static,
    {
        if self.session.is_some() {
            return Err(FeedError::AlreadyStarted);
        }

        let handler = FeedFrameHandler {
            shared: Arc::clone(&self.shared),
        };
        let (session, handle) = StreamSession::new(
            self.config.session.clone(),
            transport,
            handler,
            self.cancel.clone(),
        );
        self.task = Some(session.spawn());
        self.session = Some(handle);
        Ok(())
    }

    /// Stop the session and suppress reconnection. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the session task to finish (after [`MarketFeed::stop`]).
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::error!(error = %e, "Feed session task failed");
        }
    }

    /// Replace the bar subscription with `symbols`.
    ///
    /// Sent now if the stream is authenticated, otherwise as soon as it is.
    /// Subscribing is additive on the server, so symbols dropped from the
    /// previous set are unsubscribed first.
    pub fn subscribe<I, S>(&self, symbols: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let symbols: Vec<String> = symbols.into_iter().map(Into::into).collect();

        let mut state = self.shared.state.lock();
        let previous = state.desired.replace(symbols.clone()).unwrap_or_default();
        if !state.auth.is_authenticated() {
            tracing::debug!(?symbols, "Subscription deferred until authenticated");
            return;
        }
        drop(state);

        let Some(session) = &self.session else {
            return;
        };
        let removed: Vec<String> = previous
            .into_iter()
            .filter(|symbol| !symbols.contains(symbol))
            .collect();

        let mut requests = Vec::with_capacity(2);
        if !removed.is_empty() {
            tracing::info!(symbols = ?removed, "Unsubscribing from bars");
            requests.push(SubscribeRequest::unsubscribe_bars(removed));
        }
        if !symbols.is_empty() {
            tracing::info!(?symbols, "Subscribing to bars");
            requests.push(SubscribeRequest::bars(symbols));
        }

        for request in &requests {
            match self.shared.codec.encode(request) {
                Ok(json) => {
                    session.send(json);
                }
                Err(e) => tracing::error!(error = %e, "Failed to encode subscription"),
            }
        }
    }

    /// Subscribe to bars for every symbol.
    pub fn subscribe_all(&self) {
        self.subscribe(["*"]);
    }

    /// Symbols most recently passed to [`MarketFeed::subscribe`].
    #[must_use]
    pub fn subscribed_symbols(&self) -> Option<Vec<String>> {
        self.shared.state.lock().desired.clone()
    }

    /// Register a bar listener.
    pub fn connect_handler<F>(&self, listener: F) -> Connection
    where
        F: FnMut(&Bar) + Send + 'static,
    {
        self.shared.bars.connect(listener)
    }

    /// Session connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.session
            .as_ref()
            .map_or(ConnectionState::Disconnected, SessionHandle::state)
    }

    /// Authentication state on the current connection.
    #[must_use]
    pub fn auth_state(&self) -> AuthState {
        self.shared.state.lock().auth.state()
    }

    /// Whether the current connection is authenticated.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.auth_state().is_authenticated()
    }

    /// Handle to the running session.
    #[must_use]
    pub const fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }
}

impl Drop for MarketFeed {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> FeedConfig {
        FeedConfig::new(Credentials::new("key", "secret").unwrap())
    }

    fn shared() -> Arc<FeedShared> {
        let feed = MarketFeed::new(config());
        Arc::clone(&feed.shared)
    }

    #[test]
    fn production_url() {
        let feed = MarketFeed::new(config());
        assert_eq!(
            feed.websocket_url().unwrap(),
            "wss://stream.data.alpaca.markets/v2/iex"
        );
    }

    #[test]
    fn sandbox_url_uses_feed() {
        let feed = MarketFeed::new(
            config()
                .with_mode(FeedMode::Sandbox)
                .with_feed(DataFeed::Sip),
        );
        assert_eq!(
            feed.websocket_url().unwrap(),
            "wss://stream.data.sandbox.alpaca.markets/v2/sip"
        );
    }

    #[test]
    fn test_mode_url() {
        let feed = MarketFeed::new(config().with_mode(FeedMode::Test));
        assert_eq!(
            feed.websocket_url().unwrap(),
            "wss://stream.data.alpaca.markets/v2/test"
        );
    }

    #[test]
    fn override_url_defaults_to_relay_port() {
        let feed = MarketFeed::new(config().with_url_override("ws://localhost/v2/test"));
        assert_eq!(feed.websocket_url().unwrap(), "ws://localhost:8765/v2/test");
    }

    #[test]
    fn parses_mode_and_feed() {
        assert_eq!("Sandbox".parse::<FeedMode>().unwrap(), FeedMode::Sandbox);
        assert_eq!("sip".parse::<DataFeed>().unwrap(), DataFeed::Sip);
        assert!("paper".parse::<FeedMode>().is_err());
        assert!("otc".parse::<DataFeed>().is_err());
    }

    #[test]
    fn connected_sends_credentials_and_authenticated_sends_subscription() {
        let shared = shared();
        shared.state.lock().desired = Some(vec!["AAPL".to_string()]);

        let mut outbox = Outbox::new();
        shared.handle_frame(r#"[{"T":"success","msg":"connected"}]"#, &mut outbox);
        assert_eq!(
            outbox.drain().collect::<Vec<_>>(),
            vec![r#"{"action":"auth","key":"key","secret":"secret"}"#]
        );

        shared.handle_frame(r#"[{"T":"success","msg":"authenticated"}]"#, &mut outbox);
        assert_eq!(
            outbox.drain().collect::<Vec<_>>(),
            vec![r#"{"action":"subscribe","bars":["AAPL"]}"#]
        );
        assert!(shared.state.lock().auth.is_authenticated());
    }

    #[test]
    fn bad_frames_send_nothing() {
        let shared = shared();
        let mut outbox = Outbox::new();
        shared.handle_frame("garbage", &mut outbox);
        shared.handle_frame("[]", &mut outbox);
        shared.handle_frame(r#"{"T":"success","msg":"connected"}"#, &mut outbox);
        assert!(outbox.is_empty());
    }

    #[test]
    fn auth_error_is_logged_not_fatal() {
        let shared = shared();
        let mut outbox = Outbox::new();
        shared.handle_frame(
            r#"[{"T":"success","msg":"connected"},{"T":"error","code":402,"msg":"auth failed"}]"#,
            &mut outbox,
        );
        assert_eq!(shared.state.lock().auth.state(), AuthState::Failed);
        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn subscribe_before_start_is_recorded() {
        let feed = MarketFeed::new(config());
        feed.subscribe(["AAPL", "MSFT"]);
        assert_eq!(
            feed.subscribed_symbols(),
            Some(vec!["AAPL".to_string(), "MSFT".to_string()])
        );
        feed.subscribe_all();
        assert_eq!(feed.subscribed_symbols(), Some(vec!["*".to_string()]));
        assert_eq!(feed.state(), ConnectionState::Disconnected);
    }
}
