//! Port Interfaces
//!
//! Contracts between the streaming session and the code around it,
//! following the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`Transport`]: the network steps the session drives, one phase at a
//!   time (resolve, connect, TLS, websocket upgrade, read, write, ping,
//!   close). The real adapter is `WsTransport`; tests inject fakes.
//!
//! ## Driver Ports (Inbound)
//!
//! - [`FrameHandler`]: receives every text frame the session reads and may
//!   queue replies through an [`Outbox`].

use async_trait::async_trait;
use thiserror::Error;

// =============================================================================
// Transport
// =============================================================================

/// Errors reported by a [`Transport`] step.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Host name resolution failed or returned no addresses.
    #[error("resolve failed: {0}")]
    Resolve(String),

    /// TCP connection could not be established.
    #[error("connect failed: {0}")]
    Connect(String),

    /// TLS handshake failed.
    #[error("TLS handshake failed: {0}")]
    Tls(String),

    /// Websocket upgrade was rejected or failed.
    #[error("websocket handshake failed: {0}")]
    Handshake(String),

    /// Reading or writing a frame failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// A step exceeded its deadline.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// A step was invoked before the step it depends on completed.
    #[error("transport not ready for {0}")]
    NotReady(&'static str),
}

/// One unit read from an established connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text frame carrying protocol messages.
    Text(String),
    /// A control frame (ping, pong) or anything else that only proves
    /// the peer is alive.
    Control,
}

/// Network steps driven by the streaming session.
///
/// Each connection attempt calls `resolve`, `connect`, `secure` and
/// `upgrade` in order; any failure abandons the attempt and the session
/// calls [`Transport::reset`] before trying again.
///
/// [`Transport::read`] must be cancel-safe: the session races it against
/// timers and outbound work and drops the future when another branch
/// wins.
#[async_trait]
pub trait Transport: Send {
    /// Resolve the configured host.
    async fn resolve(&mut self) -> Result<(), TransportError>;

    /// Open the TCP connection.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Run the TLS handshake (no-op for plaintext endpoints).
    async fn secure(&mut self) -> Result<(), TransportError>;

    /// Run the websocket upgrade handshake.
    async fn upgrade(&mut self) -> Result<(), TransportError>;

    /// Await the next inbound frame.
    async fn read(&mut self) -> Result<Inbound, TransportError>;

    /// Write one text frame.
    async fn write(&mut self, payload: &str) -> Result<(), TransportError>;

    /// Send a protocol-level ping.
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Drop any partially or fully established connection.
    fn reset(&mut self);
}

// =============================================================================
// Frame Handling
// =============================================================================

/// Outbound payloads queued by a [`FrameHandler`] while it handles a frame.
///
/// The session appends them to its write queue, in order, right after the
/// handler returns.
#[derive(Debug, Default)]
pub struct Outbox {
    pending: Vec<String>,
}

impl Outbox {
    /// Create an empty outbox.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Queue a text payload.
    pub fn send(&mut self, payload: impl Into<String>) {
        self.pending.push(payload.into());
    }

    /// Number of queued payloads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Take the queued payloads in order.
    pub fn drain(&mut self) -> std::vec::Drain<'_, String> {
        self.pending.drain(..)
    }
}

/// Receives frames read by the streaming session.
///
/// Called synchronously on the session task; implementations must not
/// block.
pub trait FrameHandler: Send + 'static {
    /// Handle one text frame.
    fn on_frame(&mut self, frame: &str, outbox: &mut Outbox);

    /// The connection was lost or closed.
    fn on_disconnected(&mut self) {}
}

impl<F> FrameHandler for F
where
    F: FnMut(&str, &mut Outbox) + Send + 'static,
{
    fn on_frame(&mut self, frame: &str, outbox: &mut Outbox) {
        self(frame, outbox);
    }
}
