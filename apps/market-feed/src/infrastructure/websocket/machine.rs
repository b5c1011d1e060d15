//! Session State Machine
//!
//! Pure transition logic for the streaming session. Every input (a step
//! result, a timer, a caller request) is a [`SessionEvent`]; the machine
//! updates its state and answers with the [`SessionAction`]s the driver
//! must perform. No I/O and no clocks live here.
//!
//! ```text
//! Disconnected ──start──► Resolving ──ok──► Connecting ──ok──► Handshaking(Tls)
//!      ▲                                                          │ ok
//!      │ backoff                                                  ▼
//!      └──── any error ◄──── Connected ◄──ok── Handshaking(Protocol)
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use super::heartbeat::HeartbeatConfig;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{Inbound, TransportError};

// =============================================================================
// State
// =============================================================================

/// Handshake sub-phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// TLS negotiation.
    Tls,
    /// Websocket upgrade.
    Protocol,
}

/// Connection state of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection; idle, waiting for backoff, or stopped.
    #[default]
    Disconnected,
    /// Resolving the host name.
    Resolving,
    /// Opening the TCP connection.
    Connecting,
    /// Running a handshake phase.
    Handshaking(HandshakePhase),
    /// Established; reading frames and draining the write queue.
    Connected,
}

impl ConnectionState {
    /// Stable name for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Resolving => "resolving",
            Self::Connecting => "connecting",
            Self::Handshaking(HandshakePhase::Tls) => "handshaking_tls",
            Self::Handshaking(HandshakePhase::Protocol) => "handshaking_protocol",
            Self::Connected => "connected",
        }
    }

    /// Whether the connection is established.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether a connection attempt is in progress.
    #[must_use]
    pub const fn is_connecting(&self) -> bool {
        matches!(
            self,
            Self::Resolving | Self::Connecting | Self::Handshaking(_)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Events and Actions
// =============================================================================

/// Inputs to the state machine.
#[derive(Debug)]
pub enum SessionEvent {
    /// Begin connecting.
    Start,
    /// Disable reconnection and shut down.
    Stop,
    /// Queue an outbound text payload.
    Send(String),
    /// Host resolution finished.
    Resolved(Result<(), TransportError>),
    /// TCP connect finished.
    Connected(Result<(), TransportError>),
    /// TLS handshake finished.
    TlsEstablished(Result<(), TransportError>),
    /// Websocket upgrade finished.
    Upgraded(Result<(), TransportError>),
    /// A read finished.
    Read(Result<Inbound, TransportError>),
    /// The in-flight write finished.
    Written(Result<(), TransportError>),
    /// A heartbeat ping finished.
    Pinged(Result<(), TransportError>),
    /// The heartbeat timer fired.
    HeartbeatElapsed {
        /// Time since anything was last read from the peer.
        silent_for: Duration,
    },
    /// The reconnect backoff timer fired.
    BackoffElapsed,
}

/// Work the driver must perform in response to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Resolve the host.
    Resolve,
    /// Open the TCP connection.
    Connect,
    /// Run the TLS handshake.
    SecureTls,
    /// Run the websocket upgrade.
    Upgrade,
    /// Await the next frame.
    Read,
    /// Write one payload (the head of the queue).
    Write(String),
    /// Send a heartbeat ping.
    Ping,
    /// Hand a text frame to the frame handler.
    Deliver(String),
    /// Arm the heartbeat timer.
    ArmHeartbeat(Duration),
    /// Cancel the heartbeat timer.
    CancelHeartbeat,
    /// Wait, then feed [`SessionEvent::BackoffElapsed`].
    ScheduleReconnect(Duration),
    /// Tear down whatever the transport holds.
    Reset,
    /// Tell the frame handler the connection is gone.
    NotifyDisconnected,
    /// Close the established connection gracefully.
    Close,
    /// Terminate the driver.
    Exit,
}

// =============================================================================
// Machine
// =============================================================================

/// Settings for a streaming session.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Heartbeat interval and silence limit.
    pub heartbeat: HeartbeatConfig,
    /// Backoff between connection attempts.
    pub reconnect: ReconnectConfig,
}

/// Pure session state machine.
#[derive(Debug)]
pub struct SessionMachine {
    state: ConnectionState,
    started: bool,
    stopped: bool,
    reconnect_pending: bool,
    queue: VecDeque<String>,
    write_in_flight: bool,
    heartbeat: HeartbeatConfig,
    reconnect: ReconnectPolicy,
    dropped_writes: u64,
}

impl SessionMachine {
    /// Create a machine in the `Disconnected` state.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            started: false,
            stopped: false,
            reconnect_pending: false,
            queue: VecDeque::new(),
            write_in_flight: false,
            heartbeat: config.heartbeat,
            reconnect: ReconnectPolicy::new(config.reconnect),
            dropped_writes: 0,
        }
    }

    /// Current connection state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether `Stop` has been handled.
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Whether a reconnect is scheduled.
    #[must_use]
    pub const fn is_reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    /// Payloads waiting to be written, including the one in flight.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Whether a write is in flight.
    #[must_use]
    pub const fn is_writing(&self) -> bool {
        self.write_in_flight
    }

    /// Queued payloads discarded because their connection was lost.
    #[must_use]
    pub const fn dropped_writes(&self) -> u64 {
        self.dropped_writes
    }

    /// Failed attempts since the last established connection.
    #[must_use]
    pub const fn reconnect_attempts(&self) -> u32 {
        self.reconnect.attempt_count()
    }

    /// Apply one event and return the actions it requires, in order.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<SessionAction> {
        use ConnectionState as S;
        use SessionAction as A;

        match (event, self.state) {
            (SessionEvent::Start, _) => self.start(),
            (SessionEvent::Stop, _) => self.stop(),
            (SessionEvent::Send(payload), _) => self.enqueue(payload),

            (SessionEvent::Resolved(result), S::Resolving) => {
                self.advance(result, "resolve", S::Connecting, A::Connect)
            }
            (SessionEvent::Connected(result), S::Connecting) => self.advance(
                result,
                "connect",
                S::Handshaking(HandshakePhase::Tls),
                A::SecureTls,
            ),
            (SessionEvent::TlsEstablished(result), S::Handshaking(HandshakePhase::Tls)) => self
                .advance(
                    result,
                    "tls handshake",
                    S::Handshaking(HandshakePhase::Protocol),
                    A::Upgrade,
                ),
            (SessionEvent::Upgraded(result), S::Handshaking(HandshakePhase::Protocol)) => {
                match result {
                    Ok(()) => self.established(),
                    Err(e) => self.fail("websocket handshake", &e),
                }
            }

            (SessionEvent::Read(result), S::Connected) => match result {
                Ok(Inbound::Text(frame)) => vec![A::Deliver(frame), A::Read],
                Ok(Inbound::Control) => vec![A::Read],
                Err(e) => self.fail("read", &e),
            },
            (SessionEvent::Written(result), S::Connected) if self.write_in_flight => {
                match result {
                    Ok(()) => {
                        self.write_in_flight = false;
                        self.queue.pop_front();
                        let mut actions = Vec::new();
                        self.pump_writes(&mut actions);
                        actions
                    }
                    Err(e) => self.fail("write", &e),
                }
            }
            (SessionEvent::HeartbeatElapsed { silent_for }, S::Connected) => {
                if silent_for > self.heartbeat.pong_timeout {
                    let e = TransportError::Timeout("heartbeat");
                    tracing::warn!(
                        silent_ms = silent_for.as_millis(),
                        "No inbound traffic within heartbeat timeout"
                    );
                    self.fail("heartbeat", &e)
                } else {
                    vec![A::Ping]
                }
            }
            (SessionEvent::Pinged(result), S::Connected) => match result {
                Ok(()) => vec![A::ArmHeartbeat(self.heartbeat.ping_interval)],
                Err(e) => self.fail("ping", &e),
            },
            (SessionEvent::BackoffElapsed, S::Disconnected)
                if self.reconnect_pending && !self.stopped =>
            {
                self.reconnect_pending = false;
                self.begin_attempt()
            }

            (event, state) => {
                tracing::trace!(?event, %state, "Ignoring event in current state");
                Vec::new()
            }
        }
    }

    fn start(&mut self) -> Vec<SessionAction> {
        if self.started || self.stopped {
            return Vec::new();
        }
        self.started = true;
        self.begin_attempt()
    }

    fn begin_attempt(&mut self) -> Vec<SessionAction> {
        self.state = ConnectionState::Resolving;
        vec![SessionAction::Resolve]
    }

    fn advance(
        &mut self,
        result: Result<(), TransportError>,
        step: &'static str,
        next: ConnectionState,
        action: SessionAction,
    ) -> Vec<SessionAction> {
        match result {
            Ok(()) => {
                self.state = next;
                vec![action]
            }
            Err(e) => self.fail(step, &e),
        }
    }

    fn established(&mut self) -> Vec<SessionAction> {
        self.state = ConnectionState::Connected;
        self.reconnect.reset();
        tracing::info!(queued = self.queue.len(), "Stream session connected");

        let mut actions = vec![
            SessionAction::ArmHeartbeat(self.heartbeat.ping_interval),
            SessionAction::Read,
        ];
        self.pump_writes(&mut actions);
        actions
    }

    fn enqueue(&mut self, payload: String) -> Vec<SessionAction> {
        if self.stopped {
            tracing::debug!("Session stopped, dropping outbound payload");
            return Vec::new();
        }
        self.queue.push_back(payload);
        let mut actions = Vec::new();
        self.pump_writes(&mut actions);
        actions
    }

    fn pump_writes(&mut self, actions: &mut Vec<SessionAction>) {
        if !self.state.is_connected() || self.write_in_flight {
            return;
        }
        if let Some(next) = self.queue.front() {
            self.write_in_flight = true;
            actions.push(SessionAction::Write(next.clone()));
        }
    }

    fn fail(&mut self, step: &'static str, error: &TransportError) -> Vec<SessionAction> {
        let was_connected = self.state.is_connected();
        self.state = ConnectionState::Disconnected;
        self.write_in_flight = false;

        // Only a lost connection invalidates the queue; a failed attempt
        // never carried it.
        let dropped = if was_connected { self.queue.len() } else { 0 };
        if dropped > 0 {
            self.queue.clear();
            self.dropped_writes += dropped as u64;
            tracing::warn!(dropped, "Discarding payloads queued for the lost connection");
        }

        let mut actions = vec![SessionAction::CancelHeartbeat, SessionAction::Reset];
        if was_connected {
            actions.push(SessionAction::NotifyDisconnected);
        }

        if self.stopped {
            actions.push(SessionAction::Exit);
            return actions;
        }

        let delay = self.reconnect.next_delay();
        self.reconnect_pending = true;
        tracing::warn!(
            step,
            error = %error,
            attempt = self.reconnect.attempt_count(),
            delay_ms = delay.as_millis(),
            "Stream session failed, reconnecting after backoff"
        );
        actions.push(SessionAction::ScheduleReconnect(delay));
        actions
    }

    fn stop(&mut self) -> Vec<SessionAction> {
        if self.stopped {
            return Vec::new();
        }
        self.stopped = true;
        self.reconnect_pending = false;
        self.write_in_flight = false;
        self.queue.clear();

        let previous = self.state;
        self.state = ConnectionState::Disconnected;
        tracing::info!(state = %previous, "Stopping stream session");

        let mut actions = vec![SessionAction::CancelHeartbeat];
        if previous.is_connected() {
            actions.push(SessionAction::Close);
            actions.push(SessionAction::NotifyDisconnected);
        } else if previous.is_connecting() {
            actions.push(SessionAction::Reset);
        }
        actions.push(SessionAction::Exit);
        actions
    }
}
