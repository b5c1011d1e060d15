//! Session Driver
//!
//! Runs a [`SessionMachine`] on a tokio task. Actions are executed one at a
//! time; connection steps and writes are awaited inline and raced against
//! cancellation, while an idle session waits on whichever comes first:
//! caller sends, the next inbound frame, the heartbeat timer, the reconnect
//! timer, or shutdown.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use super::heartbeat::HeartbeatTimer;
use super::machine::{ConnectionState, SessionAction, SessionConfig, SessionEvent, SessionMachine};
use crate::application::ports::{FrameHandler, Inbound, Outbox, Transport, TransportError};
use crate::infrastructure::metrics;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Handle
// =============================================================================

/// Caller-side handle to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    state: watch::Receiver<ConnectionState>,
}

impl SessionHandle {
    /// Queue a text payload. Returns `false` once the session task is gone.
    pub fn send(&self, payload: impl Into<String>) -> bool {
        self.commands.send(payload.into()).is_ok()
    }

    /// Stop the session. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether stop has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Latest published connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the session reports `target`.
    ///
    /// Returns `false` if the session exits first without reaching it.
    pub async fn wait_for(&self, target: ConnectionState) -> bool {
        let mut rx = self.state.clone();
        rx.wait_for(|state| *state == target).await.is_ok()
    }

    /// Receiver for every published state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

// =============================================================================
// Driver
// =============================================================================

enum Wake {
    Stop,
    Send(String),
    Read(Result<Inbound, TransportError>),
    Heartbeat,
    Backoff,
}

/// A streaming session bound to a transport and a frame handler.
pub struct StreamSession<T, H> {
    machine: SessionMachine,
    transport: T,
    handler: H,
    commands: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
    state: watch::Sender<ConnectionState>,
    heartbeat: HeartbeatTimer,
    backoff: Option<Instant>,
    reading: bool,
}

impl<T, H> StreamSession<T, H>
where
    T: Transport,
    H: FrameHandler,
{
    /// Create a session and its handle. Nothing happens until it runs.
    ///
    /// Cancelling `cancel` stops the session like [`SessionHandle::stop`].
    pub fn new(
        config: SessionConfig,
        transport: T,
        handler: H,
        cancel: CancellationToken,
    ) -> (Self, SessionHandle) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let session = Self {
            machine: SessionMachine::new(config),
            transport,
            handler,
            commands: commands_rx,
            cancel: cancel.clone(),
            state: state_tx,
            heartbeat: HeartbeatTimer::new(),
            backoff: None,
            reading: false,
        };
        let handle = SessionHandle {
            commands: commands_tx,
            cancel,
            state: state_rx,
        };
        (session, handle)
    }

    /// Run on a new tokio task.
    pub fn spawn(self) -> JoinHandle<()>
    where
        T: 'static,
    {
        tokio::spawn(self.run())
    }

    /// Connect and keep the session alive until stopped.
    pub async fn run(mut self) {
        let mut pending = VecDeque::new();
        self.dispatch(SessionEvent::Start, &mut pending);

        loop {
            while let Some(action) = pending.pop_front() {
                if action == SessionAction::Exit {
                    self.transport.reset();
                    tracing::info!("Stream session exited");
                    return;
                }
                self.execute(action, &mut pending).await;
            }

            let event = self.next_event().await;
            self.dispatch(event, &mut pending);
        }
    }

    fn dispatch(&mut self, event: SessionEvent, pending: &mut VecDeque<SessionAction>) {
        let dropped_before = self.machine.dropped_writes();
        let actions = self.machine.handle(event);

        let dropped = self.machine.dropped_writes() - dropped_before;
        if dropped > 0 {
            metrics::record_dropped_writes(dropped);
        }

        let next = self.machine.state();
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            tracing::debug!(from = %current, to = %next, "Session state changed");
            metrics::set_connection_state(next);
            *current = next;
            true
        });

        pending.extend(actions);
    }

    async fn execute(&mut self, action: SessionAction, pending: &mut VecDeque<SessionAction>) {
        let event = match action {
            SessionAction::Resolve => guarded(&self.cancel, self.transport.resolve())
                .await
                .map(SessionEvent::Resolved),
            SessionAction::Connect => guarded(&self.cancel, self.transport.connect())
                .await
                .map(SessionEvent::Connected),
            SessionAction::SecureTls => guarded(&self.cancel, self.transport.secure())
                .await
                .map(SessionEvent::TlsEstablished),
            SessionAction::Upgrade => {
                let outcome = guarded(&self.cancel, self.transport.upgrade()).await;
                if matches!(outcome, Some(Ok(()))) {
                    self.heartbeat.record_inbound();
                }
                outcome.map(SessionEvent::Upgraded)
            }
            SessionAction::Write(payload) => guarded(&self.cancel, self.transport.write(&payload))
                .await
                .map(SessionEvent::Written),
            SessionAction::Ping => guarded(&self.cancel, self.transport.ping())
                .await
                .map(SessionEvent::Pinged),
            SessionAction::Read => {
                self.reading = true;
                return;
            }
            SessionAction::Deliver(frame) => {
                metrics::record_frame();
                let mut outbox = Outbox::new();
                self.handler.on_frame(&frame, &mut outbox);
                for payload in outbox.drain() {
                    self.dispatch(SessionEvent::Send(payload), pending);
                }
                return;
            }
            SessionAction::ArmHeartbeat(interval) => {
                self.heartbeat.arm(interval);
                return;
            }
            SessionAction::CancelHeartbeat => {
                self.heartbeat.cancel();
                return;
            }
            SessionAction::ScheduleReconnect(delay) => {
                metrics::record_reconnect();
                tracing::info!(
                    attempt = self.machine.reconnect_attempts(),
                    delay_ms = delay.as_millis(),
                    "Reconnecting to stream"
                );
                self.backoff = Some(Instant::now() + delay);
                return;
            }
            SessionAction::Reset => {
                self.reading = false;
                self.transport.reset();
                return;
            }
            SessionAction::NotifyDisconnected => {
                self.handler.on_disconnected();
                return;
            }
            SessionAction::Close => {
                self.reading = false;
                match tokio::time::timeout(CLOSE_TIMEOUT, self.transport.close()).await {
                    Ok(Ok(())) => tracing::debug!("Stream closed"),
                    Ok(Err(e)) => tracing::debug!(error = %e, "Close handshake failed"),
                    Err(_) => tracing::warn!("Close handshake timed out"),
                }
                self.transport.reset();
                return;
            }
            SessionAction::Exit => return,
        };

        self.dispatch(event.unwrap_or(SessionEvent::Stop), pending);
    }

    async fn next_event(&mut self) -> SessionEvent {
        let heartbeat_at = self.heartbeat.deadline();
        let backoff_at = self.backoff;
        let stopped = self.machine.is_stopped();

        let wake = tokio::select! {
            () = self.cancel.cancelled(), if !stopped => Wake::Stop,
            Some(payload) = self.commands.recv() => Wake::Send(payload),
            result = self.transport.read(), if self.reading => Wake::Read(result),
            () = sleep_until(heartbeat_at.unwrap_or_else(Instant::now)), if heartbeat_at.is_some() => {
                Wake::Heartbeat
            }
            () = sleep_until(backoff_at.unwrap_or_else(Instant::now)), if backoff_at.is_some() => {
                Wake::Backoff
            }
        };

        match wake {
            Wake::Stop => SessionEvent::Stop,
            Wake::Send(payload) => SessionEvent::Send(payload),
            Wake::Read(result) => {
                self.reading = false;
                if result.is_ok() {
                    self.heartbeat.record_inbound();
                }
                SessionEvent::Read(result)
            }
            Wake::Heartbeat => {
                self.heartbeat.fire();
                SessionEvent::HeartbeatElapsed {
                    silent_for: self.heartbeat.silence(),
                }
            }
            Wake::Backoff => {
                self.backoff = None;
                SessionEvent::BackoffElapsed
            }
        }
    }
}

async fn guarded<F: Future>(cancel: &CancellationToken, step: F) -> Option<F::Output> {
    tokio::select! {
        out = step => Some(out),
        () = cancel.cancelled() => None,
    }
}
