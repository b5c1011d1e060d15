//! Streaming Session
//!
//! A long-lived websocket client that survives network failures:
//!
//! - [`SessionMachine`]: pure state machine (connect phases, write queue,
//!   heartbeat, reconnect scheduling)
//! - [`StreamSession`]: tokio driver that executes the machine's actions
//! - [`WsTransport`]: tokio-tungstenite and tokio-rustls adapter
//! - [`ReconnectPolicy`] and [`HeartbeatConfig`]: timing knobs

mod heartbeat;
mod machine;
mod reconnect;
mod session;
mod transport;

pub use heartbeat::HeartbeatConfig;
pub use machine::{
    ConnectionState, HandshakePhase, SessionAction, SessionConfig, SessionEvent, SessionMachine,
};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use session::{SessionHandle, StreamSession};
pub use transport::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_USER_AGENT, EndpointError, StreamEndpoint, WsTransport,
};
