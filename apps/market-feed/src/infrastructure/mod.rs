//! Infrastructure Layer - Adapters and external integrations.
//!
//! - `websocket`: stream session, transport and timers
//! - `alpaca`: market data protocol client
//! - `historical`: CSV bar loading and replay
//! - `config`: environment configuration
//! - `metrics`: Prometheus metrics
//! - `telemetry`: logging setup

/// Alpaca market data protocol.
pub mod alpaca;

/// Configuration loading.
pub mod config;

/// Historical bar files.
pub mod historical;

/// Prometheus metrics.
pub mod metrics;

/// Logging setup.
pub mod telemetry;

/// Persistent websocket session.
pub mod websocket;
