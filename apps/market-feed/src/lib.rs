#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Feed - Bar Ingestion and Indicator Pipeline
//!
//! Keeps one streaming connection to Alpaca's market data feed alive,
//! folds minute bars into coarser windows and computes indicators over
//! them.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and algorithms
//!   - `bar`: OHLCV bars and the consecutiveness check
//!   - `signal`: ordered listener lists with drop-to-disconnect handles
//!   - `aggregation`: gap-intolerant bar aggregator
//!   - `indicators`: EMA, ATR, MACD, registry and engine
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: transport and frame-handler contracts
//!   - `services`: per-symbol market data pipeline
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `websocket`: session state machine, driver and transport
//!   - `alpaca`: protocol client (auth, subscribe, bar decoding)
//!   - `historical`: CSV bar source and replay
//!   - `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! Alpaca WS ──► StreamSession ──► MarketFeed ──► BarAggregator ──► IndicatorEngine
//!                (reconnect,       (auth,         (1m → Nm)         (EMA, ATR, MACD)
//!                 heartbeat)        subscribe)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Bars, aggregation and indicators with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::aggregation::{AggregationError, BarAggregator};
pub use domain::bar::{Bar, Ohlcv, is_consecutive};
pub use domain::indicators::{
    EngineSnapshot, Indicator, IndicatorConfig, IndicatorEngine, IndicatorError,
    IndicatorRegistry, Snapshot,
};
pub use domain::signal::{Connection, Signal};

// Application
pub use application::ports::{FrameHandler, Inbound, Outbox, Transport, TransportError};
pub use application::services::{
    GapPolicy, MarketDataPipeline, PipelineConfig, PipelineError, SymbolSnapshot,
};

// Feed client
pub use infrastructure::alpaca::{
    Credentials, DataFeed, FeedConfig, FeedError, FeedMode, MarketFeed,
};

// Session
pub use infrastructure::websocket::{ConnectionState, SessionConfig, SessionHandle};

// Configuration
pub use infrastructure::config::{AppConfig, ConfigError};

// Historical data
pub use infrastructure::historical::{CsvBarSource, HistoricalError, replay};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
