//! Domain Layer - Bars, aggregation and indicators.
//!
//! Pure, synchronous logic with no I/O. Everything here is driven by
//! plain function calls and can be tested without a network.

/// OHLCV bar type and consecutiveness check.
pub mod bar;

/// Ordered multi-listener dispatch.
pub mod signal;

/// Folding fine-grained bars into coarser windows.
pub mod aggregation;

/// Indicator implementations, registry and engine.
pub mod indicators;
