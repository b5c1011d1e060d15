//! Application Layer - Use cases and port definitions.
//!
//! Ports describe what the stream session needs from the outside world;
//! services compose domain logic into the bar pipeline.

/// Port interfaces for the stream transport and frame handling.
pub mod ports;

/// Application services for bar aggregation and indicators.
pub mod services;
