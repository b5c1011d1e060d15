//! Configuration Module
//!
//! Environment-driven settings for the feed, the session and the pipeline.

mod settings;

pub use settings::{AppConfig, ConfigError, DEFAULT_INDICATORS, StreamSettings};
