//! Technical Indicators
//!
//! Indicators consume bars one at a time and expose a named numeric
//! snapshot once they have seen enough history.
//!
//! - [`Ema`]: exponential moving average of the close
//! - [`Atr`]: average true range
//! - [`Macd`]: moving average convergence/divergence
//!
//! Instances are built from an [`IndicatorConfig`] through the
//! [`IndicatorRegistry`] and driven in lockstep by the [`IndicatorEngine`].

mod atr;
mod config;
mod ema;
mod engine;
mod macd;
mod registry;
mod smoothing;

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::domain::bar::Bar;

pub use atr::Atr;
pub use config::IndicatorConfig;
pub use ema::Ema;
pub use engine::{EngineSnapshot, IndicatorEngine};
pub use macd::Macd;
pub use registry::{IndicatorFactory, IndicatorRegistry};

/// Named values reported by one indicator.
pub type Snapshot = BTreeMap<String, f64>;

/// Capability set shared by every indicator.
pub trait Indicator: Send + fmt::Debug {
    /// Whether enough samples have been observed to report a value.
    fn is_ready(&self) -> bool;

    /// Feed one bar.
    fn write(&mut self, bar: &Bar);

    /// Current named values.
    ///
    /// # Errors
    ///
    /// Returns [`IndicatorError::NotReady`] naming the indicator type
    /// before the warm-up completes.
    fn read(&self) -> Result<Snapshot, IndicatorError>;
}

/// Errors raised while configuring or reading indicators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndicatorError {
    /// No factory is registered under this name.
    #[error("unknown indicator: {0}")]
    UnknownIndicator(String),

    /// A required parameter is absent.
    #[error("invalid config for {indicator}: missing parameter '{param}'")]
    MissingParameter {
        /// Indicator name.
        indicator: String,
        /// Parameter name.
        param: String,
    },

    /// A parameter is present but unusable.
    #[error("invalid config for {indicator}: parameter '{param}' = {value} ({reason})")]
    InvalidParameter {
        /// Indicator name.
        indicator: String,
        /// Parameter name.
        param: String,
        /// Value supplied.
        value: i64,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Two configured indicators would report under the same key.
    #[error("duplicate indicator key: {0}")]
    DuplicateKey(String),

    /// The indicator specification text could not be parsed.
    #[error("malformed indicator spec '{0}'")]
    MalformedSpec(String),

    /// Values were requested before warm-up completed.
    #[error("indicators not ready: {}", .pending.join(", "))]
    NotReady {
        /// Keys of the indicators still warming up.
        pending: Vec<String>,
    },
}

impl IndicatorError {
    /// Whether this error comes from configuration rather than reading.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        !matches!(self, Self::NotReady { .. })
    }
}
