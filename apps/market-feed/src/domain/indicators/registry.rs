//! Name-keyed indicator factories.
//!
//! The process-wide registry is built explicitly the first time
//! [`IndicatorRegistry::global`] is called and never changes afterwards.
//! Engines that need a different set of indicators build their own
//! registry with [`IndicatorRegistry::new`] and [`IndicatorRegistry::register`].

use std::collections::HashMap;
use std::sync::OnceLock;

use super::{Atr, Ema, Indicator, IndicatorConfig, IndicatorError, Macd};

/// Builds an indicator instance from its configuration.
pub type IndicatorFactory = fn(&IndicatorConfig) -> Result<Box<dyn Indicator>, IndicatorError>;

static GLOBAL_REGISTRY: OnceLock<IndicatorRegistry> = OnceLock::new();

/// Mapping from indicator name to factory.
#[derive(Debug, Clone, Default)]
pub struct IndicatorRegistry {
    factories: HashMap<String, IndicatorFactory>,
}

impl IndicatorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding `EMA`, `ATR` and `MACD`.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Ema::NAME, |config| Ok(Box::new(Ema::from_config(config)?)));
        registry.register(Atr::NAME, |config| Ok(Box::new(Atr::from_config(config)?)));
        registry.register(Macd::NAME, |config| Ok(Box::new(Macd::from_config(config)?)));
        registry
    }

    /// Shared registry with the built-in indicators.
    #[must_use]
    pub fn global() -> &'static Self {
        GLOBAL_REGISTRY.get_or_init(Self::with_builtins)
    }

    /// Add or replace the factory for `name`.
    pub fn register(&mut self, name: impl Into<String>, factory: IndicatorFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Whether a factory is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build an indicator from its configuration.
    ///
    /// # Errors
    ///
    /// Returns [`IndicatorError::UnknownIndicator`] if no factory matches
    /// the configured name, or the factory's configuration error.
    pub fn create(&self, config: &IndicatorConfig) -> Result<Box<dyn Indicator>, IndicatorError> {
        let factory = self
            .factories
            .get(&config.name)
            .ok_or_else(|| IndicatorError::UnknownIndicator(config.name.clone()))?;
        factory(config)
    }
}
