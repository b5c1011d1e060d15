//! Application Services
//!
//! - [`MarketDataPipeline`]: routes bars by symbol through an aggregator
//!   and indicator engine, applying the configured [`GapPolicy`]

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

use crate::domain::aggregation::{AggregationError, BarAggregator};
use crate::domain::bar::Bar;
use crate::domain::indicators::{EngineSnapshot, IndicatorConfig, IndicatorEngine, IndicatorError};
use crate::domain::signal::{Connection, Signal};
use crate::infrastructure::metrics;

// =============================================================================
// Errors
// =============================================================================

/// Pipeline errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// Aggregation failed (bad window or broken sequence).
    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    /// Indicator configuration or read failed.
    #[error(transparent)]
    Indicator(#[from] IndicatorError),

    /// No bars have been seen for this symbol.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// Unknown gap policy name.
    #[error("invalid gap policy '{0}', expected halt or restart")]
    InvalidGapPolicy(String),
}

// =============================================================================
// Configuration
// =============================================================================

/// What to do when a symbol's bar sequence breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GapPolicy {
    /// Surface the error; the symbol stays halted until restarted.
    #[default]
    Halt,
    /// Drop the partial window and start a new one at the offending bar.
    Restart,
}

impl GapPolicy {
    /// Policy name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Halt => "halt",
            Self::Restart => "restart",
        }
    }
}

impl FromStr for GapPolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "halt" => Ok(Self::Halt),
            "restart" => Ok(Self::Restart),
            _ => Err(PipelineError::InvalidGapPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for GapPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Duration of incoming bars.
    pub bar_duration: TimeDelta,
    /// Duration of aggregated bars fed to the indicators.
    pub aggregate_duration: TimeDelta,
    /// Indicators computed per symbol.
    pub indicators: Vec<IndicatorConfig>,
    /// Reaction to sequencing errors.
    pub gap_policy: GapPolicy,
}

impl PipelineConfig {
    /// Aggregate `bar_duration` bars into `aggregate_duration` bars.
    #[must_use]
    pub const fn new(bar_duration: TimeDelta, aggregate_duration: TimeDelta) -> Self {
        Self {
            bar_duration,
            aggregate_duration,
            indicators: Vec::new(),
            gap_policy: GapPolicy::Halt,
        }
    }

    /// Set the indicators.
    #[must_use]
    pub fn with_indicators(mut self, indicators: Vec<IndicatorConfig>) -> Self {
        self.indicators = indicators;
        self
    }

    /// Set the gap policy.
    #[must_use]
    pub const fn with_gap_policy(mut self, gap_policy: GapPolicy) -> Self {
        self.gap_policy = gap_policy;
        self
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Indicator values for one symbol after an aggregated bar.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolSnapshot {
    /// Symbol.
    pub symbol: String,
    /// Start of the aggregated bar that produced the values.
    pub timestamp: DateTime<Utc>,
    /// Close of that bar.
    pub close: f64,
    /// Indicator values.
    pub indicators: EngineSnapshot,
}

#[derive(Debug)]
struct SymbolPipeline {
    aggregator: BarAggregator,
    engine: IndicatorEngine,
}

/// Per-symbol bar aggregation and indicator computation.
///
/// Symbols are set up on their first bar. Indicator configuration is
/// validated at construction so a bad config never surfaces mid-stream.
#[derive(Debug)]
pub struct MarketDataPipeline {
    config: PipelineConfig,
    symbols: HashMap<String, SymbolPipeline>,
    snapshots: Signal<SymbolSnapshot>,
}

impl MarketDataPipeline {
    /// Build a pipeline using the global indicator registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the aggregation window is invalid or any
    /// indicator config is rejected.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        BarAggregator::new(config.bar_duration, config.aggregate_duration)?;
        IndicatorEngine::from_configs(&config.indicators)?;

        tracing::info!(
            bar_secs = config.bar_duration.num_seconds(),
            aggregate_secs = config.aggregate_duration.num_seconds(),
            indicators = config.indicators.len(),
            gap_policy = %config.gap_policy,
            "Market data pipeline configured"
        );

        Ok(Self {
            config,
            symbols: HashMap::new(),
            snapshots: Signal::new(),
        })
    }

    /// Pipeline configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Symbols seen so far, sorted.
    #[must_use]
    pub fn symbols(&self) -> Vec<&str> {
        let mut symbols: Vec<&str> = self.symbols.keys().map(String::as_str).collect();
        symbols.sort_unstable();
        symbols
    }

    /// Register a listener for snapshots produced by ready engines.
    pub fn connect_snapshot_handler<F>(&self, listener: F) -> Connection
    where
        F: FnMut(&SymbolSnapshot) + Send + 'static,
    {
        self.snapshots.connect(listener)
    }

    /// Feed one bar. Returns a snapshot when the bar completes an
    /// aggregated bar and every indicator for its symbol is ready.
    ///
    /// # Errors
    ///
    /// Under [`GapPolicy::Halt`] returns the sequencing error, and
    /// [`AggregationError::Halted`] for every later bar of that symbol until
    /// [`Self::restart`]. Under [`GapPolicy::Restart`] only a bar that cannot
    /// start a new window either (wrong duration) is an error.
    pub fn on_bar(&mut self, bar: &Bar) -> Result<Option<SymbolSnapshot>, PipelineError> {
        let symbol = bar.symbol();
        if !self.symbols.contains_key(symbol) {
            let pipeline = SymbolPipeline {
                aggregator: BarAggregator::new(
                    self.config.bar_duration,
                    self.config.aggregate_duration,
                )?,
                engine: IndicatorEngine::from_configs(&self.config.indicators)?,
            };
            tracing::debug!(symbol, "Tracking new symbol");
            self.symbols.insert(symbol.to_string(), pipeline);
        }
        let Some(state) = self.symbols.get_mut(symbol) else {
            return Err(PipelineError::UnknownSymbol(symbol.to_string()));
        };

        let aggregated = match state.aggregator.on_bar(bar) {
            Ok(aggregated) => aggregated,
            Err(e) => {
                metrics::record_sequencing_error(symbol);
                match self.config.gap_policy {
                    GapPolicy::Halt => return Err(e.into()),
                    GapPolicy::Restart => {
                        tracing::warn!(
                            symbol,
                            error = %e,
                            "Restarting aggregation window after gap"
                        );
                        state.aggregator.restart();
                        state.aggregator.on_bar(bar)?
                    }
                }
            }
        };

        let Some(aggregated) = aggregated else {
            return Ok(None);
        };
        metrics::record_aggregated_bar(symbol);
        state.engine.on_bar(&aggregated);

        let indicators = match state.engine.read() {
            Ok(indicators) => indicators,
            Err(IndicatorError::NotReady { pending }) => {
                tracing::debug!(symbol, ?pending, "Indicators warming up");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot = SymbolSnapshot {
            symbol: symbol.to_string(),
            timestamp: aggregated.timestamp(),
            close: aggregated.close(),
            indicators,
        };
        self.snapshots.emit(&snapshot);
        Ok(Some(snapshot))
    }

    /// Latest indicator values for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnknownSymbol`] before the first bar and
    /// [`IndicatorError::NotReady`] during warm-up.
    pub fn snapshot(&self, symbol: &str) -> Result<EngineSnapshot, PipelineError> {
        let state = self
            .symbols
            .get(symbol)
            .ok_or_else(|| PipelineError::UnknownSymbol(symbol.to_string()))?;
        Ok(state.engine.read()?)
    }

    /// Whether `symbol` is halted by a sequencing error.
    #[must_use]
    pub fn is_halted(&self, symbol: &str) -> bool {
        self.symbols
            .get(symbol)
            .is_some_and(|state| state.aggregator.is_halted())
    }

    /// Clear the aggregation window of `symbol`, resuming after a halt.
    /// Indicator state is kept.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnknownSymbol`] if no bar was seen for it.
    pub fn restart(&mut self, symbol: &str) -> Result<(), PipelineError> {
        let state = self
            .symbols
            .get_mut(symbol)
            .ok_or_else(|| PipelineError::UnknownSymbol(symbol.to_string()))?;
        state.aggregator.restart();
        tracing::info!(symbol, "Aggregation restarted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;
    use parking_lot::Mutex;
    use test_case::test_case;

    use super::*;
    use crate::domain::bar::Ohlcv;

    fn minute(symbol: &str, index: i64, close: f64) -> Bar {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap();
        Bar::new(
            symbol,
            Ohlcv::new(close, close + 1.0, close - 1.0, close, 100),
            start + TimeDelta::minutes(index),
            TimeDelta::minutes(1),
        )
    }

    fn pipeline(policy: GapPolicy) -> MarketDataPipeline {
        MarketDataPipeline::new(
            PipelineConfig::new(TimeDelta::minutes(1), TimeDelta::minutes(2))
                .with_indicators(vec![IndicatorConfig::new("EMA").with_param("period", 2)])
                .with_gap_policy(policy),
        )
        .unwrap()
    }

    #[test_case("halt", GapPolicy::Halt)]
    #[test_case("RESTART", GapPolicy::Restart)]
    fn parses_gap_policy(input: &str, expected: GapPolicy) {
        assert_eq!(input.parse::<GapPolicy>().unwrap(), expected);
    }

    #[test]
    fn rejects_bad_config() {
        let bad_window = MarketDataPipeline::new(PipelineConfig::new(
            TimeDelta::minutes(2),
            TimeDelta::minutes(3),
        ));
        assert!(matches!(bad_window, Err(PipelineError::Aggregation(_))));

        let bad_indicator = MarketDataPipeline::new(
            PipelineConfig::new(TimeDelta::minutes(1), TimeDelta::minutes(5))
                .with_indicators(vec![IndicatorConfig::new("RSI")]),
        );
        assert_eq!(
            bad_indicator.unwrap_err(),
            PipelineError::Indicator(IndicatorError::UnknownIndicator("RSI".to_string()))
        );
    }

    #[test]
    fn snapshot_after_warm_up() {
        let mut pipeline = pipeline(GapPolicy::Halt);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _conn = pipeline.connect_snapshot_handler(move |s| sink.lock().push(s.clone()));

        assert!(pipeline.on_bar(&minute("AAPL", 0, 10.0)).unwrap().is_none());
        assert!(pipeline.on_bar(&minute("AAPL", 1, 12.0)).unwrap().is_none());
        assert!(pipeline.on_bar(&minute("AAPL", 2, 14.0)).unwrap().is_none());
        let snapshot = pipeline.on_bar(&minute("AAPL", 3, 16.0)).unwrap().unwrap();

        // EMA(2) warm-up is the mean of the two aggregate closes.
        assert_eq!(snapshot.symbol, "AAPL");
        assert!((snapshot.indicators.value("EMA", "ema").unwrap() - 14.0).abs() < 1e-9);
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(pipeline.snapshot("AAPL").unwrap(), snapshot.indicators);
    }

    #[test]
    fn symbols_are_independent() {
        let mut pipeline = pipeline(GapPolicy::Halt);
        pipeline.on_bar(&minute("AAPL", 0, 10.0)).unwrap();
        pipeline.on_bar(&minute("MSFT", 5, 20.0)).unwrap();
        pipeline.on_bar(&minute("AAPL", 1, 11.0)).unwrap();
        pipeline.on_bar(&minute("MSFT", 6, 21.0)).unwrap();
        assert_eq!(pipeline.symbols(), vec!["AAPL", "MSFT"]);
        assert!(matches!(
            pipeline.snapshot("TSLA"),
            Err(PipelineError::UnknownSymbol(_))
        ));
    }

    #[test]
    fn halt_policy_surfaces_gap_until_restart() {
        let mut pipeline = pipeline(GapPolicy::Halt);
        pipeline.on_bar(&minute("AAPL", 0, 10.0)).unwrap();

        let err = pipeline.on_bar(&minute("AAPL", 2, 12.0)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Aggregation(AggregationError::OutOfSequence { .. })
        ));
        assert!(pipeline.is_halted("AAPL"));
        assert_eq!(
            pipeline.on_bar(&minute("AAPL", 3, 13.0)).unwrap_err(),
            PipelineError::Aggregation(AggregationError::Halted)
        );

        pipeline.restart("AAPL").unwrap();
        assert!(!pipeline.is_halted("AAPL"));
        assert!(pipeline.on_bar(&minute("AAPL", 4, 14.0)).unwrap().is_none());
    }

    #[test]
    fn restart_policy_starts_new_window_at_gap() {
        let mut pipeline = pipeline(GapPolicy::Restart);
        pipeline.on_bar(&minute("AAPL", 0, 10.0)).unwrap();

        // Gapped bar opens a fresh window; the next bar completes it.
        assert!(pipeline.on_bar(&minute("AAPL", 5, 15.0)).unwrap().is_none());
        assert!(!pipeline.is_halted("AAPL"));
        assert!(pipeline.on_bar(&minute("AAPL", 6, 16.0)).unwrap().is_none());
        assert!(pipeline.on_bar(&minute("AAPL", 7, 17.0)).unwrap().is_none());
        let snapshot = pipeline.on_bar(&minute("AAPL", 8, 18.0)).unwrap().unwrap();
        assert_eq!(
            snapshot.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 2, 14, 37, 0).unwrap()
        );
    }
}
