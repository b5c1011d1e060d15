//! Bar Aggregation
//!
//! Folds a strict, gap-free sequence of fixed-duration bars for one symbol
//! into bars of a coarser duration.
//!
//! # Window Rules
//!
//! - `open`: first bar's open
//! - `high` / `low`: max / min across the window
//! - `close`: last bar's close
//! - `volume`: sum across the window
//! - `timestamp`: first bar's timestamp
//!
//! Every bar after the first must start exactly where the previous one
//! ended. A violation halts the aggregator until [`BarAggregator::restart`]
//! is called; nothing is skipped silently.

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

use crate::domain::bar::Bar;
use crate::domain::signal::{Connection, Signal};

/// Errors raised while aggregating bars.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    /// Output duration is not a positive whole multiple of the input.
    #[error("invalid aggregation window: {output} is not a positive multiple of {input}")]
    InvalidWindow {
        /// Input bar duration.
        input: TimeDelta,
        /// Requested output duration.
        output: TimeDelta,
    },

    /// Bar timestamp does not match the expected sequence.
    #[error("bar for {symbol} at {actual} is out of sequence, expected {expected}")]
    OutOfSequence {
        /// Symbol of the offending bar.
        symbol: String,
        /// Timestamp the aggregator expected next.
        expected: DateTime<Utc>,
        /// Timestamp actually received.
        actual: DateTime<Utc>,
    },

    /// Bar belongs to a different symbol than the stream being aggregated.
    #[error("bar for {actual} delivered to aggregator for {expected}")]
    SymbolMismatch {
        /// Symbol being aggregated.
        expected: String,
        /// Symbol of the offending bar.
        actual: String,
    },

    /// Bar duration differs from the configured input duration.
    #[error("bar duration {actual} does not match input duration {expected}")]
    DurationMismatch {
        /// Configured input duration.
        expected: TimeDelta,
        /// Duration of the offending bar.
        actual: TimeDelta,
    },

    /// A previous sequencing error stopped this aggregator.
    #[error("aggregator halted after a sequencing error; restart required")]
    Halted,
}

impl AggregationError {
    /// Whether this error reports a break in the input sequence.
    #[must_use]
    pub const fn is_sequencing(&self) -> bool {
        matches!(
            self,
            Self::OutOfSequence { .. } | Self::SymbolMismatch { .. } | Self::DurationMismatch { .. }
        )
    }
}

#[derive(Debug, Default)]
struct WindowState {
    current: Option<Bar>,
    count: usize,
}

/// Combines `N` consecutive input bars into one output bar.
#[derive(Debug)]
pub struct BarAggregator {
    input_duration: TimeDelta,
    output_duration: TimeDelta,
    window_size: usize,
    window: WindowState,
    symbol: Option<String>,
    expected_next: Option<DateTime<Utc>>,
    halted: bool,
    listeners: Signal<Bar>,
}

impl BarAggregator {
    /// Create an aggregator turning `input` bars into `output` bars.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError::InvalidWindow`] unless `output` is a
    /// positive whole multiple of `input`.
    pub fn new(input: TimeDelta, output: TimeDelta) -> Result<Self, AggregationError> {
        let invalid = || AggregationError::InvalidWindow { input, output };

        let input_ms = input.num_milliseconds();
        let output_ms = output.num_milliseconds();
        if input_ms <= 0 || output_ms <= 0 || output_ms % input_ms != 0 {
            return Err(invalid());
        }
        let window_size = usize::try_from(output_ms / input_ms).map_err(|_| invalid())?;

        Ok(Self {
            input_duration: input,
            output_duration: output,
            window_size,
            window: WindowState::default(),
            symbol: None,
            expected_next: None,
            halted: false,
            listeners: Signal::new(),
        })
    }

    /// Number of input bars per output bar.
    #[must_use]
    pub const fn window_size(&self) -> usize {
        self.window_size
    }

    /// Duration of the input bars.
    #[must_use]
    pub const fn input_duration(&self) -> TimeDelta {
        self.input_duration
    }

    /// Duration of the emitted bars.
    #[must_use]
    pub const fn output_duration(&self) -> TimeDelta {
        self.output_duration
    }

    /// Timestamp the next input bar must carry, if known.
    #[must_use]
    pub const fn expected_next(&self) -> Option<DateTime<Utc>> {
        self.expected_next
    }

    /// Bars folded into the window in progress.
    #[must_use]
    pub const fn pending_bars(&self) -> usize {
        self.window.count
    }

    /// Whether a sequencing error has stopped this aggregator.
    #[must_use]
    pub const fn is_halted(&self) -> bool {
        self.halted
    }

    /// Register a listener for completed aggregate bars.
    pub fn connect_aggregated_bar_handler<F>(&self, listener: F) -> Connection
    where
        F: FnMut(&Bar) + Send + 'static,
    {
        self.listeners.connect(listener)
    }

    /// Fold one input bar. Returns the completed aggregate when this bar
    /// closes a window; listeners receive it before this returns.
    ///
    /// # Errors
    ///
    /// Returns a sequencing error if the bar does not continue the stream,
    /// after which the aggregator stays halted until [`Self::restart`].
    pub fn on_bar(&mut self, bar: &Bar) -> Result<Option<Bar>, AggregationError> {
        if self.halted {
            return Err(AggregationError::Halted);
        }
        if let Err(e) = self.check_sequence(bar) {
            self.halted = true;
            tracing::warn!(error = %e, "Bar sequence broken, aggregator halted");
            return Err(e);
        }

        self.symbol.get_or_insert_with(|| bar.symbol().to_string());
        self.expected_next = Some(bar.end());
        self.window.count += 1;
        self.window.current = Some(match self.window.current.take() {
            None => Bar::new(
                bar.symbol(),
                *bar.ohlcv(),
                bar.timestamp(),
                self.output_duration,
            ),
            Some(current) => Bar::new(
                current.symbol(),
                current.ohlcv().merge(bar.ohlcv()),
                current.timestamp(),
                self.output_duration,
            ),
        });

        if self.window.count < self.window_size {
            return Ok(None);
        }

        let completed = std::mem::take(&mut self.window).current;
        if let Some(aggregate) = &completed {
            tracing::debug!(
                symbol = aggregate.symbol(),
                timestamp = %aggregate.timestamp(),
                close = aggregate.close(),
                "Aggregated bar completed"
            );
            self.listeners.emit(aggregate);
        }
        Ok(completed)
    }

    /// Discard the window in progress and the expected timestamp, clearing
    /// a halt. Listeners stay registered.
    pub fn restart(&mut self) {
        self.window = WindowState::default();
        self.symbol = None;
        self.expected_next = None;
        self.halted = false;
    }

    fn check_sequence(&self, bar: &Bar) -> Result<(), AggregationError> {
        if bar.duration() != self.input_duration {
            return Err(AggregationError::DurationMismatch {
                expected: self.input_duration,
                actual: bar.duration(),
            });
        }
        if let Some(symbol) = &self.symbol
            && symbol != bar.symbol()
        {
            return Err(AggregationError::SymbolMismatch {
                expected: symbol.clone(),
                actual: bar.symbol().to_string(),
            });
        }
        if let Some(expected) = self.expected_next
            && expected != bar.timestamp()
        {
            return Err(AggregationError::OutOfSequence {
                symbol: bar.symbol().to_string(),
                expected,
                actual: bar.timestamp(),
            });
        }
        Ok(())
    }
}
