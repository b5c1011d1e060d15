//! Bar Types
//!
//! The OHLCV bar is the unit of market data flowing through the pipeline:
//! decoded from the stream, folded by the aggregator, consumed by
//! indicators. Bars are immutable once constructed.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Open/high/low/close prices plus traded volume for one interval.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Ohlcv {
    /// Opening price.
    pub open: f64,
    /// Highest price.
    pub high: f64,
    /// Lowest price.
    pub low: f64,
    /// Closing price.
    pub close: f64,
    /// Traded volume.
    pub volume: u64,
}

impl Ohlcv {
    /// Create a new OHLCV sample.
    #[must_use]
    pub const fn new(open: f64, high: f64, low: f64, close: f64, volume: u64) -> Self {
        Self {
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Combine with a later sample covering the following interval.
    #[must_use]
    pub fn merge(self, later: &Self) -> Self {
        Self {
            open: self.open,
            high: self.high.max(later.high),
            low: self.low.min(later.low),
            close: later.close,
            volume: self.volume.saturating_add(later.volume),
        }
    }
}

/// One OHLCV sample for a symbol over a fixed time interval.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    symbol: String,
    ohlcv: Ohlcv,
    timestamp: DateTime<Utc>,
    duration: TimeDelta,
}

impl Bar {
    /// Create a bar starting at `timestamp` and lasting `duration`.
    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        ohlcv: Ohlcv,
        timestamp: DateTime<Utc>,
        duration: TimeDelta,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            ohlcv,
            timestamp,
            duration,
        }
    }

    /// Ticker symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Price and volume values.
    #[must_use]
    pub const fn ohlcv(&self) -> &Ohlcv {
        &self.ohlcv
    }

    /// Opening price.
    #[must_use]
    pub const fn open(&self) -> f64 {
        self.ohlcv.open
    }

    /// Highest price.
    #[must_use]
    pub const fn high(&self) -> f64 {
        self.ohlcv.high
    }

    /// Lowest price.
    #[must_use]
    pub const fn low(&self) -> f64 {
        self.ohlcv.low
    }

    /// Closing price.
    #[must_use]
    pub const fn close(&self) -> f64 {
        self.ohlcv.close
    }

    /// Traded volume.
    #[must_use]
    pub const fn volume(&self) -> u64 {
        self.ohlcv.volume
    }

    /// Start of the interval.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Length of the interval.
    #[must_use]
    pub const fn duration(&self) -> TimeDelta {
        self.duration
    }

    /// End of the interval (exclusive).
    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        self.timestamp + self.duration
    }

    /// Whether `other` directly precedes or follows this bar.
    #[must_use]
    pub fn is_consecutive_with(&self, other: &Self) -> bool {
        is_consecutive(self, other)
    }
}

/// Two bars are consecutive when they share a symbol and one ends exactly
/// where the other starts, in either order. Durations may differ.
#[must_use]
pub fn is_consecutive(a: &Bar, b: &Bar) -> bool {
    a.symbol == b.symbol && (a.end() == b.timestamp || b.end() == a.timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn minute_bar(symbol: &str, minute: u32) -> Bar {
        Bar::new(
            symbol,
            Ohlcv::new(1.0, 2.0, 0.5, 1.5, 10),
            Utc.with_ymd_and_hms(2025, 5, 19, 13, minute, 0).unwrap(),
            TimeDelta::minutes(1),
        )
    }

    #[test]
    fn end_adds_duration() {
        let bar = minute_bar("AAPL", 30);
        assert_eq!(
            bar.end(),
            Utc.with_ymd_and_hms(2025, 5, 19, 13, 31, 0).unwrap()
        );
    }

    #[test]
    fn adjacent_bars_are_consecutive_in_either_order() {
        let a = minute_bar("AAPL", 30);
        let b = minute_bar("AAPL", 31);
        assert!(is_consecutive(&a, &b));
        assert!(is_consecutive(&b, &a));
    }

    #[test]
    fn gap_is_not_consecutive() {
        let a = minute_bar("AAPL", 30);
        let c = minute_bar("AAPL", 32);
        assert!(!is_consecutive(&a, &c));
    }

    #[test]
    fn symbol_mismatch_is_not_consecutive() {
        let a = minute_bar("AAPL", 30);
        let b = minute_bar("MSFT", 31);
        assert!(!a.is_consecutive_with(&b));
    }

    #[test]
    fn mixed_durations_can_be_consecutive() {
        let five = Bar::new(
            "AAPL",
            Ohlcv::default(),
            Utc.with_ymd_and_hms(2025, 5, 19, 13, 30, 0).unwrap(),
            TimeDelta::minutes(5),
        );
        let one = minute_bar("AAPL", 35);
        assert!(is_consecutive(&five, &one));
        assert!(is_consecutive(&one, &five));
    }

    #[test]
    fn merge_combines_ohlcv() {
        let first = Ohlcv::new(100.0, 102.0, 99.0, 101.0, 1000);
        let second = Ohlcv::new(101.0, 104.0, 100.0, 103.0, 1200);
        let merged = first.merge(&second);
        assert_eq!(merged, Ohlcv::new(100.0, 104.0, 99.0, 103.0, 2200));
    }

    proptest! {
        #[test]
        fn consecutiveness_is_symmetric(
            start_a in 0i64..10_000,
            len_a in 1i64..120,
            start_b in 0i64..10_000,
            len_b in 1i64..120,
            same_symbol in any::<bool>(),
        ) {
            let base = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
            let a = Bar::new(
                "AAPL",
                Ohlcv::default(),
                base + TimeDelta::minutes(start_a),
                TimeDelta::minutes(len_a),
            );
            let b = Bar::new(
                if same_symbol { "AAPL" } else { "MSFT" },
                Ohlcv::default(),
                base + TimeDelta::minutes(start_b),
                TimeDelta::minutes(len_b),
            );
            let expected = same_symbol
                && (start_a + len_a == start_b || start_b + len_b == start_a);
            prop_assert_eq!(is_consecutive(&a, &b), expected);
            prop_assert_eq!(is_consecutive(&a, &b), is_consecutive(&b, &a));
        }
    }
}
