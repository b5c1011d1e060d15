//! Historical Bars
//!
//! Loads bars from CSV files and replays them through the pipeline the
//! same way live bars arrive.
//!
//! # File Layout
//!
//! ```text
//! symbol,timestamp,open,high,low,close,volume
//! AAPL,2024-01-02 14:30:00+00:00,187.15,188.44,183.89,185.64,82488700.0
//! ```
//!
//! Timestamps must be UTC. Volume may be written as a decimal and is
//! truncated.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::TimeDelta;
use serde::Deserialize;

use crate::application::services::{MarketDataPipeline, PipelineError, SymbolSnapshot};
use crate::domain::bar::{Bar, Ohlcv};
use crate::infrastructure::alpaca::{TimestampError, parse_utc_timestamp};

/// Errors reading historical bars.
#[derive(Debug, thiserror::Error)]
pub enum HistoricalError {
    /// File could not be opened.
    #[error("failed to open {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Row could not be read or has the wrong shape.
    #[error("invalid CSV: {0}")]
    Csv(#[from] csv::Error),

    /// Row timestamp is not UTC RFC 3339.
    #[error("row {row}: {source}")]
    Timestamp {
        /// 1-based data row (header excluded).
        row: usize,
        /// Parse failure.
        source: TimestampError,
    },

    /// Volume is negative or not finite.
    #[error("row {row}: invalid volume {value}")]
    InvalidVolume {
        /// 1-based data row (header excluded).
        row: usize,
        /// Value as written.
        value: f64,
    },
}

#[derive(Debug, Deserialize)]
struct BarRow {
    symbol: String,
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Reader for bar CSV files.
#[derive(Debug, Clone, Copy)]
pub struct CsvBarSource {
    bar_duration: TimeDelta,
}

impl CsvBarSource {
    /// Source stamping every bar with `bar_duration`.
    #[must_use]
    pub const fn new(bar_duration: TimeDelta) -> Self {
        Self { bar_duration }
    }

    /// Read every bar in the file at `path`, in file order.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or any row is invalid.
    pub fn read_path(&self, path: impl AsRef<Path>) -> Result<Vec<Bar>, HistoricalError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| HistoricalError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let bars = self.read_from(file)?;
        tracing::info!(path = %path.display(), bars = bars.len(), "Loaded historical bars");
        Ok(bars)
    }

    /// Read every bar from `reader`, in input order.
    ///
    /// # Errors
    ///
    /// Returns the first invalid row.
    pub fn read_from<R: Read>(&self, reader: R) -> Result<Vec<Bar>, HistoricalError> {
        let mut csv = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        csv.deserialize::<BarRow>()
            .enumerate()
            .map(|(index, row)| self.to_bar(index + 1, row?))
            .collect()
    }

    fn to_bar(&self, row: usize, record: BarRow) -> Result<Bar, HistoricalError> {
        let timestamp = parse_utc_timestamp(&record.timestamp)
            .map_err(|source| HistoricalError::Timestamp { row, source })?;
        let volume = truncate_volume(record.volume).ok_or(HistoricalError::InvalidVolume {
            row,
            value: record.volume,
        })?;

        Ok(Bar::new(
            record.symbol,
            Ohlcv::new(record.open, record.high, record.low, record.close, volume),
            timestamp,
            self.bar_duration,
        ))
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn truncate_volume(value: f64) -> Option<u64> {
    (value.is_finite() && value >= 0.0).then(|| value.trunc() as u64)
}

/// Push `bars` through `pipeline` in order, collecting the snapshots.
///
/// # Errors
///
/// Stops at the first pipeline error.
pub fn replay<'a, I>(
    bars: I,
    pipeline: &mut MarketDataPipeline,
) -> Result<Vec<SymbolSnapshot>, PipelineError>
where
    I: IntoIterator<Item = &'a Bar>,
{
    let mut snapshots = Vec::new();
    for bar in bars {
        if let Some(snapshot) = pipeline.on_bar(bar)? {
            snapshots.push(snapshot);
        }
    }
    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    const CSV: &str = "\
symbol,timestamp,open,high,low,close,volume
AAPL,2024-01-02 14:30:00+00:00,187.15,188.44,183.89,185.64,82488700.9
AAPL,2024-01-02T14:31:00Z,185.64,186.00,185.00,185.50,1200
";

    #[test]
    fn reads_rows_in_order() {
        let bars = CsvBarSource::new(TimeDelta::minutes(1))
            .read_from(CSV.as_bytes())
            .unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].symbol(), "AAPL");
        assert_eq!(
            bars[0].timestamp(),
            Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap()
        );
        assert_eq!(bars[0].volume(), 82_488_700);
        assert!((bars[1].close() - 185.5).abs() < 1e-9);
        assert!(bars[0].is_consecutive_with(&bars[1]));
    }

    #[test]
    fn rejects_non_utc_timestamp() {
        let csv = "symbol,timestamp,open,high,low,close,volume\n\
                   AAPL,2024-01-02T09:30:00-05:00,1,1,1,1,1\n";
        let err = CsvBarSource::new(TimeDelta::minutes(1))
            .read_from(csv.as_bytes())
            .unwrap_err();
        assert!(matches!(
            err,
            HistoricalError::Timestamp {
                row: 1,
                source: TimestampError::NotUtc(_)
            }
        ));
    }

    #[test]
    fn rejects_negative_volume_and_bad_numbers() {
        let source = CsvBarSource::new(TimeDelta::minutes(1));
        let negative = "symbol,timestamp,open,high,low,close,volume\n\
                        AAPL,2024-01-02T14:30:00Z,1,1,1,1,-5\n";
        assert!(matches!(
            source.read_from(negative.as_bytes()),
            Err(HistoricalError::InvalidVolume { row: 1, .. })
        ));

        let garbage = "symbol,timestamp,open,high,low,close,volume\n\
                       AAPL,2024-01-02T14:30:00Z,one,1,1,1,1\n";
        assert!(matches!(
            source.read_from(garbage.as_bytes()),
            Err(HistoricalError::Csv(_))
        ));
    }

    #[test]
    fn missing_file() {
        let err = CsvBarSource::new(TimeDelta::minutes(1))
            .read_path("/nonexistent/bars.csv")
            .unwrap_err();
        assert!(matches!(err, HistoricalError::Io { .. }));
    }
}
