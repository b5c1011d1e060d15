use super::smoothing::Smoother;
use super::{Indicator, IndicatorConfig, IndicatorError, Snapshot};
use crate::domain::bar::Bar;

/// Average true range with Wilder smoothing.
///
/// The first bar only seeds the previous close. Each later bar contributes
/// `max(high - low, |high - prev_close|, |low - prev_close|)`; the first
/// `period` ranges are averaged, after which `atr = tr/period +
/// atr * (1 - 1/period)`.
#[derive(Debug, Clone)]
pub struct Atr {
    smoother: Smoother,
    prev_close: Option<f64>,
}

impl Atr {
    /// Registry name.
    pub const NAME: &'static str = "ATR";

    /// Create an ATR over `period` true ranges.
    #[must_use]
    pub fn new(period: usize) -> Self {
        Self {
            smoother: Smoother::wilder(period.max(1)),
            prev_close: None,
        }
    }

    /// Build from a configuration with a `period` parameter.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `period` is missing or not positive.
    pub fn from_config(config: &IndicatorConfig) -> Result<Self, IndicatorError> {
        Ok(Self::new(config.period("period")?))
    }

    /// Current value, meaningful once [`Indicator::is_ready`] holds.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.smoother.value()
    }
}

fn true_range(bar: &Bar, prev_close: f64) -> f64 {
    (bar.high() - bar.low())
        .max((bar.high() - prev_close).abs())
        .max((bar.low() - prev_close).abs())
}

impl Indicator for Atr {
    fn is_ready(&self) -> bool {
        self.smoother.is_ready()
    }

    fn write(&mut self, bar: &Bar) {
        if let Some(prev_close) = self.prev_close {
            self.smoother.update(true_range(bar, prev_close));
        }
        self.prev_close = Some(bar.close());
    }

    fn read(&self) -> Result<Snapshot, IndicatorError> {
        if !self.is_ready() {
            return Err(IndicatorError::NotReady {
                pending: vec![Self::NAME.to_string()],
            });
        }
        Ok(Snapshot::from([("atr".to_string(), self.value())]))
    }
}
