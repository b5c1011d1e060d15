use super::ema::Ema;
use super::{Indicator, IndicatorConfig, IndicatorError, Snapshot};
use crate::domain::bar::Bar;

/// Moving average convergence/divergence.
///
/// Fast and slow EMAs of the close run side by side; once both are warm,
/// their difference feeds a signal EMA. Ready once the signal EMA is warm,
/// i.e. after `slow + signal - 1` bars.
#[derive(Debug, Clone)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
}

impl Macd {
    /// Registry name.
    pub const NAME: &'static str = "MACD";

    /// Create a MACD with the given EMA periods.
    #[must_use]
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Self {
        Self {
            fast: Ema::new(fast_period),
            slow: Ema::new(slow_period),
            signal: Ema::new(signal_period),
        }
    }

    /// Build from `fast_period`, `slow_period` and `signal_period`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a period is missing or not
    /// positive, or if the fast period is not shorter than the slow one.
    pub fn from_config(config: &IndicatorConfig) -> Result<Self, IndicatorError> {
        let fast = config.period("fast_period")?;
        let slow = config.period("slow_period")?;
        let signal = config.period("signal_period")?;

        if fast >= slow {
            return Err(IndicatorError::InvalidParameter {
                indicator: config.name.clone(),
                param: "fast_period".to_string(),
                value: config.param("fast_period").unwrap_or_default(),
                reason: "must be shorter than slow_period",
            });
        }

        Ok(Self::new(fast, slow, signal))
    }

    /// `fast - slow`.
    #[must_use]
    pub fn macd(&self) -> f64 {
        self.fast.value() - self.slow.value()
    }

    /// Signal line value.
    #[must_use]
    pub const fn signal(&self) -> f64 {
        self.signal.value()
    }

    /// `macd - signal`.
    #[must_use]
    pub fn histogram(&self) -> f64 {
        self.macd() - self.signal()
    }
}

impl Indicator for Macd {
    fn is_ready(&self) -> bool {
        self.fast.ready() && self.slow.ready() && self.signal.ready()
    }

    fn write(&mut self, bar: &Bar) {
        let close = bar.close();
        self.fast.update(close);
        self.slow.update(close);
        if self.fast.ready() && self.slow.ready() {
            self.signal.update(self.macd());
        }
    }

    fn read(&self) -> Result<Snapshot, IndicatorError> {
        if !self.is_ready() {
            return Err(IndicatorError::NotReady {
                pending: vec![Self::NAME.to_string()],
            });
        }
        let macd = self.macd();
        let signal = self.signal();
        Ok(Snapshot::from([
            ("macd".to_string(), macd),
            ("signal".to_string(), signal),
            ("histogram".to_string(), macd - signal),
        ]))
    }
}
