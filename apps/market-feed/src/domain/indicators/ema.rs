use super::smoothing::Smoother;
use super::{Indicator, IndicatorConfig, IndicatorError, Snapshot};
use crate::domain::bar::Bar;

/// Exponential moving average of the closing price.
///
/// The first `period` closes produce their running mean; afterwards
/// `ema = close * α + ema * (1 - α)` with `α = 2 / (period + 1)`.
#[derive(Debug, Clone)]
pub struct Ema {
    smoother: Smoother,
}

impl Ema {
    /// Registry name.
    pub const NAME: &'static str = "EMA";

    /// Create an EMA over `period` samples.
    #[must_use]
    pub fn new(period: usize) -> Self {
        Self {
            smoother: Smoother::exponential(period.max(1)),
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

    /// Feed a raw value instead of a bar close.
    pub fn update(&mut self, value: f64) -> f64 {
        self.smoother.update(value)
    }

    /// Current value, meaningful once [`Indicator::is_ready`] holds.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.smoother.value()
    }

    /// Samples observed so far.
    #[must_use]
    pub const fn samples(&self) -> usize {
        self.smoother.samples()
    }

    /// Smoothing constant.
    #[must_use]
    pub const fn alpha(&self) -> f64 {
        self.smoother.alpha()
    }

    pub(super) const fn ready(&self) -> bool {
        self.smoother.is_ready()
    }
}

impl Indicator for Ema {
    fn is_ready(&self) -> bool {
        self.ready()
    }

    fn write(&mut self, bar: &Bar) {
        self.update(bar.close());
    }

    fn read(&self) -> Result<Snapshot, IndicatorError> {
        if !self.ready() {
            return Err(IndicatorError::NotReady {
                pending: vec![Self::NAME.to_string()],
            });
        }
        Ok(Snapshot::from([("ema".to_string(), self.value())]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_period_writes_track_running_mean() {
        let mut ema = Ema::new(10);
        let closes: Vec<f64> = (0..10).map(|i| f64::from(i).mul_add(1.5, 100.0)).collect();

        for (n, close) in closes.iter().enumerate() {
            ema.update(*close);
            let mean = closes[..=n].iter().sum::<f64>() / (n + 1) as f64;
            assert!((ema.value() - mean).abs() < 1e-12, "sample {n}");
            assert_eq!(ema.is_ready(), n == 9);
        }
    }

    #[test]
    fn eleventh_write_uses_recurrence() {
        let mut ema = Ema::new(10);
        for close in 1..=10 {
            ema.update(f64::from(close));
        }
        let seeded = ema.value();
        assert!((seeded - 5.5).abs() < 1e-12);

        ema.update(100.0);
        let alpha = 2.0 / 11.0;
        let expected = 100.0f64.mul_add(alpha, seeded * (1.0 - alpha));
        assert!((ema.value() - expected).abs() < 1e-12);

        let running_mean = (55.0 + 100.0) / 11.0;
        assert!((ema.value() - running_mean).abs() > 1.0);
    }

    #[test]
    fn read_fails_before_ready() {
        let mut ema = Ema::new(3);
        ema.update(1.0);
        assert!(matches!(ema.read(), Err(IndicatorError::NotReady { .. })));
        ema.update(2.0);
        ema.update(3.0);
        assert!((ema.read().unwrap()["ema"] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn from_config_requires_period() {
        assert!(Ema::from_config(&IndicatorConfig::new("EMA")).is_err());
        let ema = Ema::from_config(&IndicatorConfig::new("EMA").with_param("period", 10)).unwrap();
        assert!((ema.alpha() - 2.0 / 11.0).abs() < 1e-12);
    }
}
