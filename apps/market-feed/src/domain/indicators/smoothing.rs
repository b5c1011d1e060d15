//! Warm-up-then-exponential smoothing shared by the indicators.

/// Running cumulative mean for the first `period` samples, then
/// `value = x * alpha + value * (1 - alpha)`.
#[derive(Debug, Clone)]
pub(super) struct Smoother {
    period: usize,
    alpha: f64,
    samples: usize,
    value: f64,
}

impl Smoother {
    /// Standard EMA smoothing, `alpha = 2 / (period + 1)`.
    #[allow(clippy::cast_precision_loss)]
    pub(super) fn exponential(period: usize) -> Self {
        Self::with_alpha(period, 2.0 / (period as f64 + 1.0))
    }

    /// Wilder smoothing, `alpha = 1 / period`.
    #[allow(clippy::cast_precision_loss)]
    pub(super) fn wilder(period: usize) -> Self {
        Self::with_alpha(period, 1.0 / period as f64)
    }

    const fn with_alpha(period: usize, alpha: f64) -> Self {
        Self {
            period,
            alpha,
            samples: 0,
            value: 0.0,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub(super) fn update(&mut self, x: f64) -> f64 {
        self.samples = self.samples.saturating_add(1);
        if self.samples <= self.period {
            self.value += (x - self.value) / self.samples as f64;
        } else {
            self.value = x.mul_add(self.alpha, self.value * (1.0 - self.alpha));
        }
        self.value
    }

    pub(super) const fn is_ready(&self) -> bool {
        self.samples >= self.period
    }

    pub(super) const fn value(&self) -> f64 {
        self.value
    }

    pub(super) const fn samples(&self) -> usize {
        self.samples
    }

    pub(super) const fn alpha(&self) -> f64 {
        self.alpha
    }
}
