//! Indicator Engine
//!
//! Owns a fixed set of indicators built once from configuration, feeds
//! them every bar and gates reads on all of them being warm.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use super::{Indicator, IndicatorConfig, IndicatorError, IndicatorRegistry, Snapshot};
use crate::domain::bar::Bar;
use crate::domain::signal::{Connection, Signal};

/// Snapshot of every indicator, keyed by indicator key.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct EngineSnapshot {
    indicators: BTreeMap<String, Snapshot>,
}

impl EngineSnapshot {
    /// Named values for one indicator.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Snapshot> {
        self.indicators.get(key)
    }

    /// A single named value, e.g. `value("MACD", "signal")`.
    #[must_use]
    pub fn value(&self, key: &str, field: &str) -> Option<f64> {
        self.indicators.get(key)?.get(field).copied()
    }

    /// Number of indicators in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    /// Whether the snapshot holds no indicators.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }

    /// Iterate over indicator keys and their values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Snapshot)> {
        self.indicators.iter().map(|(k, v)| (k.as_str(), v))
    }
}

struct Slot {
    key: String,
    indicator: Box<dyn Indicator>,
}

/// Drives a fixed set of indicators in lockstep.
pub struct IndicatorEngine {
    slots: Vec<Slot>,
    bars_seen: u64,
    snapshots: Signal<EngineSnapshot>,
}

impl std::fmt::Debug for IndicatorEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndicatorEngine")
            .field("indicators", &self.keys())
            .field("bars_seen", &self.bars_seen)
            .finish_non_exhaustive()
    }
}

impl IndicatorEngine {
    /// Build every configured indicator through `registry`.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error: an unknown name, a missing
    /// or invalid parameter, or two indicators sharing a key.
    pub fn new(
        registry: &IndicatorRegistry,
        configs: &[IndicatorConfig],
    ) -> Result<Self, IndicatorError> {
        let mut keys = HashSet::new();
        let mut slots = Vec::with_capacity(configs.len());

        for config in configs {
            let key = config.key().to_string();
            if !keys.insert(key.clone()) {
                return Err(IndicatorError::DuplicateKey(key));
            }
            slots.push(Slot {
                key,
                indicator: registry.create(config)?,
            });
        }

        tracing::debug!(indicators = ?keys, "Indicator engine built");

        Ok(Self {
            slots,
            bars_seen: 0,
            snapshots: Signal::new(),
        })
    }

    /// Build through the process-wide registry.
    ///
    /// # Errors
    ///
    /// See [`Self::new`].
    pub fn from_configs(configs: &[IndicatorConfig]) -> Result<Self, IndicatorError> {
        Self::new(IndicatorRegistry::global(), configs)
    }

    /// Indicator keys in configuration order.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.slots.iter().map(|slot| slot.key.as_str()).collect()
    }

    /// Bars fed so far.
    #[must_use]
    pub const fn bars_seen(&self) -> u64 {
        self.bars_seen
    }

    /// Register a listener receiving the snapshot after every bar once
    /// all indicators are ready.
    pub fn connect_snapshot_handler<F>(&self, listener: F) -> Connection
    where
        F: FnMut(&EngineSnapshot) + Send + 'static,
    {
        self.snapshots.connect(listener)
    }

    /// Feed one bar to every indicator.
    pub fn on_bar(&mut self, bar: &Bar) {
        for slot in &mut self.slots {
            slot.indicator.write(bar);
        }
        self.bars_seen += 1;

        if self.snapshots.has_listeners()
            && let Ok(snapshot) = self.read()
        {
            self.snapshots.emit(&snapshot);
        }
    }

    /// Whether every indicator is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.slots.iter().all(|slot| slot.indicator.is_ready())
    }

    /// Snapshot of every indicator.
    ///
    /// # Errors
    ///
    /// Returns [`IndicatorError::NotReady`] listing the indicators still
    /// warming up; never a partial snapshot.
    pub fn read(&self) -> Result<EngineSnapshot, IndicatorError> {
        let mut indicators = BTreeMap::new();
        let mut pending = Vec::new();

        for slot in &self.slots {
            match slot.indicator.read() {
                Ok(snapshot) => {
                    indicators.insert(slot.key.clone(), snapshot);
                }
                // Indicators name themselves by type; report the key instead.
                Err(IndicatorError::NotReady { .. }) => pending.push(slot.key.clone()),
                Err(e) => return Err(e),
            }
        }

        if !pending.is_empty() {
            return Err(IndicatorError::NotReady { pending });
        }
        Ok(EngineSnapshot { indicators })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeDelta, TimeZone, Utc};
    use parking_lot::Mutex;

    use super::*;
    use crate::domain::bar::Ohlcv;

    fn configs() -> Vec<IndicatorConfig> {
        vec![
            IndicatorConfig::new("EMA").with_param("period", 10),
            IndicatorConfig::new("ATR").with_param("period", 14),
            IndicatorConfig::new("MACD")
                .with_param("fast_period", 12)
                .with_param("slow_period", 26)
                .with_param("signal_period", 9),
        ]
    }

    fn bar(index: i64) -> Bar {
        let base = 100.0 + (index as f64 * 0.7).sin() * 3.0 + index as f64 * 0.1;
        Bar::new(
            "AAPL",
            Ohlcv::new(base, base + 1.5, base - 1.0, base + 0.5, 1000),
            Utc.with_ymd_and_hms(2025, 5, 19, 13, 30, 0).unwrap() + TimeDelta::minutes(index * 5),
            TimeDelta::minutes(5),
        )
    }

    #[test]
    fn read_is_gated_on_slowest_indicator() {
        let mut engine = IndicatorEngine::from_configs(&configs()).unwrap();
        assert!(matches!(engine.read(), Err(IndicatorError::NotReady { .. })));

        // MACD(12, 26, 9) needs 26 + 9 - 1 bars.
        for i in 0..33 {
            engine.on_bar(&bar(i));
        }
        assert!(!engine.is_ready());
        match engine.read() {
            Err(IndicatorError::NotReady { pending }) => assert_eq!(pending, vec!["MACD"]),
            other => panic!("expected not ready, got {other:?}"),
        }

        engine.on_bar(&bar(33));
        assert!(engine.is_ready());

        let snapshot = engine.read().unwrap();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.get("EMA").unwrap().contains_key("ema"));
        assert!(snapshot.get("ATR").unwrap().contains_key("atr"));
        let macd = snapshot.get("MACD").unwrap();
        for key in ["macd", "signal", "histogram"] {
            assert!(macd.contains_key(key), "missing {key}");
        }
    }

    #[test]
    fn unknown_indicator_fails_construction() {
        let err = IndicatorEngine::from_configs(&[IndicatorConfig::new("VWAP")]).unwrap_err();
        assert!(matches!(err, IndicatorError::UnknownIndicator(name) if name == "VWAP"));
    }

    #[test]
    fn missing_parameter_fails_construction() {
        let err = IndicatorEngine::from_configs(&[IndicatorConfig::new("EMA")]).unwrap_err();
        assert!(matches!(err, IndicatorError::MissingParameter { .. }));
    }

    #[test]
    fn duplicate_keys_need_labels() {
        let fast = IndicatorConfig::new("EMA").with_param("period", 5);
        let slow = IndicatorConfig::new("EMA").with_param("period", 20);
        assert_eq!(
            IndicatorEngine::from_configs(&[fast.clone(), slow.clone()]).unwrap_err(),
            IndicatorError::DuplicateKey("EMA".to_string())
        );

        let engine = IndicatorEngine::from_configs(&[
            fast.with_label("ema_fast"),
            slow.with_label("ema_slow"),
        ])
        .unwrap();
        assert_eq!(engine.keys(), vec!["ema_fast", "ema_slow"]);
    }

    #[test]
    fn pending_indicators_are_reported_by_label() {
        let mut engine = IndicatorEngine::from_configs(&[
            IndicatorConfig::new("EMA")
                .with_param("period", 2)
                .with_label("ema_fast"),
            IndicatorConfig::new("MACD")
                .with_param("fast_period", 3)
                .with_param("slow_period", 5)
                .with_param("signal_period", 2)
                .with_label("trend"),
        ])
        .unwrap();

        assert_eq!(
            engine.read().unwrap_err(),
            IndicatorError::NotReady {
                pending: vec!["ema_fast".to_string(), "trend".to_string()]
            }
        );

        engine.on_bar(&bar(0));
        engine.on_bar(&bar(1));
        assert_eq!(
            engine.read().unwrap_err(),
            IndicatorError::NotReady {
                pending: vec!["trend".to_string()]
            }
        );
    }

    #[test]
    fn snapshot_listener_fires_once_ready() {
        let mut engine = IndicatorEngine::from_configs(&[
            IndicatorConfig::new("EMA").with_param("period", 3),
        ])
        .unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let _connection = {
            let received = Arc::clone(&received);
            engine.connect_snapshot_handler(move |snapshot| {
                received.lock().push(snapshot.value("EMA", "ema"));
            })
        };

        for i in 0..4 {
            engine.on_bar(&bar(i));
        }
        assert_eq!(received.lock().len(), 2);
        assert_eq!(engine.bars_seen(), 4);
    }

    #[test]
    fn empty_engine_is_trivially_ready() {
        let engine = IndicatorEngine::from_configs(&[]).unwrap();
        assert!(engine.is_ready());
        assert!(engine.read().unwrap().is_empty());
    }
}
