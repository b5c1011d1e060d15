//! Indicator configuration: a registry name plus integer parameters.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::IndicatorError;

/// Configuration for one indicator instance.
///
/// The compact text form is `NAME[#LABEL][:key=value,key=value]`, e.g.
/// `MACD:fast_period=12,slow_period=26,signal_period=9` or
/// `EMA#ema_fast:period=12`. Several specs are joined with `;`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorConfig {
    /// Registry name (e.g. `EMA`).
    pub name: String,
    /// Integer parameters.
    #[serde(default)]
    pub params: BTreeMap<String, i64>,
    /// Snapshot key; defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl IndicatorConfig {
    /// Create a configuration with no parameters.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
            label: None,
        }
    }

    /// Add or replace a parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: i64) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Report under `label` instead of the indicator name.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Key this indicator's snapshot is reported under.
    #[must_use]
    pub fn key(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    /// Look up a raw parameter.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<i64> {
        self.params.get(key).copied()
    }

    /// Read a required, strictly positive period parameter.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the parameter is missing or not
    /// a positive integer.
    pub fn period(&self, key: &str) -> Result<usize, IndicatorError> {
        let value = self
            .param(key)
            .ok_or_else(|| IndicatorError::MissingParameter {
                indicator: self.name.clone(),
                param: key.to_string(),
            })?;

        usize::try_from(value)
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| IndicatorError::InvalidParameter {
                indicator: self.name.clone(),
                param: key.to_string(),
                value,
                reason: "must be a positive integer",
            })
    }

    /// Parse a `;`-separated list of specs. Blank entries are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`IndicatorError::MalformedSpec`] for the first bad entry.
    pub fn parse_list(text: &str) -> Result<Vec<Self>, IndicatorError> {
        text.split(';')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for IndicatorConfig {
    type Err = IndicatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || IndicatorError::MalformedSpec(s.to_string());

        let (head, params) = s.split_once(':').unwrap_or((s, ""));
        let (name, label) = match head.split_once('#') {
            Some((name, label)) => (name.trim(), Some(label.trim())),
            None => (head.trim(), None),
        };
        if name.is_empty() || label.is_some_and(str::is_empty) {
            return Err(malformed());
        }

        let mut config = Self::new(name);
        if let Some(label) = label {
            config = config.with_label(label);
        }

        for pair in params.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(malformed)?;
            let value: i64 = value.trim().parse().map_err(|_| malformed())?;
            config = config.with_param(key.trim(), value);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_list() {
        let configs = IndicatorConfig::parse_list(
            "EMA:period=20; MACD:fast_period=12,slow_period=26,signal_period=9;",
        )
        .unwrap();

        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0], IndicatorConfig::new("EMA").with_param("period", 20));
        assert_eq!(configs[1].param("slow_period"), Some(26));
        assert_eq!(configs[1].key(), "MACD");
    }

    #[test]
    fn parses_label() {
        let config: IndicatorConfig = "EMA#ema_fast:period=5".parse().unwrap();
        assert_eq!(config.name, "EMA");
        assert_eq!(config.key(), "ema_fast");
    }

    #[test]
    fn rejects_malformed_pairs() {
        assert!("EMA:period".parse::<IndicatorConfig>().is_err());
        assert!("EMA:period=abc".parse::<IndicatorConfig>().is_err());
        assert!(":period=3".parse::<IndicatorConfig>().is_err());
        assert!("EMA#:period=3".parse::<IndicatorConfig>().is_err());
    }

    #[test]
    fn period_requires_positive_value() {
        let config = IndicatorConfig::new("EMA").with_param("period", 0);
        assert!(matches!(
            config.period("period"),
            Err(IndicatorError::InvalidParameter { value: 0, .. })
        ));
        assert!(matches!(
            IndicatorConfig::new("EMA").period("period"),
            Err(IndicatorError::MissingParameter { .. })
        ));
    }

    #[test]
    fn deserializes_from_json() {
        let config: IndicatorConfig =
            serde_json::from_str(r#"{"name":"ATR","params":{"period":14}}"#).unwrap();
        assert_eq!(config.period("period").unwrap(), 14);
        assert_eq!(config.label, None);
    }
}
