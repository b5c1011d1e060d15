//! Market Feed Settings
//!
//! Configuration loaded from environment variables.

use std::time::Duration;

use chrono::TimeDelta;

use crate::application::services::{GapPolicy, PipelineConfig};
use crate::domain::indicators::IndicatorConfig;
use crate::infrastructure::alpaca::{Credentials, DataFeed, FeedConfig, FeedMode};
use crate::infrastructure::websocket::{HeartbeatConfig, ReconnectConfig, SessionConfig};

/// Indicators computed when `MARKET_FEED_INDICATORS` is unset.
pub const DEFAULT_INDICATORS: &str =
    "EMA:period=20;ATR:period=14;MACD:fast_period=12,slow_period=26,signal_period=9";

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),

    /// Environment variable could not be interpreted.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, reason: impl ToString) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Stream session timing.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Silence before the connection is considered dead.
    pub heartbeat_timeout: Duration,
    /// Delay before the first reconnection attempt.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Backoff multiplier (1.0 keeps the delay fixed).
    pub reconnect_delay_multiplier: f64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            reconnect_delay_initial: Duration::from_secs(5),
            reconnect_delay_max: Duration::from_secs(60),
            reconnect_delay_multiplier: 1.0,
        }
    }
}

impl StreamSettings {
    /// Session configuration for these settings.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            heartbeat: HeartbeatConfig::new(self.heartbeat_interval, self.heartbeat_timeout),
            reconnect: ReconnectConfig::new(
                self.reconnect_delay_initial,
                self.reconnect_delay_max.max(self.reconnect_delay_initial),
                self.reconnect_delay_multiplier,
                0.0,
            ),
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Feed connection.
    pub feed: FeedConfig,
    /// Symbols to subscribe to; `["*"]` means all.
    pub symbols: Vec<String>,
    /// Aggregation and indicators.
    pub pipeline: PipelineConfig,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl AppConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or a value
    /// cannot be interpreted.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = &lookup;

        let key = required(env, "ALPACA_KEY")?;
        let secret = required(env, "ALPACA_SECRET")?;
        let credentials =
            Credentials::new(key, secret).map_err(|e| ConfigError::invalid("ALPACA_KEY", e))?;

        let feed = match env("ALPACA_FEED") {
            Some(v) => v
                .parse::<DataFeed>()
                .map_err(|e| ConfigError::invalid("ALPACA_FEED", e))?,
            None => DataFeed::default(),
        };
        let mode = match env("ALPACA_MODE") {
            Some(v) => v
                .parse::<FeedMode>()
                .map_err(|e| ConfigError::invalid("ALPACA_MODE", e))?,
            None => FeedMode::default(),
        };

        let defaults = StreamSettings::default();
        let stream = StreamSettings {
            heartbeat_interval: parse_env_duration_secs(
                env,
                "MARKET_FEED_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            heartbeat_timeout: parse_env_duration_secs(
                env,
                "MARKET_FEED_HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout,
            ),
            reconnect_delay_initial: parse_env_duration_millis(
                env,
                "MARKET_FEED_RECONNECT_DELAY_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                env,
                "MARKET_FEED_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env_f64(
                env,
                "MARKET_FEED_RECONNECT_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            ),
        };

        let bar_minutes = parse_env_u32(env, "MARKET_FEED_BAR_MINUTES", 1);
        let aggregate_minutes = parse_env_u32(env, "MARKET_FEED_AGGREGATE_MINUTES", 5);
        let bar_duration = TimeDelta::minutes(i64::from(bar_minutes));

        let mut feed_config = FeedConfig::new(credentials).with_feed(feed).with_mode(mode);
        feed_config.url_override = env("ALPACA_STREAM_URL").filter(|v| !v.trim().is_empty());
        feed_config.bar_duration = bar_duration;
        feed_config.session = stream.session_config();

        let indicator_spec =
            env("MARKET_FEED_INDICATORS").unwrap_or_else(|| DEFAULT_INDICATORS.to_string());
        let indicators = IndicatorConfig::parse_list(&indicator_spec)
            .map_err(|e| ConfigError::invalid("MARKET_FEED_INDICATORS", e))?;

        let gap_policy = match env("MARKET_FEED_GAP_POLICY") {
            Some(v) => v
                .parse::<GapPolicy>()
                .map_err(|e| ConfigError::invalid("MARKET_FEED_GAP_POLICY", e))?,
            None => GapPolicy::Restart,
        };

        let pipeline = PipelineConfig::new(
            bar_duration,
            TimeDelta::minutes(i64::from(aggregate_minutes)),
        )
        .with_indicators(indicators)
        .with_gap_policy(gap_policy);

        Ok(Self {
            feed: feed_config,
            symbols: parse_symbols(env("MARKET_FEED_SYMBOLS").as_deref()),
            pipeline,
            metrics_port: parse_env_u16(env, "MARKET_FEED_METRICS_PORT", 9090),
        })
    }

    /// Whether every symbol is subscribed.
    #[must_use]
    pub fn subscribes_all(&self) -> bool {
        self.symbols.iter().any(|s| s == "*")
    }
}

fn required(env: &dyn Fn(&str) -> Option<String>, key: &str) -> Result<String, ConfigError> {
    let value = env(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn parse_symbols(value: Option<&str>) -> Vec<String> {
    let symbols: Vec<String> = value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase)
        .collect();

    if symbols.is_empty() {
        vec!["*".to_string()]
    } else {
        symbols
    }
}

fn parse_env<T: std::str::FromStr>(
    env: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match env(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring unparseable setting, using default");
            default
        }),
    }
}

fn parse_env_u16(env: &dyn Fn(&str) -> Option<String>, key: &str, default: u16) -> u16 {
    parse_env(env, key, default)
}

fn parse_env_u32(env: &dyn Fn(&str) -> Option<String>, key: &str, default: u32) -> u32 {
    parse_env(env, key, default)
}

fn parse_env_f64(env: &dyn Fn(&str) -> Option<String>, key: &str, default: f64) -> f64 {
    parse_env(env, key, default)
}

/// Zero would spin the timer it configures, so it is treated like an
/// unparseable value.
fn non_zero_duration(key: &str, value: Duration, default: Duration) -> Duration {
    if value.is_zero() {
        tracing::warn!(key, "Ignoring zero duration, using default");
        default
    } else {
        value
    }
}

fn parse_env_duration_secs(
    env: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    let value = Duration::from_secs(parse_env(env, key, default.as_secs()));
    non_zero_duration(key, value, default)
}

fn parse_env_duration_millis(
    env: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    let millis = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    let value = Duration::from_millis(parse_env(env, key, millis));
    non_zero_duration(key, value, default)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    const CREDS: [(&str, &str); 2] = [("ALPACA_KEY", "key"), ("ALPACA_SECRET", "secret")];

    #[test]
    fn defaults() {
        let config = AppConfig::from_lookup(lookup(&CREDS)).unwrap();
        assert_eq!(config.feed.feed, DataFeed::Iex);
        assert_eq!(config.feed.mode, FeedMode::Production);
        assert_eq!(config.feed.url_override, None);
        assert_eq!(config.feed.bar_duration, TimeDelta::minutes(1));
        assert_eq!(config.pipeline.aggregate_duration, TimeDelta::minutes(5));
        assert_eq!(config.pipeline.gap_policy, GapPolicy::Restart);
        assert_eq!(config.pipeline.indicators.len(), 3);
        assert!(config.subscribes_all());
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(
            config.feed.session.reconnect.initial_delay,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn missing_and_empty_credentials() {
        assert!(matches!(
            AppConfig::from_lookup(lookup(&[("ALPACA_KEY", "key")])),
            Err(ConfigError::MissingEnvVar(k)) if k == "ALPACA_SECRET"
        ));
        assert!(matches!(
            AppConfig::from_lookup(lookup(&[("ALPACA_KEY", ""), ("ALPACA_SECRET", "s")])),
            Err(ConfigError::EmptyValue(k)) if k == "ALPACA_KEY"
        ));
    }

    #[test]
    fn overrides() {
        let mut vars = CREDS.to_vec();
        vars.extend([
            ("ALPACA_FEED", "sip"),
            ("ALPACA_MODE", "sandbox"),
            ("ALPACA_STREAM_URL", "ws://localhost/v2/test"),
            ("MARKET_FEED_SYMBOLS", "aapl, msft,,"),
            ("MARKET_FEED_AGGREGATE_MINUTES", "15"),
            ("MARKET_FEED_INDICATORS", "EMA#fast:period=5;EMA#slow:period=10"),
            ("MARKET_FEED_GAP_POLICY", "halt"),
            ("MARKET_FEED_HEARTBEAT_INTERVAL_SECS", "10"),
            ("MARKET_FEED_RECONNECT_DELAY_MS", "250"),
            ("MARKET_FEED_METRICS_PORT", "0"),
        ]);
        let config = AppConfig::from_lookup(lookup(&vars)).unwrap();

        assert_eq!(config.feed.feed, DataFeed::Sip);
        assert_eq!(config.feed.mode, FeedMode::Sandbox);
        assert_eq!(
            config.feed.endpoint().unwrap().url(),
            "ws://localhost:8765/v2/test"
        );
        assert_eq!(config.symbols, vec!["AAPL", "MSFT"]);
        assert_eq!(config.pipeline.aggregate_duration, TimeDelta::minutes(15));
        assert_eq!(config.pipeline.indicators[1].key(), "slow");
        assert_eq!(config.pipeline.gap_policy, GapPolicy::Halt);
        assert_eq!(
            config.feed.session.heartbeat.ping_interval,
            Duration::from_secs(10)
        );
        assert_eq!(
            config.feed.session.reconnect.initial_delay,
            Duration::from_millis(250)
        );
        assert_eq!(config.metrics_port, 0);
    }

    #[test]
    fn invalid_enumerations_are_errors() {
        for (key, value) in [
            ("ALPACA_FEED", "otc"),
            ("ALPACA_MODE", "paper"),
            ("MARKET_FEED_GAP_POLICY", "ignore"),
            ("MARKET_FEED_INDICATORS", "EMA:period"),
        ] {
            let mut vars = CREDS.to_vec();
            vars.push((key, value));
            assert!(
                matches!(
                    AppConfig::from_lookup(lookup(&vars)),
                    Err(ConfigError::InvalidValue { key: k, .. }) if k == key
                ),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn unparseable_numbers_fall_back() {
        let mut vars = CREDS.to_vec();
        vars.push(("MARKET_FEED_METRICS_PORT", "lots"));
        let config = AppConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.metrics_port, 9090);
    }

    #[test]
    fn zero_durations_fall_back() {
        let mut vars = CREDS.to_vec();
        vars.extend([
            ("MARKET_FEED_HEARTBEAT_INTERVAL_SECS", "0"),
            ("MARKET_FEED_HEARTBEAT_TIMEOUT_SECS", "0"),
            ("MARKET_FEED_RECONNECT_DELAY_MS", "0"),
            ("MARKET_FEED_RECONNECT_DELAY_MAX_SECS", "0"),
        ]);
        let config = AppConfig::from_lookup(lookup(&vars)).unwrap();
        let session = &config.feed.session;

        assert_eq!(session.heartbeat.ping_interval, Duration::from_secs(30));
        assert_eq!(session.heartbeat.pong_timeout, Duration::from_secs(60));
        assert_eq!(session.reconnect.initial_delay, Duration::from_secs(5));
        assert_eq!(session.reconnect.max_delay, Duration::from_secs(60));
    }

    #[test]
    fn stream_settings_defaults() {
        let settings = StreamSettings::default();
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(settings.heartbeat_timeout, Duration::from_secs(60));
        assert!((settings.reconnect_delay_multiplier - 1.0).abs() < f64::EPSILON);
    }
}
