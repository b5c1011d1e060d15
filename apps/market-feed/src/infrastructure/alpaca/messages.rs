//! Alpaca Stream Messages
//!
//! Wire types for the market-data websocket. Every frame the server sends
//! is a JSON array of objects tagged by `"T"`; the client sends single
//! objects tagged by `"action"`.
//!
//! # Inbound
//!
//! | `T`            | Type                    |
//! |----------------|-------------------------|
//! | `success`      | [`SuccessMessage`]      |
//! | `error`        | [`ErrorMessage`]        |
//! | `subscription` | [`SubscriptionMessage`] |
//! | `b`            | [`BarMessage`]          |
//!
//! # Outbound
//!
//! - [`AuthRequest`]: `{"action":"auth","key":"...","secret":"..."}`
//! - [`SubscribeRequest`]: `{"action":"subscribe","bars":["AAPL"]}`

use serde::{Deserialize, Serialize};

use crate::domain::bar::Bar;

// =============================================================================
// Control Messages
// =============================================================================

/// Success message for connection and authentication.
///
/// # Wire Format (JSON)
/// ```json
/// {"T": "success", "msg": "connected"}
/// {"T": "success", "msg": "authenticated"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessMessage {
    /// Message type (always "success")
    #[serde(rename = "T")]
    pub msg_type: String,

    /// Which step succeeded
    pub msg: SuccessKind,
}

/// Kind of success message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuccessKind {
    /// Websocket accepted, credentials expected
    Connected,
    /// Credentials accepted
    Authenticated,
    /// Anything newer than this client
    #[serde(other)]
    Unknown,
}

/// Error message with code and description.
///
/// # Wire Format (JSON)
/// ```json
/// {"T": "error", "code": 402, "msg": "auth failed"}
/// ```
///
/// # Error Codes
/// - 400: Invalid syntax
/// - 401: Not authenticated
/// - 402: Auth failed
/// - 403: Already authenticated
/// - 404: Auth timeout
/// - 405: Symbol limit exceeded
/// - 406: Connection limit exceeded
/// - 407: Slow client
/// - 408: Insufficient subscription
/// - 500: Internal error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Message type (always "error")
    #[serde(rename = "T")]
    pub msg_type: String,

    /// Error code
    pub code: i32,

    /// Error message
    pub msg: String,
}

impl ErrorMessage {
    /// Authentication related (401-404).
    #[must_use]
    pub const fn is_auth_error(&self) -> bool {
        matches!(self.code, 401..=404)
    }

    /// Limit related (405-407).
    #[must_use]
    pub const fn is_rate_limit_error(&self) -> bool {
        matches!(self.code, 405..=407)
    }
}

/// Subscription confirmation, listing everything currently subscribed.
///
/// # Wire Format (JSON)
/// ```json
/// {"T": "subscription", "trades": [], "quotes": [], "bars": ["AAPL"]}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionMessage {
    /// Message type (always "subscription")
    #[serde(rename = "T")]
    pub msg_type: String,

    /// Subscribed bar symbols
    #[serde(default)]
    pub bars: Vec<String>,

    /// Subscribed trade symbols
    #[serde(default)]
    pub trades: Vec<String>,

    /// Subscribed quote symbols
    #[serde(default)]
    pub quotes: Vec<String>,
}

// =============================================================================
// Market Data
// =============================================================================

/// Minute bar.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "T": "b",
///   "S": "SPY",
///   "o": 388.985,
///   "h": 389.13,
///   "l": 388.975,
///   "c": 389.12,
///   "v": 49378,
///   "t": "2021-02-22T19:15:00Z"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarMessage {
    /// Ticker symbol
    #[serde(rename = "S")]
    pub symbol: String,

    /// Open price
    #[serde(rename = "o")]
    pub open: f64,

    /// High price
    #[serde(rename = "h")]
    pub high: f64,

    /// Low price
    #[serde(rename = "l")]
    pub low: f64,

    /// Close price
    #[serde(rename = "c")]
    pub close: f64,

    /// Volume (shares)
    #[serde(rename = "v")]
    pub volume: u64,

    /// Number of trades in bar
    #[serde(rename = "n", default)]
    pub trade_count: u64,

    /// Volume-weighted average price
    #[serde(rename = "vw", default)]
    pub vwap: Option<f64>,

    /// Bar start, RFC 3339 UTC
    #[serde(rename = "t")]
    pub timestamp: String,
}

/// One decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// `success`
    Success(SuccessMessage),
    /// `error`
    Error(ErrorMessage),
    /// `subscription`
    Subscription(SubscriptionMessage),
    /// `b`, already converted into a domain bar
    Bar(Bar),
    /// Any other type tag
    Other(String),
}

// =============================================================================
// Outbound
// =============================================================================

/// Authentication request. `Debug` redacts the secret.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct AuthRequest {
    /// Action: "auth"
    pub action: &'static str,

    /// API key
    pub key: String,

    /// API secret
    pub secret: String,
}

impl AuthRequest {
    /// Create a new authentication request.
    #[must_use]
    pub const fn new(key: String, secret: String) -> Self {
        Self {
            action: "auth",
            key,
            secret,
        }
    }
}

impl std::fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequest")
            .field("action", &self.action)
            .field("key", &self.key)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Bar subscription change. `["*"]` covers every symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeRequest {
    /// Action: "subscribe"
    pub action: &'static str,

    /// Bar symbols
    pub bars: Vec<String>,
}

impl SubscribeRequest {
    /// Subscribe to bars for `symbols`.
    #[must_use]
    pub const fn bars(symbols: Vec<String>) -> Self {
        Self {
            action: "subscribe",
            bars: symbols,
        }
    }

    /// Unsubscribe from bars for `symbols`.
    #[must_use]
    pub const fn unsubscribe_bars(symbols: Vec<String>) -> Self {
        Self {
            action: "unsubscribe",
            bars: symbols,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_kinds() {
        let msg: SuccessMessage =
            serde_json::from_str(r#"{"T":"success","msg":"authenticated"}"#).unwrap();
        assert_eq!(msg.msg, SuccessKind::Authenticated);

        let msg: SuccessMessage =
            serde_json::from_str(r#"{"T":"success","msg":"resumed"}"#).unwrap();
        assert_eq!(msg.msg, SuccessKind::Unknown);
    }

    #[test]
    fn error_classification() {
        let msg: ErrorMessage =
            serde_json::from_str(r#"{"T":"error","code":402,"msg":"auth failed"}"#).unwrap();
        assert!(msg.is_auth_error());
        assert!(!msg.is_rate_limit_error());
    }

    #[test]
    fn bar_fields() {
        let json = r#"{"T":"b","S":"SPY","o":388.985,"h":389.13,"l":388.975,"c":389.12,"v":49378,"n":10,"vw":389.06,"t":"2021-02-22T19:15:00Z"}"#;
        let bar: BarMessage = serde_json::from_str(json).unwrap();
        assert_eq!(bar.symbol, "SPY");
        assert_eq!(bar.volume, 49378);
        assert_eq!(bar.vwap, Some(389.06));
    }

    #[test]
    fn auth_request_serialization() {
        let req = AuthRequest::new("key123".to_string(), "secret456".to_string());
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"action":"auth","key":"key123","secret":"secret456"}"#);
    }

    #[test]
    fn subscribe_request_serialization() {
        let req = SubscribeRequest::bars(vec!["*".to_string()]);
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"action":"subscribe","bars":["*"]}"#);

        let req = SubscribeRequest::unsubscribe_bars(vec!["AAPL".to_string()]);
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"action":"unsubscribe","bars":["AAPL"]}"#);
    }
}
