//! Stream Codec
//!
//! Decoding is two-level. A frame that is not a JSON array (or is an empty
//! one) fails as a whole; inside a valid array every message decodes on
//! its own, so one malformed bar never hides its siblings.

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;

use super::messages::{
    BarMessage, ErrorMessage, StreamMessage, SubscriptionMessage, SuccessMessage,
};
use crate::domain::bar::{Bar, Ohlcv};

// =============================================================================
// Errors
// =============================================================================

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is valid JSON but not an array.
    #[error("expected JSON array, got {0}")]
    NotAnArray(&'static str),

    /// Frame is an empty array.
    #[error("empty message array")]
    EmptyArray,

    /// Message without a `"T"` discriminator.
    #[error("message has no \"T\" field")]
    MissingType,

    /// Bar carried an unusable timestamp.
    #[error("invalid bar timestamp: {0}")]
    Timestamp(#[from] TimestampError),
}

/// Timestamp parse failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimestampError {
    /// Offset other than UTC.
    #[error("timestamp must be UTC (end with 'Z' or '+00:00'): {0}")]
    NotUtc(String),

    /// Not a date-time.
    #[error("malformed timestamp '{input}': {reason}")]
    Malformed {
        /// Offending input.
        input: String,
        /// Parser message.
        reason: String,
    },
}

// =============================================================================
// Timestamps
// =============================================================================

/// Parse an RFC 3339 UTC timestamp.
///
/// Accepts a `Z` (either case) or `+00:00` suffix, with `T` or a space
/// between date and time:
///
/// ```
/// use market_feed::infrastructure::alpaca::parse_utc_timestamp;
///
/// let a = parse_utc_timestamp("2025-05-19T13:30:00Z").unwrap();
/// let b = parse_utc_timestamp("2025-05-19 13:30:00+00:00").unwrap();
/// assert_eq!(a, b);
/// assert!(parse_utc_timestamp("2025-05-19T13:30:00-04:00").is_err());
/// ```
///
/// # Errors
///
/// Returns [`TimestampError::NotUtc`] for any other offset and
/// [`TimestampError::Malformed`] when the text is not a date-time.
pub fn parse_utc_timestamp(input: &str) -> Result<DateTime<Utc>, TimestampError> {
    let text = input.trim();
    let normalized = if let Some(stripped) = text.strip_suffix(['Z', 'z']) {
        format!("{stripped}Z")
    } else if text.ends_with("+00:00") {
        text.to_string()
    } else {
        return Err(TimestampError::NotUtc(input.to_string()));
    };

    // RFC 3339 allows a space separator; chrono's parser wants `T`.
    let normalized = match normalized.as_bytes().get(10) {
        Some(b' ') => format!("{}T{}", &normalized[..10], &normalized[11..]),
        _ => normalized,
    };

    DateTime::parse_from_rfc3339(&normalized)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TimestampError::Malformed {
            input: input.to_string(),
            reason: e.to_string(),
        })
}

// =============================================================================
// Codec
// =============================================================================

/// JSON codec for the market-data stream.
#[derive(Debug, Clone)]
pub struct JsonCodec {
    bar_duration: TimeDelta,
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new(TimeDelta::minutes(1))
    }
}

impl JsonCodec {
    /// Codec stamping decoded bars with `bar_duration`.
    #[must_use]
    pub const fn new(bar_duration: TimeDelta) -> Self {
        Self { bar_duration }
    }

    /// Duration given to decoded bars.
    #[must_use]
    pub const fn bar_duration(&self) -> TimeDelta {
        self.bar_duration
    }

    /// Decode a frame into per-message results.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON or not a non-empty array.
    pub fn decode(&self, text: &str) -> Result<Vec<Result<StreamMessage, CodecError>>, CodecError> {
        let value: Value = serde_json::from_str(text)?;
        let items = match value {
            Value::Array(items) => items,
            other => return Err(CodecError::NotAnArray(json_kind(&other))),
        };
        if items.is_empty() {
            return Err(CodecError::EmptyArray);
        }
        Ok(items.into_iter().map(|item| self.decode_message(item)).collect())
    }

    /// Decode one message object.
    ///
    /// # Errors
    ///
    /// Returns an error if the type tag is missing or a known message type
    /// does not match its schema.
    pub fn decode_message(&self, value: Value) -> Result<StreamMessage, CodecError> {
        let msg_type = value
            .get("T")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or(CodecError::MissingType)?;

        let message = match msg_type.as_str() {
            "success" => StreamMessage::Success(serde_json::from_value::<SuccessMessage>(value)?),
            "error" => StreamMessage::Error(serde_json::from_value::<ErrorMessage>(value)?),
            "subscription" => {
                StreamMessage::Subscription(serde_json::from_value::<SubscriptionMessage>(value)?)
            }
            "b" => {
                let bar: BarMessage = serde_json::from_value(value)?;
                StreamMessage::Bar(self.to_bar(&bar)?)
            }
            other => StreamMessage::Other(other.to_string()),
        };
        Ok(message)
    }

    /// Convert a wire bar into a domain bar.
    ///
    /// # Errors
    ///
    /// Returns an error if the timestamp is not UTC RFC 3339.
    pub fn to_bar(&self, message: &BarMessage) -> Result<Bar, CodecError> {
        let timestamp = parse_utc_timestamp(&message.timestamp)?;
        Ok(Bar::new(
            message.symbol.clone(),
            Ohlcv::new(
                message.open,
                message.high,
                message.low,
                message.close,
                message.volume,
            ),
            timestamp,
            self.bar_duration,
        ))
    }

    /// Encode a value to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode<T: serde::Serialize>(&self, value: &T) -> Result<String, CodecError> {
        Ok(serde_json::to_string(value)?)
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
