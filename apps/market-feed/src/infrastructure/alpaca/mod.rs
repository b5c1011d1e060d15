//! Alpaca Market Data Stream
//!
//! Wire messages, codec, authentication and the feed client that ties
//! them to a stream session.
//!
//! # Module Structure
//!
//! - `messages`: serde types for inbound and outbound JSON
//! - `codec`: frame decoding and UTC timestamp parsing
//! - `auth`: credentials and the per-connection auth state
//! - `feed`: [`MarketFeed`], the protocol client

mod auth;
mod codec;
mod feed;
mod messages;

pub use auth::{AuthError, AuthHandler, AuthState, AuthStep, Credentials};
pub use codec::{CodecError, JsonCodec, TimestampError, parse_utc_timestamp};
pub use feed::{
    DEFAULT_RELAY_PORT, DataFeed, FeedConfig, FeedError, FeedMode, MarketFeed, PRODUCTION_HOST,
    SANDBOX_HOST,
};
pub use messages::{
    AuthRequest, BarMessage, ErrorMessage, StreamMessage, SubscribeRequest, SubscriptionMessage,
    SuccessKind, SuccessMessage,
};
