//! Stream Authentication
//!
//! # Flow
//!
//! 1. Websocket upgrade completes
//! 2. Receive `{"T":"success","msg":"connected"}` from server
//! 3. Send `{"action":"auth","key":"...","secret":"..."}`
//! 4. Receive `{"T":"success","msg":"authenticated"}` or an error
//!
//! The state restarts at step 2 on every new connection.

use thiserror::Error;

use super::messages::{AuthRequest, ErrorMessage, SuccessKind, SuccessMessage};

// =============================================================================
// Error Types
// =============================================================================

/// Server-reported errors, classified by code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// 401: a request needed authentication first.
    #[error("request sent before authentication (401)")]
    NotAuthenticated,

    /// 402: key or secret rejected.
    #[error("API key or secret rejected (402)")]
    InvalidCredentials,

    /// 403: connection already authenticated.
    #[error("connection already authenticated (403)")]
    AlreadyAuthenticated,

    /// 404: credentials not sent in time.
    #[error("credentials not sent in time (404)")]
    Timeout,

    /// 405: too many symbols.
    #[error("symbol limit exceeded (405)")]
    SymbolLimitExceeded,

    /// 406: too many connections for this key.
    #[error("too many connections for this key (406)")]
    ConnectionLimitExceeded,

    /// 407: client is not keeping up.
    #[error("client too slow, server dropped messages (407)")]
    SlowClient,

    /// 408: plan does not include the feed.
    #[error("plan does not include this feed (408)")]
    InsufficientSubscription,

    /// Empty key or secret.
    #[error("{0}")]
    MissingCredential(&'static str),

    /// Any other code.
    #[error("stream error {code}: {message}")]
    ServerError {
        /// Server code.
        code: i32,
        /// Server text.
        message: String,
    },
}

impl From<&ErrorMessage> for AuthError {
    fn from(err: &ErrorMessage) -> Self {
        match err.code {
            401 => Self::NotAuthenticated,
            402 => Self::InvalidCredentials,
            403 => Self::AlreadyAuthenticated,
            404 => Self::Timeout,
            405 => Self::SymbolLimitExceeded,
            406 => Self::ConnectionLimitExceeded,
            407 => Self::SlowClient,
            408 => Self::InsufficientSubscription,
            code => Self::ServerError {
                code,
                message: err.msg.clone(),
            },
        }
    }
}

// =============================================================================
// Authentication State
// =============================================================================

/// Authentication progress on the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    /// No connection, or a new connection not yet greeted.
    #[default]
    Disconnected,

    /// Credentials sent, awaiting the verdict.
    Authenticating,

    /// Credentials accepted.
    Authenticated,

    /// Server rejected the credentials.
    Failed,
}

impl AuthState {
    /// Whether credentials were accepted.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated)
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// Alpaca API credentials. `Debug` and `Display` never show the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    key: String,
    secret: String,
}

impl Credentials {
    /// Create new credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if either key or secret is empty.
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Result<Self, AuthError> {
        let key = key.into();
        let secret = secret.into();

        if key.is_empty() {
            return Err(AuthError::MissingCredential("API key cannot be empty"));
        }
        if secret.is_empty() {
            return Err(AuthError::MissingCredential("API secret cannot be empty"));
        }

        Ok(Self { key, secret })
    }

    /// API key id.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// API secret.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Build the `auth` control message.
    #[must_use]
    pub fn to_auth_request(&self) -> AuthRequest {
        AuthRequest::new(self.key.clone(), self.secret.clone())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl std::fmt::Display for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credentials(key={})", self.key)
    }
}

// =============================================================================
// Authentication Handler
// =============================================================================

/// What a success message asks of the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStep {
    /// Send these credentials.
    SendCredentials(AuthRequest),
    /// Authentication finished; subscriptions may go out.
    Authenticated,
    /// Nothing to do.
    None,
}

/// Tracks authentication for one stream across reconnects.
#[derive(Debug)]
pub struct AuthHandler {
    credentials: Credentials,
    state: AuthState,
}

impl AuthHandler {
    /// Create a handler in the `Disconnected` state.
    #[must_use]
    pub const fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            state: AuthState::Disconnected,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> AuthState {
        self.state
    }

    /// Check if currently authenticated.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.state.is_authenticated()
    }

    /// Advance on a `success` message.
    pub fn on_success(&mut self, msg: &SuccessMessage) -> AuthStep {
        match msg.msg {
            SuccessKind::Connected => {
                self.state = AuthState::Authenticating;
                AuthStep::SendCredentials(self.credentials.to_auth_request())
            }
            SuccessKind::Authenticated => {
                self.state = AuthState::Authenticated;
                AuthStep::Authenticated
            }
            SuccessKind::Unknown => AuthStep::None,
        }
    }

    /// Classify an `error` message. Auth errors before authentication
    /// completes move the handler to `Failed`.
    pub fn on_error(&mut self, msg: &ErrorMessage) -> AuthError {
        if msg.is_auth_error() && !self.is_authenticated() {
            self.state = AuthState::Failed;
        }
        AuthError::from(msg)
    }

    /// Forget the connection (after it closed).
    pub const fn reset(&mut self) {
        self.state = AuthState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn handler() -> AuthHandler {
        AuthHandler::new(Credentials::new("key", "secret").unwrap())
    }

    fn success(kind: SuccessKind) -> SuccessMessage {
        SuccessMessage {
            msg_type: "success".to_string(),
            msg: kind,
        }
    }

    fn error(code: i32) -> ErrorMessage {
        ErrorMessage {
            msg_type: "error".to_string(),
            code,
            msg: "boom".to_string(),
        }
    }

    #[test]
    fn connected_then_authenticated() {
        let mut auth = handler();
        let step = auth.on_success(&success(SuccessKind::Connected));
        assert_eq!(
            step,
            AuthStep::SendCredentials(AuthRequest::new("key".into(), "secret".into()))
        );
        assert_eq!(auth.state(), AuthState::Authenticating);

        assert_eq!(
            auth.on_success(&success(SuccessKind::Authenticated)),
            AuthStep::Authenticated
        );
        assert!(auth.is_authenticated());

        auth.reset();
        assert_eq!(auth.state(), AuthState::Disconnected);
    }

    #[test]
    fn auth_failure_marks_failed() {
        let mut auth = handler();
        auth.on_success(&success(SuccessKind::Connected));
        assert_eq!(auth.on_error(&error(402)), AuthError::InvalidCredentials);
        assert_eq!(auth.state(), AuthState::Failed);
    }

    #[test]
    fn non_auth_error_keeps_session_authenticated() {
        let mut auth = handler();
        auth.on_success(&success(SuccessKind::Authenticated));
        assert_eq!(auth.on_error(&error(405)), AuthError::SymbolLimitExceeded);
        assert!(auth.is_authenticated());
    }

    #[test_case(401, AuthError::NotAuthenticated)]
    #[test_case(404, AuthError::Timeout)]
    #[test_case(406, AuthError::ConnectionLimitExceeded)]
    #[test_case(408, AuthError::InsufficientSubscription)]
    fn classifies_codes(code: i32, expected: AuthError) {
        assert_eq!(AuthError::from(&error(code)), expected);
    }

    #[test]
    fn unknown_code_keeps_message() {
        assert_eq!(
            AuthError::from(&error(500)),
            AuthError::ServerError {
                code: 500,
                message: "boom".to_string()
            }
        );
    }

    #[test]
    fn credentials_validation_and_redaction() {
        assert!(Credentials::new("", "secret").is_err());
        assert!(Credentials::new("key", "").is_err());

        let creds = Credentials::new("my-key", "my-secret").unwrap();
        let debug = format!("{creds:?}");
        assert!(debug.contains("my-key"));
        assert!(!debug.contains("my-secret"));
        assert!(!creds.to_string().contains("my-secret"));
    }
}
