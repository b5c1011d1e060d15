//! WebSocket Transport
//!
//! [`Transport`] adapter over tokio: DNS via `lookup_host`, a plain
//! `TcpStream`, TLS through `tokio-rustls` with the webpki root set, and
//! the websocket upgrade through `tokio-tungstenite`. Each step owns the
//! output of the previous one, so the session can observe every phase.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, USER_AGENT};
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{Inbound, Transport, TransportError};

/// User agent sent with the upgrade request.
pub const DEFAULT_USER_AGENT: &str =
    concat!("market-feed/", env!("CARGO_PKG_VERSION"), " macd-trading-bot");

/// Per-step deadline for connect and handshakes.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Endpoint
// =============================================================================

/// Errors parsing a stream URL.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EndpointError {
    /// Not a URL.
    #[error("invalid stream URL '{url}': {reason}")]
    InvalidUrl {
        /// Offending input.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// Scheme other than `ws` or `wss`.
    #[error("unsupported scheme '{0}', expected ws or wss")]
    UnsupportedScheme(String),

    /// URL without a host.
    #[error("stream URL '{0}' has no host")]
    MissingHost(String),
}

/// Where a streaming session connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoint {
    host: String,
    port: u16,
    path: String,
    secure: bool,
}

impl StreamEndpoint {
    /// Secure (`wss`) endpoint.
    #[must_use]
    pub fn secure(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            path: normalize_path(path.into()),
            secure: true,
        }
    }

    /// Plaintext (`ws`) endpoint, for local relays and tests.
    #[must_use]
    pub fn plain(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            path: normalize_path(path.into()),
            secure: false,
        }
    }

    /// Parse a `ws://` or `wss://` URL. Missing ports default to 80/443.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is malformed, has no host, or uses
    /// another scheme.
    pub fn parse(url: &str) -> Result<Self, EndpointError> {
        Self::parse_with_default_port(url, None)
    }

    /// Parse a URL, using `default_port` (instead of 80/443) when the URL
    /// names none.
    ///
    /// # Errors
    ///
    /// Same as [`StreamEndpoint::parse`].
    pub fn parse_with_default_port(
        url: &str,
        default_port: Option<u16>,
    ) -> Result<Self, EndpointError> {
        let uri: Uri = url.parse().map_err(|e| EndpointError::InvalidUrl {
            url: url.to_string(),
            reason: format!("{e}"),
        })?;

        let secure = match uri.scheme_str() {
            Some("wss") => true,
            Some("ws") => false,
            Some(other) => return Err(EndpointError::UnsupportedScheme(other.to_string())),
            None => return Err(EndpointError::UnsupportedScheme(String::new())),
        };
        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| EndpointError::MissingHost(url.to_string()))?
            .to_string();
        let port = uri
            .port_u16()
            .or(default_port)
            .unwrap_or(if secure { 443 } else { 80 });
        let path = uri
            .path_and_query()
            .map_or_else(|| "/".to_string(), |p| p.as_str().to_string());

        Ok(Self {
            host,
            port,
            path: normalize_path(path),
            secure,
        })
    }

    /// Host name.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Request target, always starting with `/`.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether TLS is used.
    #[must_use]
    pub const fn is_secure(&self) -> bool {
        self.secure
    }

    /// Full URL. The port is omitted when it is the scheme default.
    #[must_use]
    pub fn url(&self) -> String {
        let (scheme, default_port) = if self.secure { ("wss", 443) } else { ("ws", 80) };
        if self.port == default_port {
            format!("{scheme}://{}{}", self.host, self.path)
        } else {
            format!("{scheme}://{}:{}{}", self.host, self.port, self.path)
        }
    }
}

impl std::fmt::Display for StreamEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url())
    }
}

fn normalize_path(path: String) -> String {
    if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    }
}

// =============================================================================
// Transport
// =============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Default)]
enum Stage {
    #[default]
    Idle,
    Resolved(Vec<SocketAddr>),
    Tcp(TcpStream),
    Secured(MaybeTlsStream<TcpStream>),
    Open(Box<WsStream>),
}

impl Stage {
    const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Resolved(_) => "resolved",
            Self::Tcp(_) => "tcp",
            Self::Secured(_) => "secured",
            Self::Open(_) => "open",
        }
    }
}

/// Production [`Transport`] for `ws://` and `wss://` endpoints.
pub struct WsTransport {
    endpoint: StreamEndpoint,
    user_agent: String,
    connect_timeout: Duration,
    stage: Stage,
    tls: Option<TlsConnector>,
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("endpoint", &self.endpoint)
            .field("stage", &self.stage.name())
            .finish_non_exhaustive()
    }
}

impl WsTransport {
    /// Create a transport for `endpoint`.
    #[must_use]
    pub fn new(endpoint: StreamEndpoint) -> Self {
        Self {
            endpoint,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            stage: Stage::Idle,
            tls: None,
        }
    }

    /// Override the upgrade request's user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Override the connect and handshake deadline.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Target endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &StreamEndpoint {
        &self.endpoint
    }

    fn tls_connector(&mut self) -> Result<TlsConnector, TransportError> {
        if let Some(connector) = &self.tls {
            return Ok(connector.clone());
        }

        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config =
            ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
                .with_safe_default_protocol_versions()
                .map_err(|e| TransportError::Tls(e.to_string()))?
                .with_root_certificates(roots)
                .with_no_client_auth();

        let connector = TlsConnector::from(Arc::new(config));
        self.tls = Some(connector.clone());
        Ok(connector)
    }

    fn open(&mut self) -> Result<&mut WsStream, TransportError> {
        match &mut self.stage {
            Stage::Open(ws) => Ok(ws.as_mut()),
            _ => Err(TransportError::NotReady("websocket I/O")),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn resolve(&mut self) -> Result<(), TransportError> {
        let host = self.endpoint.host.clone();
        let port = self.endpoint.port;
        tracing::debug!(%host, port, "Resolving stream host");

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|e| TransportError::Resolve(format!("{host}: {e}")))?
            .collect();

        if addrs.is_empty() {
            return Err(TransportError::Resolve(format!("{host}: no addresses")));
        }
        self.stage = Stage::Resolved(addrs);
        Ok(())
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        let Stage::Resolved(addrs) = std::mem::take(&mut self.stage) else {
            return Err(TransportError::NotReady("connect"));
        };

        let mut last_error = TransportError::Connect("no addresses".to_string());
        for addr in addrs {
            match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
                    }
                    tracing::debug!(%addr, "TCP connected");
                    self.stage = Stage::Tcp(stream);
                    return Ok(());
                }
                Ok(Err(e)) => {
                    tracing::debug!(%addr, error = %e, "TCP connect failed");
                    last_error = TransportError::Connect(format!("{addr}: {e}"));
                }
                Err(_) => last_error = TransportError::Timeout("connect"),
            }
        }
        Err(last_error)
    }

    async fn secure(&mut self) -> Result<(), TransportError> {
        let Stage::Tcp(stream) = std::mem::take(&mut self.stage) else {
            return Err(TransportError::NotReady("TLS handshake"));
        };

        if !self.endpoint.secure {
            self.stage = Stage::Secured(MaybeTlsStream::Plain(stream));
            return Ok(());
        }

        let connector = self.tls_connector()?;
        let server_name = ServerName::try_from(self.endpoint.host.clone())
            .map_err(|e| TransportError::Tls(e.to_string()))?;

        let tls = tokio::time::timeout(self.connect_timeout, connector.connect(server_name, stream))
            .await
            .map_err(|_| TransportError::Timeout("TLS handshake"))?
            .map_err(|e| TransportError::Tls(e.to_string()))?;

        self.stage = Stage::Secured(MaybeTlsStream::Rustls(tls));
        Ok(())
    }

    async fn upgrade(&mut self) -> Result<(), TransportError> {
        let Stage::Secured(stream) = std::mem::take(&mut self.stage) else {
            return Err(TransportError::NotReady("websocket handshake"));
        };

        let mut request = self
            .endpoint
            .url()
            .into_client_request()
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        let agent = HeaderValue::from_str(&self.user_agent)
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        request.headers_mut().insert(USER_AGENT, agent);

        let (ws, response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::client_async(request, stream))
                .await
                .map_err(|_| TransportError::Timeout("websocket handshake"))?
                .map_err(|e| TransportError::Handshake(e.to_string()))?;

        tracing::debug!(status = %response.status(), "Websocket upgraded");
        self.stage = Stage::Open(Box::new(ws));
        Ok(())
    }

    async fn read(&mut self) -> Result<Inbound, TransportError> {
        let ws = self.open()?;
        match ws.next().await {
            Some(Ok(Message::Text(text))) => Ok(Inbound::Text(text.as_str().to_owned())),
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => Ok(Inbound::Text(text)),
                Err(_) => {
                    tracing::debug!(len = bytes.len(), "Ignoring non-UTF-8 binary frame");
                    Ok(Inbound::Control)
                }
            },
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(?frame, "Server sent close frame");
                Err(TransportError::Closed)
            }
            Some(Ok(_)) => Ok(Inbound::Control),
            Some(Err(e)) => Err(TransportError::Io(e.to_string())),
            None => Err(TransportError::Closed),
        }
    }

    async fn write(&mut self, payload: &str) -> Result<(), TransportError> {
        let ws = self.open()?;
        ws.send(Message::Text(payload.to_owned().into()))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        let ws = self.open()?;
        ws.send(Message::Ping(Vec::new().into()))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Stage::Open(mut ws) = std::mem::take(&mut self.stage) else {
            return Ok(());
        };
        (*ws).close(None)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    fn reset(&mut self) {
        if !matches!(self.stage, Stage::Idle) {
            tracing::debug!(stage = self.stage.name(), "Dropping transport connection");
        }
        self.stage = Stage::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_secure_url_with_default_port() {
        let endpoint = StreamEndpoint::parse("wss://stream.data.alpaca.markets/v2/iex").unwrap();
        assert!(endpoint.is_secure());
        assert_eq!(endpoint.host(), "stream.data.alpaca.markets");
        assert_eq!(endpoint.port(), 443);
        assert_eq!(endpoint.path(), "/v2/iex");
        assert_eq!(endpoint.url(), "wss://stream.data.alpaca.markets/v2/iex");
    }

    #[test]
    fn default_port_override_applies_only_when_missing() {
        let relay = StreamEndpoint::parse_with_default_port("ws://localhost/v2/test", Some(8765))
            .unwrap();
        assert_eq!(relay.port(), 8765);
        assert_eq!(relay.url(), "ws://localhost:8765/v2/test");

        let explicit =
            StreamEndpoint::parse_with_default_port("ws://localhost:9000/v2/test", Some(8765))
                .unwrap();
        assert_eq!(explicit.port(), 9000);
    }

    #[test]
    fn parses_plain_url_with_port() {
        let endpoint = StreamEndpoint::parse("ws://127.0.0.1:8765/v2/test").unwrap();
        assert!(!endpoint.is_secure());
        assert_eq!(endpoint.port(), 8765);
        assert_eq!(endpoint, StreamEndpoint::plain("127.0.0.1", 8765, "v2/test"));
    }

    #[test]
    fn rejects_other_schemes() {
        assert_eq!(
            StreamEndpoint::parse("https://example.com/"),
            Err(EndpointError::UnsupportedScheme("https".to_string()))
        );
        assert!(matches!(
            StreamEndpoint::parse("not a url"),
            Err(EndpointError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn user_agent_identifies_client() {
        assert!(DEFAULT_USER_AGENT.ends_with(" macd-trading-bot"));
    }

    #[tokio::test]
    async fn io_before_upgrade_is_rejected() {
        let mut transport = WsTransport::new(StreamEndpoint::plain("localhost", 1, "/"));
        assert!(matches!(
            transport.write("{}").await,
            Err(TransportError::NotReady(_))
        ));
        assert!(matches!(
            transport.connect().await,
            Err(TransportError::NotReady("connect"))
        ));
        assert!(transport.close().await.is_ok());
    }

    #[tokio::test]
    async fn refused_connection_reports_connect_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut transport = WsTransport::new(StreamEndpoint::plain("127.0.0.1", port, "/"));
        transport.resolve().await.unwrap();
        assert!(matches!(
            transport.connect().await,
            Err(TransportError::Connect(_))
        ));
    }
}
