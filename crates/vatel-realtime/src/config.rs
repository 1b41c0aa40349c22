use crate::error::ConnectError;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use url::Url;

/// Base URL of the hosted realtime endpoint.
pub const DEFAULT_WS_BASE: &str = "wss://api.vatel.ai";
/// Path of the session channel below the base URL.
pub const CONNECTION_PATH: &str = "/v1/connection";

/// Where and how to open a session channel.
#[derive(Clone, Debug)]
pub struct ConnectConfig {
    /// `ws(s)://` or `http(s)://` base; HTTP schemes are mapped to their
    /// WebSocket counterparts.
    pub base_url: String,
    pub path: String,
    /// Upper bound for the TCP + TLS + WebSocket handshake.
    pub open_timeout: Duration,
    /// Upper bound for the close handshake before the transport is dropped.
    pub close_timeout: Duration,
    /// Interval of keepalive pings while the connection is open.
    pub ping_interval: Option<Duration>,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_WS_BASE.to_string(),
            path: CONNECTION_PATH.to_string(),
            open_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
            ping_interval: Some(Duration::from_secs(20)),
        }
    }
}

impl ConnectConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Builds the channel URI with the bearer token as `token` query parameter.
    pub fn connection_url(&self, token: &SecretString) -> Result<Url, ConnectError> {
        let mut url = self.endpoint()?;
        url.query_pairs_mut()
            .append_pair("token", token.expose_secret());
        Ok(url)
    }

    /// The channel URI without credentials, suitable for logging.
    pub fn endpoint(&self) -> Result<Url, ConnectError> {
        let base = self.base_url.trim_end_matches('/');
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        let mut url = Url::parse(&format!("{base}{path}"))
            .map_err(|e| ConnectError::InvalidUrl(format!("{base}{path}: {e}")))?;

        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            "wss" | "ws" => return Ok(url),
            other => {
                return Err(ConnectError::InvalidUrl(format!(
                    "unsupported scheme `{other}`"
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| ConnectError::InvalidUrl(format!("cannot switch scheme to {scheme}")))?;
        Ok(url)
    }
}
