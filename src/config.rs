use crate::error::Error;
use rustls::ServerConfig as RustlsConfig;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub web_socket_config: WebSocketConfig,
    /// Subprotocols this server is willing to speak, in preference order.
    pub supported_protocols: Vec<String>,
    pub tls_config: Option<Arc<RustlsConfig>>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub web_socket_config: WebSocketConfig,
    /// Subprotocols offered in the upgrade request. Names must be
    /// alphabetic, anything else is rejected before dialing.
    pub supported_protocols: Vec<String>,
    /// Extra request headers. A header with the same name as one of the
    /// defaults replaces it, others are appended.
    pub headers: Option<Vec<(String, String)>>,
    /// Extra PEM roots trusted for wss connections, on top of webpki.
    pub ca_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Cadence of the keepalive pings. Zero means the 30s default.
    pub ping_interval: Duration,
    /// How long unanswered pings are tolerated before the connection is
    /// torn down. Zero means twice the interval; any other value is
    /// rounded up to a whole number of intervals.
    pub pong_timeout: Duration,
    /// Surface peer pongs from `next_frame` instead of feeding them to
    /// the keepalive counter. Mostly useful for tests and diagnostics.
    pub expose_pong_frames: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            ping_interval: Duration::ZERO,
            pong_timeout: Duration::ZERO,
            expose_pong_frames: false,
        }
    }
}

impl WebSocketConfig {
    /// Resolves the configured durations into the effective ping interval
    /// and the number of consecutive unanswered ticks tolerated.
    pub(crate) fn keepalive_params(&self) -> (Duration, u32) {
        let interval = if self.ping_interval.is_zero() {
            DEFAULT_PING_INTERVAL
        } else {
            self.ping_interval
        };
        let timeout = if self.pong_timeout.is_zero() {
            interval * 2
        } else {
            self.pong_timeout
        };
        let strikes = timeout
            .as_millis()
            .div_ceil(interval.as_millis().max(1))
            .max(1) as u32;
        (interval, strikes)
    }
}

/// Loads a certificate chain and private key from PEM files into a rustls
/// server config, ready to be placed in a `ServerConfig`.
pub fn load_tls_server_config(cert_path: &str, key_path: &str) -> Result<Arc<RustlsConfig>, Error> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or(Error::NoPrivateKey)?;
    let config = RustlsConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}
