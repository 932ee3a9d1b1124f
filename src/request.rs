use crate::config::ClientConfig;
use crate::error::Error;
use url::Url;

/// Everything the dialer needs to know to reach the server and upgrade:
/// the serialized HTTP request, the address to open the TCP connection
/// to, the hostname for TLS, and whether TLS is wanted at all.
pub(crate) struct UpgradeTarget {
    pub(crate) request: String,
    pub(crate) host_with_port: String,
    pub(crate) host: String,
    pub(crate) use_tls: bool,
}

// Parses the ws/wss URL and lays out the upgrade request. The Host field
// mirrors what was in the URL (port only when explicit), while the TCP
// connection string always needs the resolved port.
pub(crate) fn build_upgrade_request(
    ws_url: &str,
    key: &str,
    config: &ClientConfig,
) -> Result<UpgradeTarget, Error> {
    let parsed_url = Url::parse(ws_url)?;
    let mut use_tls = false;

    let default_port: u16 = match parsed_url.scheme() {
        "ws" => 80,
        "wss" => {
            use_tls = true;
            443
        }
        _ => return Err(Error::InvalidSchemeURL),
    };

    let host = parsed_url.host_str().ok_or(Error::URLNoHost)?;
    let port = parsed_url.port().unwrap_or(default_port);

    let request_host_field = match parsed_url.port() {
        Some(port) => format!("{host}:{port}"),
        None => String::from(host),
    };
    let host_with_port = format!("{host}:{port}");

    let request_path = match parsed_url.query() {
        Some(query) => format!("{}?{}", parsed_url.path(), query),
        None => parsed_url.path().to_string(),
    };

    let mut headers: Vec<(String, String)> = vec![
        ("Host".into(), request_host_field),
        ("Connection".into(), "Upgrade".into()),
        ("Upgrade".into(), "websocket".into()),
        ("Sec-WebSocket-Key".into(), key.into()),
        ("Sec-WebSocket-Version".into(), "13".into()),
    ];
    if !config.supported_protocols.is_empty() {
        headers.push((
            "Sec-WebSocket-Protocol".into(),
            config.supported_protocols.join(", "),
        ));
    }
    if let Some(custom) = &config.headers {
        for (name, value) in custom {
            match headers
                .iter_mut()
                .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            {
                Some(entry) => entry.1 = value.clone(),
                None => headers.push((name.clone(), value.clone())),
            }
        }
    }

    let mut request = format!("GET {request_path} HTTP/1.1\r\n");
    for (name, value) in &headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    request.push_str("\r\n");

    Ok(UpgradeTarget {
        request,
        host_with_port,
        host: String::from(host),
        use_tls,
    })
}

// Offered subprotocol names have to be plain alphabetic tokens; anything
// fancier is refused before it ever reaches the wire.
pub(crate) fn validate_protocol_name(name: &str) -> Result<(), Error> {
    if name.is_empty() || !name.bytes().all(|byte| byte.is_ascii_alphabetic()) {
        return Err(Error::InvalidSubProtocolName(name.to_string()));
    }
    Ok(())
}
