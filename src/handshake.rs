use crate::config::{ClientConfig, ServerConfig};
use crate::connection::WSConnection;
use crate::error::Error;
use crate::request::{build_upgrade_request, validate_protocol_name};
use crate::stream::SocketWireStream;
use crate::utils::{generate_websocket_accept_value, generate_websocket_key};
use crate::write::WriterKind;
use log::debug;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, ReadHalf};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_rustls::TlsConnector;

const MAX_HTTP_HEAD: usize = 16 * 1024;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const BAD_REQUEST_RESPONSE: &str = "HTTP/1.1 400 Bad Request\r\n\r\n";
const METHOD_NOT_ALLOWED_RESPONSE: &str = "HTTP/1.1 405 Method Not Allowed\r\n\r\n";
const UNSUPPORTED_VERSION_RESPONSE: &str =
    "HTTP/1.1 400 Bad Request\r\nSec-WebSocket-Version: 13\r\n\r\n";

/// Dials `addr` (a ws:// or wss:// URL) and performs the client side of
/// the upgrade handshake with default configuration.
pub async fn connect_async(addr: &str) -> Result<WSConnection, Error> {
    connect_async_with_config(addr, ClientConfig::default()).await
}

/// Dials with explicit configuration: offered subprotocols, extra
/// headers, keepalive parameters and an optional extra CA for wss.
pub async fn connect_async_with_config(
    addr: &str,
    config: ClientConfig,
) -> Result<WSConnection, Error> {
    for name in &config.supported_protocols {
        validate_protocol_name(name)?;
    }

    let key = generate_websocket_key();
    let target = build_upgrade_request(addr, &key, &config)?;

    let tcp_stream = TcpStream::connect(&target.host_with_port).await?;
    let stream = if target.use_tls {
        tls_connect(tcp_stream, &target.host, config.ca_file.as_deref()).await?
    } else {
        SocketWireStream::Plain(tcp_stream)
    };

    // The handshake runs over the same buffered halves the connection
    // will use, so nothing read past the response head is lost.
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);

    writer.write_all(target.request.as_bytes()).await?;
    writer.flush().await?;

    let head = read_http_head(&mut reader).await?;
    let subprotocol = validate_upgrade_response(&head, &key, &config)?;
    if let Some(name) = &subprotocol {
        debug!("negotiated subprotocol {name}");
    }

    Ok(WSConnection::from_parts(
        reader,
        writer,
        WriterKind::Client,
        subprotocol,
        config.web_socket_config,
    ))
}

/// Performs the server side of the upgrade handshake over an accepted
/// stream with default configuration.
pub async fn accept_async(stream: SocketWireStream) -> Result<WSConnection, Error> {
    accept_async_with_config(stream, None).await
}

/// Server-side upgrade with explicit configuration. Rejects non-GET
/// requests with 405 and requests missing the upgrade headers with 400,
/// negotiates the subprotocol as the first client-offered name the server
/// supports, then answers 101 and hands back the live connection.
pub async fn accept_async_with_config(
    stream: SocketWireStream,
    config: Option<ServerConfig>,
) -> Result<WSConnection, Error> {
    let config = config.unwrap_or_default();

    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);

    let head = read_http_head(&mut reader).await?;
    match build_upgrade_response(&head, &config) {
        Ok((response, subprotocol)) => {
            writer.write_all(response.as_bytes()).await?;
            writer.flush().await?;
            if let Some(name) = &subprotocol {
                debug!("negotiated subprotocol {name}");
            }
            Ok(WSConnection::from_parts(
                reader,
                writer,
                WriterKind::Server,
                subprotocol,
                config.web_socket_config,
            ))
        }
        Err((rejection, err)) => {
            let _ = writer.write_all(rejection.as_bytes()).await;
            let _ = writer.flush().await;
            Err(err)
        }
    }
}

// Accumulates the HTTP head line by line until the blank line, without
// touching any bytes past it. Bounded in both size and time so a client
// that connects and stalls can't pin the acceptor forever.
async fn read_http_head(
    reader: &mut BufReader<ReadHalf<SocketWireStream>>,
) -> Result<String, Error> {
    timeout(HANDSHAKE_TIMEOUT, async {
        let mut head = String::new();
        loop {
            let mut line = String::new();
            let bytes_read = reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                return Err(Error::IncompleteHTTPRequest);
            }
            head.push_str(&line);
            if head.len() > MAX_HTTP_HEAD {
                return Err(Error::IncompleteHTTPRequest);
            }
            if line == "\r\n" || line == "\n" {
                return Ok(head);
            }
        }
    })
    .await?
}

fn validate_upgrade_response(
    head: &str,
    key: &str,
    config: &ClientConfig,
) -> Result<Option<String>, Error> {
    let mut header_storage = [httparse::EMPTY_HEADER; 32];
    let mut response = httparse::Response::new(&mut header_storage);
    if response.parse(head.as_bytes())?.is_partial() {
        return Err(Error::IncompleteHTTPRequest);
    }
    let status = response.code.ok_or(Error::IncompleteHTTPRequest)?;

    let find = |name: &str| {
        response
            .headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| String::from_utf8_lossy(header.value).trim().to_string())
    };

    match status {
        101 => {}
        400 => {
            // A version rejection names the versions the server does
            // speak, anything else is just a failed upgrade.
            return Err(match find("Sec-WebSocket-Version") {
                Some(versions) => Error::UnsupportedVersion(versions),
                None => Error::HandshakeStatus(400, response.reason.unwrap_or("").to_string()),
            });
        }
        405 => return Err(Error::MethodNotAllowed),
        code => {
            return Err(Error::HandshakeStatus(
                code,
                response.reason.unwrap_or("").to_string(),
            ))
        }
    }

    let upgrade = find("Upgrade").ok_or(Error::NoUpgradeHeaderPresent)?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(Error::NoUpgrade);
    }
    let connection_header = find("Connection").ok_or(Error::NoConnectionHeaderPresent)?;
    if !connection_header
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    {
        return Err(Error::NoUpgrade);
    }
    match find("Sec-WebSocket-Version") {
        Some(version) if version == "13" => {}
        _ => return Err(Error::VersionMismatch),
    }

    let accept = find("Sec-WebSocket-Accept").ok_or(Error::InvalidAcceptKey)?;
    if accept != generate_websocket_accept_value(key) {
        return Err(Error::InvalidAcceptKey);
    }

    // The server may pick one of the offered subprotocols or none at
    // all; picking something we never offered is a handshake failure.
    let subprotocol = find("Sec-WebSocket-Protocol").filter(|name| !name.is_empty());
    if let Some(name) = &subprotocol {
        if !config.supported_protocols.iter().any(|offered| offered == name) {
            return Err(Error::InvalidSubProtocol(name.clone()));
        }
    }

    Ok(subprotocol)
}

// On failure returns the raw HTTP rejection to put on the wire together
// with the error for the caller.
fn build_upgrade_response(
    head: &str,
    config: &ServerConfig,
) -> Result<(String, Option<String>), (String, Error)> {
    let mut header_storage = [httparse::EMPTY_HEADER; 32];
    let mut request = httparse::Request::new(&mut header_storage);
    let parsed = request
        .parse(head.as_bytes())
        .map_err(|err| (BAD_REQUEST_RESPONSE.to_string(), Error::from(err)))?;
    if parsed.is_partial() {
        return Err((
            BAD_REQUEST_RESPONSE.to_string(),
            Error::IncompleteHTTPRequest,
        ));
    }

    if !request.method.unwrap_or("").eq_ignore_ascii_case("GET") {
        return Err((
            METHOD_NOT_ALLOWED_RESPONSE.to_string(),
            Error::MethodNotAllowed,
        ));
    }

    let find = |name: &str| {
        request
            .headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| String::from_utf8_lossy(header.value).trim().to_string())
    };

    let upgrade = find("Upgrade")
        .ok_or((BAD_REQUEST_RESPONSE.to_string(), Error::NoUpgradeHeaderPresent))?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err((BAD_REQUEST_RESPONSE.to_string(), Error::NoUpgrade));
    }
    let connection_header = find("Connection").ok_or((
        BAD_REQUEST_RESPONSE.to_string(),
        Error::NoConnectionHeaderPresent,
    ))?;
    if !connection_header
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    {
        return Err((BAD_REQUEST_RESPONSE.to_string(), Error::NoUpgrade));
    }
    match find("Sec-WebSocket-Version") {
        Some(version) if version == "13" => {}
        _ => {
            return Err((
                UNSUPPORTED_VERSION_RESPONSE.to_string(),
                Error::VersionMismatch,
            ))
        }
    }
    let key = find("Sec-WebSocket-Key")
        .ok_or((BAD_REQUEST_RESPONSE.to_string(), Error::NoSecWebsocketKey))?;

    let subprotocol = find("Sec-WebSocket-Protocol").and_then(|offered_list| {
        offered_list
            .split(',')
            .map(str::trim)
            .find(|offered| {
                config
                    .supported_protocols
                    .iter()
                    .any(|supported| supported == offered)
            })
            .map(str::to_string)
    });

    let accept_value = generate_websocket_accept_value(&key);
    let mut response = String::from(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n",
    );
    response.push_str(&format!(
        "Sec-WebSocket-Accept: {accept_value}\r\nSec-WebSocket-Version: 13\r\n"
    ));
    if let Some(name) = &subprotocol {
        response.push_str(&format!("Sec-WebSocket-Protocol: {name}\r\n"));
    }
    response.push_str("\r\n");

    Ok((response, subprotocol))
}

async fn tls_connect(
    tcp_stream: TcpStream,
    host: &str,
    ca_file: Option<&str>,
) -> Result<SocketWireStream, Error> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    if let Some(path) = ca_file {
        let mut pem_reader = std::io::BufReader::new(std::fs::File::open(path)?);
        for cert in rustls_pemfile::certs(&mut pem_reader) {
            root_store.add(cert?)?;
        }
    }

    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));
    let server_name = pki_types::ServerName::try_from(host.to_string())?;
    let tls_stream = connector.connect(server_name, tcp_stream).await?;
    Ok(SocketWireStream::Secure(tokio_rustls::TlsStream::Client(
        tls_stream,
    )))
}
