use crate::config::ServerConfig;
use crate::event::{generate_new_uuid, Event, EventStream};
use crate::handshake::accept_async_with_config;
use crate::stream::SocketWireStream;
use log::error;
use std::io::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_rustls::{TlsAcceptor, TlsStream};

/// A ready to use websockets server.
///
/// Binds the port, accepts and upgrades connections (TLS first when the
/// config carries a tls_config) and returns an `EventStream` that yields
/// new clients, their messages, disconnections and errors. Each accepted
/// connection gets its own receive pump; the connection handle delivered
/// with `Event::NewClient` is what the end-user sends on.
pub async fn start_server_with_config(
    port: u16,
    config: Option<ServerConfig>,
) -> Result<EventStream, Error> {
    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    let (tx, rx) = mpsc::channel(1000);
    let config = config.unwrap_or_default();

    tokio::spawn(async move {
        loop {
            let connection_id = generate_new_uuid();
            match listener.accept().await {
                Ok((tcp_stream, _)) => {
                    let stream = if let Some(tls_config) = config.tls_config.clone() {
                        let acceptor = TlsAcceptor::from(tls_config);
                        match acceptor.accept(tcp_stream).await {
                            Ok(tls_stream) => {
                                SocketWireStream::Secure(TlsStream::from(tls_stream))
                            }
                            Err(err) => {
                                let _ = tx.send(Event::Error(connection_id, err.into())).await;
                                continue;
                            }
                        }
                    } else {
                        SocketWireStream::Plain(tcp_stream)
                    };

                    let connection =
                        match accept_async_with_config(stream, Some(config.clone())).await {
                            Ok(connection) => connection,
                            Err(err) => {
                                let _ = tx.send(Event::Error(connection_id, err)).await;
                                continue;
                            }
                        };

                    if tx
                        .send(Event::NewClient(connection_id, connection.clone()))
                        .await
                        .is_err()
                    {
                        // Nobody is consuming events anymore.
                        break;
                    }

                    // Pump incoming messages into the event stream so the
                    // end-user only ever deals with whole messages.
                    let tx_task = tx.clone();
                    tokio::spawn(async move {
                        loop {
                            match connection.receive().await {
                                Ok(Some(message)) => {
                                    if tx_task
                                        .send(Event::NewMessage(connection_id, message))
                                        .await
                                        .is_err()
                                    {
                                        break;
                                    }
                                }
                                Ok(None) => break,
                                Err(err) => {
                                    let _ = tx_task.send(Event::Error(connection_id, err)).await;
                                    break;
                                }
                            }
                        }
                        let _ = tx_task.send(Event::Disconnect(connection_id)).await;
                    });
                }
                Err(err) => {
                    error!("failed to accept a connection: {err}");
                    let _ = tx.send(Event::Error(connection_id, err.into())).await;
                }
            }
        }
    });

    Ok(EventStream::new(rx))
}

pub async fn start_server(port: u16) -> Result<EventStream, Error> {
    start_server_with_config(port, None).await
}
