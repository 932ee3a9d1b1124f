use futures::StreamExt;
use log::{error, info};
use socket_wire::event::{Event, ID};
use socket_wire::message::Message;
use socket_wire::server::start_server;
use socket_wire::WSConnection;
use std::collections::HashMap;

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut event_stream = match start_server(9002).await {
        Ok(event_stream) => event_stream,
        Err(err) => {
            error!("could not start the server: {err}");
            return;
        }
    };
    info!("echo server listening on ws://0.0.0.0:9002");

    let mut clients: HashMap<ID, WSConnection> = HashMap::new();
    while let Some(event) = event_stream.next().await {
        match event {
            Event::NewClient(id, connection) => {
                info!("client {id} connected");
                clients.insert(id, connection);
            }
            Event::NewMessage(id, message) => {
                if let Some(connection) = clients.get(&id) {
                    let result = match &message {
                        Message::Text(text) => connection.send_text(text).await,
                        Message::Binary(data) => connection.send_binary(data).await,
                    };
                    if let Err(err) = result {
                        error!("echo to {id} failed: {err}");
                    }
                }
            }
            Event::Disconnect(id) => {
                info!("client {id} disconnected");
                clients.remove(&id);
            }
            Event::Error(id, err) => {
                error!("client {id}: {err}");
            }
        }
    }
}
