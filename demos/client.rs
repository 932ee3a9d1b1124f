use log::{error, info};
use socket_wire::handshake::connect_async;
use std::time::Duration;
use tokio::time::interval;

#[tokio::main]
async fn main() {
    env_logger::init();

    let connection = match connect_async("ws://127.0.0.1:9002").await {
        Ok(connection) => connection,
        Err(err) => {
            error!("handshake failed: {err}");
            return;
        }
    };

    // One task owns the receive side for the whole connection lifetime;
    // it also drives the pings, pongs and the close acknowledgement.
    let reader = connection.clone();
    let read_task = tokio::spawn(async move {
        loop {
            match reader.receive().await {
                Ok(Some(message)) => info!("received: {:?}", message.as_text()),
                Ok(None) => {
                    info!("connection ended");
                    break;
                }
                Err(err) => {
                    error!("receive failed: {err}");
                    break;
                }
            }
        }
    });

    let mut ticker = interval(Duration::from_secs(5));
    for number in 1..=3u32 {
        ticker.tick().await;
        if let Err(err) = connection
            .send_text(&format!("message number {number}"))
            .await
        {
            error!("send failed: {err}");
            break;
        }
    }

    if let Err(err) = connection.close(Duration::from_secs(5), 1000, "done").await {
        error!("close failed: {err}");
    }
    let _ = read_task.await;
}
