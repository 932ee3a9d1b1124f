use crate::connection::Shared;
use crate::frame::OpCode;
use log::{debug, warn};
use std::sync::atomic::Ordering;
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Spawns the keepalive loop for a connection. The task holds only a
/// weak reference, so a connection abandoned without a close does not
/// stay alive just because its pinger does.
pub(crate) fn spawn(shared: Weak<Shared>, interval: Duration, strikes: u32) -> JoinHandle<()> {
    tokio::spawn(run(shared, interval, strikes))
}

// Each tick either sends the next numbered ping or burns a strike when
// the previous one is still unanswered. Running out of strikes, or
// failing to send, tears the connection down.
async fn run(weak: Weak<Shared>, interval: Duration, strikes: u32) {
    let mut ticker = tokio::time::interval(interval);
    let mut last_ping: u32 = 0;
    let mut strikes_left = strikes;

    loop {
        {
            let Some(shared) = weak.upgrade() else { return };
            tokio::select! {
                biased;
                _ = shared.closed.wait() => return,
                _ = ticker.tick() => {}
            }
        }

        let Some(shared) = weak.upgrade() else { return };
        if shared.closed.is_closed() {
            return;
        }

        if shared.last_pong.load(Ordering::Acquire) < last_ping {
            strikes_left -= 1;
            debug!("ping {last_ping} still unanswered, {strikes_left} strikes left");
            if strikes_left == 0 {
                warn!("peer stopped answering pings, closing the connection");
                shared.shutdown_stream().await;
                return;
            }
            continue;
        }

        strikes_left = strikes;
        last_ping = last_ping.wrapping_add(1);
        if let Err(err) = shared
            .control_send(OpCode::Ping, last_ping.to_string().as_bytes())
            .await
        {
            debug!("keepalive ping failed: {err}");
            shared.shutdown_stream().await;
            return;
        }
    }
}
