//! Shared reconnecting WebSocket driver.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{error, info, warn};

use crate::feed::{FeedShared, Venue};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Connect, subscribe and pump frames until the stop signal fires,
/// reconnecting after a fixed delay on any disconnect. Parser state is reset
/// on every new connection.
pub(crate) async fn run_stream<V: Venue>(
    shared: Arc<FeedShared>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        if *stop.borrow() {
            return;
        }

        info!("[{}] Connecting to {}", V::FEED_NAME, V::WS_URL);
        let connected = tokio::select! {
            result = connect_async(V::WS_URL) => result,
            _ = stop.changed() => return,
        };

        match connected {
            Ok((ws_stream, _)) => {
                info!("[{}] Connected", V::FEED_NAME);
                shared.counters.set_connected(true);
                let (mut write, mut read) = ws_stream.split();

                if let Some(payload) = V::subscribe() {
                    if let Err(e) = write.send(Message::Text(payload.into())).await {
                        warn!("[{}] Subscribe failed: {}", V::FEED_NAME, e);
                        shared.counters.record_error(&e.to_string());
                    }
                }

                let mut state = V::State::default();
                loop {
                    tokio::select! {
                        msg = read.next() => match msg {
                            Some(Ok(Message::Text(text))) => {
                                shared.deliver(V::parse(&mut state, &text));
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = write.send(Message::Pong(data)).await {
                                    warn!("[{}] Pong failed: {}", V::FEED_NAME, e);
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!("[{}] Connection closed by server", V::FEED_NAME);
                                shared.counters.record_close(frame.map(|f| u16::from(f.code)));
                                break;
                            }
                            Some(Err(e)) => {
                                error!("[{}] Error: {}", V::FEED_NAME, e);
                                shared.counters.record_error(&e.to_string());
                                break;
                            }
                            None => {
                                info!("[{}] Stream ended", V::FEED_NAME);
                                break;
                            }
                            _ => {}
                        },
                        _ = stop.changed() => {
                            shared.counters.set_connected(false);
                            return;
                        }
                    }
                }
                shared.counters.set_connected(false);
            }
            Err(e) => {
                error!("[{}] Connect failed: {}", V::FEED_NAME, e);
                shared.counters.record_error(&e.to_string());
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            _ = stop.changed() => return,
        }
    }
}
