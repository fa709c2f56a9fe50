use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::models::event::{OutboundIntent, StreamEvent};
use crate::observability::metrics::Metrics;
use crate::stream::StreamHandle;

enum SessionEnd {
    Disconnected,
    Shutdown,
}

/// Keeps the shared connection up for the life of the process, flipping the
/// handle's connected flag around every session.
pub async fn run_transport(
    url: String,
    handle: StreamHandle,
    mut outbound: mpsc::UnboundedReceiver<OutboundIntent>,
    reconnect_delay: Duration,
    metrics: Metrics,
) {
    info!(url = %url, "stream transport started");

    loop {
        match connect_async(url.as_str()).await {
            Ok((socket, _response)) => {
                info!("stream connected");
                handle.set_connected(true);
                metrics.stream_connected.set(1);

                let end = run_session(socket, &handle, &mut outbound).await;

                handle.set_connected(false);
                metrics.stream_connected.set(0);

                if let SessionEnd::Shutdown = end {
                    break;
                }
                warn!("stream disconnected");
            }
            Err(err) => {
                warn!(error = %err, "stream connect failed");
            }
        }

        sleep(reconnect_delay).await;
    }

    info!("stream transport stopped");
}

async fn run_session<S>(
    socket: S,
    handle: &StreamHandle,
    outbound: &mut mpsc::UnboundedReceiver<OutboundIntent>,
) -> SessionEnd
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(handle, text.as_str());
                }
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Disconnected,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(error = %err, "stream read failed");
                    return SessionEnd::Disconnected;
                }
            },
            intent = outbound.recv() => {
                let Some(intent) = intent else {
                    return SessionEnd::Shutdown;
                };

                let json = match serde_json::to_string(&intent) {
                    Ok(json) => json,
                    Err(err) => {
                        warn!(error = %err, "failed to serialize outbound intent");
                        continue;
                    }
                };

                if let Err(err) = sender.send(Message::Text(json.into())).await {
                    warn!(error = %err, "stream write failed");
                    return SessionEnd::Disconnected;
                }
            }
        }
    }
}

/// Parses one text frame and publishes it. Frames that are not rider events
/// are skipped.
pub fn handle_frame(handle: &StreamHandle, text: &str) -> bool {
    match serde_json::from_str::<StreamEvent>(text) {
        Ok(event) => {
            handle.publish(event);
            true
        }
        Err(err) => {
            debug!(error = %err, "skipping unrecognised stream frame");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::handle_frame;
    use crate::models::rider::RiderId;
    use crate::stream::StreamHandle;

    #[tokio::test]
    async fn rider_frames_are_published() {
        let (handle, _outbound) = StreamHandle::new(8);
        let mut sub = handle.subscribe();

        let published = handle_frame(
            &handle,
            r#"{"event":"rider_status_update","data":{"riderId":"r-4","isOnline":false,"isAvailableForDelivery":false}}"#,
        );

        assert!(published);
        let event = sub.events.recv().await.unwrap();
        assert_eq!(event.rider_id(), &RiderId::new("r-4"));
    }

    #[tokio::test]
    async fn junk_frames_are_skipped() {
        let (handle, _outbound) = StreamHandle::new(8);
        let mut sub = handle.subscribe();

        assert!(!handle_frame(&handle, "not json"));
        assert!(!handle_frame(&handle, r#"{"event":"notification","data":{}}"#));
        assert!(sub.events.try_recv().is_err());
    }
}
