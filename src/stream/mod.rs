//! The process-wide event stream connection.
//!
//! One physical transport feeds a broadcast channel; every consumer holds its
//! own `Subscription` and detaches by dropping it, leaving the connection up
//! for everyone else. The handle is passed in explicitly so tests can drive
//! it without a socket.

pub mod ws;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::debug;

use crate::models::event::{OutboundIntent, StreamEvent};

#[derive(Clone)]
pub struct StreamHandle {
    events: broadcast::Sender<StreamEvent>,
    connected: Arc<watch::Sender<bool>>,
    outbound: mpsc::UnboundedSender<OutboundIntent>,
}

pub struct Subscription {
    pub events: broadcast::Receiver<StreamEvent>,
    pub connected: watch::Receiver<bool>,
}

impl StreamHandle {
    /// Returns the handle and the receiving end of outbound intents, which
    /// belongs to whatever transport drives the connection.
    pub fn new(buffer: usize) -> (Self, mpsc::UnboundedReceiver<OutboundIntent>) {
        let (events, _unused_rx) = broadcast::channel(buffer);
        let (connected, _) = watch::channel(false);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        (
            Self {
                events,
                connected: Arc::new(connected),
                outbound,
            },
            outbound_rx,
        )
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            events: self.events.subscribe(),
            connected: self.connected.subscribe(),
        }
    }

    /// Fans an event out to every subscription. Returns how many received it.
    pub fn publish(&self, event: StreamEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.send_if_modified(|current| {
            if *current == connected {
                false
            } else {
                *current = connected;
                true
            }
        });
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Hands an intent to the transport. Best effort.
    pub fn request(&self, intent: OutboundIntent) {
        if self.outbound.send(intent).is_err() {
            debug!("stream transport gone; dropping outbound intent");
        }
    }

    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::StreamHandle;
    use crate::models::event::{OutboundIntent, StatusUpdate, StreamEvent};
    use crate::models::rider::RiderId;

    fn status(id: &str) -> StreamEvent {
        StreamEvent::RiderStatusUpdate(StatusUpdate {
            rider_id: RiderId::new(id),
            is_online: true,
            is_available_for_delivery: false,
        })
    }

    #[tokio::test]
    async fn dropping_one_subscription_keeps_others_attached() {
        let (handle, _outbound) = StreamHandle::new(8);
        let first = handle.subscribe();
        let mut second = handle.subscribe();
        assert_eq!(handle.listener_count(), 2);

        drop(first);
        assert_eq!(handle.listener_count(), 1);
        assert_eq!(handle.publish(status("a")), 1);
        assert_eq!(second.events.recv().await.unwrap(), status("a"));
    }

    #[tokio::test]
    async fn connection_flag_only_notifies_on_change() {
        let (handle, _outbound) = StreamHandle::new(8);
        let mut sub = handle.subscribe();

        handle.set_connected(false);
        assert!(!sub.connected.has_changed().unwrap());

        handle.set_connected(true);
        assert!(sub.connected.has_changed().unwrap());
        assert!(*sub.connected.borrow_and_update());
        assert!(handle.is_connected());
    }

    #[tokio::test]
    async fn intents_reach_the_transport() {
        let (handle, mut outbound) = StreamHandle::new(8);
        let intent = OutboundIntent::RequestRiderUpdates {
            rider_id: RiderId::new("r-1"),
        };

        handle.request(intent.clone());
        assert_eq!(outbound.recv().await, Some(intent));
    }

    #[test]
    fn publish_without_listeners_is_harmless() {
        let (handle, _outbound) = StreamHandle::new(8);
        assert_eq!(handle.publish(status("a")), 0);
    }
}
