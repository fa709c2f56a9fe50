//! Fetches riders that the stream mentions before any snapshot listed them.
//!
//! At most one detail fetch per rider is in flight. Every event for that
//! rider arriving meanwhile is queued, in arrival order, and merged when the
//! fetch lands, so the rider shows up with the state the stream reported
//! rather than whatever the detail endpoint had cached.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::engine::store::{FleetStore, Landing, MergeOutcome};
use crate::models::event::{ChangeKind, ChangeNotice, StreamEvent};
use crate::models::rider::RiderId;
use crate::observability::metrics::Metrics;
use crate::source::{require_token, RiderSource, TokenProvider};

struct Pending {
    generation: u64,
    events: Vec<StreamEvent>,
}

pub struct Resolver {
    source: Arc<dyn RiderSource>,
    tokens: Arc<dyn TokenProvider>,
    store: Arc<FleetStore>,
    metrics: Metrics,
    changes: broadcast::Sender<ChangeNotice>,
    in_flight: DashMap<RiderId, Pending>,
}

impl Resolver {
    pub fn new(
        source: Arc<dyn RiderSource>,
        tokens: Arc<dyn TokenProvider>,
        store: Arc<FleetStore>,
        metrics: Metrics,
        changes: broadcast::Sender<ChangeNotice>,
    ) -> Self {
        Self {
            source,
            tokens,
            store,
            metrics,
            changes,
            in_flight: DashMap::new(),
        }
    }

    pub fn is_resolving(&self, rider_id: &RiderId) -> bool {
        self.in_flight.contains_key(rider_id)
    }

    /// Queues `event` behind a fetch already running for its rider in the
    /// current generation. Returns false, leaving the event to the caller,
    /// when there is none.
    pub fn enqueue(&self, event: &StreamEvent) -> bool {
        let generation = self.store.generation();

        match self.in_flight.get_mut(event.rider_id()) {
            Some(mut pending) if pending.generation == generation => {
                pending.events.push(event.clone());
                true
            }
            _ => false,
        }
    }

    /// Starts a fetch for a rider the store did not know. Returns the fetch
    /// task when this call started one; callers are free to drop it.
    pub fn resolve(self: &Arc<Self>, event: StreamEvent) -> Option<JoinHandle<()>> {
        let rider_id = event.rider_id().clone();
        let generation = self.store.generation();

        match self.in_flight.entry(rider_id.clone()) {
            Entry::Occupied(mut pending) if pending.get().generation == generation => {
                pending.get_mut().events.push(event);
                None
            }
            entry => {
                // The rider may have landed between the caller's merge and here.
                if self.store.apply_event(&event) != MergeOutcome::Unknown {
                    return None;
                }

                let pending = Pending {
                    generation,
                    events: vec![event],
                };
                match entry {
                    Entry::Occupied(mut stale) => {
                        stale.insert(pending);
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(pending);
                    }
                }

                let resolver = Arc::clone(self);
                Some(tokio::spawn(async move {
                    resolver.fetch_and_merge(rider_id, generation).await;
                }))
            }
        }
    }

    async fn fetch_and_merge(self: Arc<Self>, rider_id: RiderId, generation: u64) {
        let fetched = match require_token(self.tokens.as_ref()).await {
            Ok(token) => self.source.detail(&token, &rider_id).await,
            Err(err) => Err(err),
        };

        let Entry::Occupied(mut pending) = self.in_flight.entry(rider_id.clone()) else {
            return;
        };
        if pending.get().generation != generation {
            // A newer session took over this slot; its own fetch will finish it.
            self.metrics
                .resolver_fetches_total
                .with_label_values(&["discarded"])
                .inc();
            return;
        }

        let detail = match fetched {
            Ok(detail) => detail,
            Err(err) => {
                pending.remove();
                self.metrics
                    .resolver_fetches_total
                    .with_label_values(&["error"])
                    .inc();
                warn!(rider_id = %rider_id, error = %err, "failed to resolve unknown rider");
                return;
            }
        };

        // Landed while the slot is still held so no event can slip between
        // the write and the slot release.
        let events = std::mem::take(&mut pending.get_mut().events);
        let landing = self.store.land_resolved(generation, detail, events);
        pending.remove();

        let outcome = match landing {
            Landing::Inserted | Landing::Merged => "success",
            Landing::Discarded => "discarded",
        };
        self.metrics
            .resolver_fetches_total
            .with_label_values(&[outcome])
            .inc();

        if landing != Landing::Discarded {
            info!(rider_id = %rider_id, ?landing, "resolved rider from stream");
            let _ = self.changes.send(ChangeNotice::Rider {
                rider_id,
                kind: ChangeKind::Resolved,
            });
        }
    }
}
