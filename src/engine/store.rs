//! In-memory rider map for one observer session.
//!
//! The store merges two unordered sources: wholesale snapshots (`seed`) and
//! incremental stream events (`apply_*`). Every operation is a short O(1)
//! mutation under one lock, so event delivery never waits on anything slow.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::models::event::StreamEvent;
use crate::models::rider::{AssignedOrder, Rider, RiderId, RiderLocation};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied,
    /// Location older than the one already held; discarded.
    Stale,
    /// Rider is not in the store and the event is worth resolving.
    Unknown,
    /// Nothing to do: unknown rider going offline, or orders for an unknown rider.
    Ignored,
    /// Held back until a pending fetch lands.
    Queued,
}

impl MergeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeOutcome::Applied => "applied",
            MergeOutcome::Stale => "stale",
            MergeOutcome::Unknown => "unknown",
            MergeOutcome::Ignored => "ignored",
            MergeOutcome::Queued => "queued",
        }
    }
}

/// How a resolver fetch ended up in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Landing {
    /// New rider: the detail went in with the queued events laid over it.
    Inserted,
    /// A snapshot listed the rider while the fetch was out. The held record
    /// was kept and the queued events merged into it like live ones.
    Merged,
    /// The store was reset while the fetch was out.
    Discarded,
}

struct Entry {
    rider: Rider,
    seq: u64,
    listed: bool,
}

#[derive(Default)]
struct Inner {
    riders: HashMap<RiderId, Entry>,
    next_seq: u64,
    pinned: Option<RiderId>,
    generation: u64,
    seeded: bool,
}

impl Inner {
    fn insert(&mut self, rider: Rider, listed: bool) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.riders.insert(rider.id.clone(), Entry { rider, seq, listed });
    }
}

pub struct FleetStore {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
}

impl FleetStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Bumped by `reset`. Async work started under an older generation must
    /// not write into the store.
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Whether a snapshot has landed since the last reset.
    pub fn is_seeded(&self) -> bool {
        self.inner.read().seeded
    }

    /// Drops every rider and the pin, and starts a new generation.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        let generation = inner.generation + 1;
        *inner = Inner {
            generation,
            ..Inner::default()
        };
    }

    /// Replaces the contents with a fresh snapshot. The pinned rider survives
    /// as an unlisted entry when the snapshot no longer contains it.
    pub fn seed(&self, riders: Vec<Rider>) {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let retained = inner
            .pinned
            .clone()
            .and_then(|pinned| inner.riders.remove(&pinned));

        inner.riders.clear();
        inner.next_seq = 0;
        inner.seeded = true;

        for rider in riders {
            if let Some(existing) = inner.riders.get_mut(&rider.id) {
                existing.rider = rider;
            } else {
                inner.insert(rider, true);
            }
        }

        if let Some(entry) = retained {
            if !inner.riders.contains_key(&entry.rider.id) {
                inner.insert(entry.rider, false);
            }
        }
    }

    pub fn apply_location_update(&self, rider_id: &RiderId, location: RiderLocation) -> MergeOutcome {
        let now = self.clock.now();
        let mut inner = self.inner.write();

        match inner.riders.get_mut(rider_id) {
            Some(entry) => merge_location(&mut entry.rider, location, now),
            None => MergeOutcome::Unknown,
        }
    }

    pub fn apply_status_update(
        &self,
        rider_id: &RiderId,
        is_online: bool,
        is_available: bool,
    ) -> MergeOutcome {
        let now = self.clock.now();
        let mut inner = self.inner.write();

        match inner.riders.get_mut(rider_id) {
            Some(entry) => {
                entry.rider.set_status(is_online, is_available, now);
                MergeOutcome::Applied
            }
            None if is_online => MergeOutcome::Unknown,
            None => MergeOutcome::Ignored,
        }
    }

    pub fn apply_orders_update(&self, rider_id: &RiderId, orders: Vec<AssignedOrder>) -> MergeOutcome {
        let now = self.clock.now();
        let mut inner = self.inner.write();

        match inner.riders.get_mut(rider_id) {
            Some(entry) => {
                entry.rider.set_orders(orders, now);
                MergeOutcome::Applied
            }
            None => MergeOutcome::Ignored,
        }
    }

    pub fn apply_event(&self, event: &StreamEvent) -> MergeOutcome {
        match event {
            StreamEvent::RiderLocationUpdate(update) => {
                self.apply_location_update(&update.rider_id, update.location.clone())
            }
            StreamEvent::RiderStatusUpdate(update) => self.apply_status_update(
                &update.rider_id,
                update.is_online,
                update.is_available_for_delivery,
            ),
            StreamEvent::RiderOrdersUpdate(update) => {
                self.apply_orders_update(&update.rider_id, update.orders.clone())
            }
        }
    }

    /// Inserts or fully replaces one rider from an authoritative detail
    /// fetch. Unlike the `apply_*` methods this may move a location backwards.
    pub fn upsert_from_detail(&self, rider: Rider) {
        let mut inner = self.inner.write();
        upsert(&mut inner, rider);
    }

    /// Lays a detail read over the held record. Fields that stream events
    /// changed since `before` was read keep their live value, and a location
    /// accepted meanwhile is only replaced by a newer fetched one.
    pub fn overlay_detail(&self, mut detail: Rider, before: Option<&Rider>) {
        let mut inner = self.inner.write();

        if let Some(entry) = inner.riders.get(&detail.id) {
            let held = &entry.rider;

            let moved = before.is_none_or(|seen| seen.location_timestamp() != held.location_timestamp());
            if moved && held.location_timestamp() > detail.location_timestamp() {
                detail.current_location = held.current_location.clone();
            }
            if before.is_none_or(|seen| seen.presence != held.presence) {
                detail.presence = held.presence;
            }
            if before.is_none_or(|seen| seen.assigned_orders != held.assigned_orders) {
                detail.assigned_orders = held.assigned_orders.clone();
            }
            detail.last_active = detail.last_active.max(held.last_active);
        }

        upsert(&mut inner, detail);
    }

    /// Lands a resolver fetch taken under `generation`. `events` are the ones
    /// queued for the rider while the fetch was out, in arrival order.
    pub fn land_resolved(&self, generation: u64, detail: Rider, events: Vec<StreamEvent>) -> Landing {
        let now = self.clock.now();
        let mut inner = self.inner.write();

        if inner.generation != generation {
            return Landing::Discarded;
        }

        // The detail was read before any of these events; the held record may
        // already carry something newer.
        if let Some(entry) = inner.riders.get_mut(&detail.id) {
            for event in events {
                merge(&mut entry.rider, event, now);
            }
            return Landing::Merged;
        }

        upsert(&mut inner, overlay(detail, events, now));
        Landing::Inserted
    }

    /// Keeps `rider_id` resident across snapshots that no longer list it.
    /// Passing `None` releases the pin and evicts the rider if it is unlisted.
    pub fn pin(&self, rider_id: Option<RiderId>) {
        let mut inner = self.inner.write();

        if let Some(previous) = inner.pinned.take() {
            let unlisted = inner
                .riders
                .get(&previous)
                .is_some_and(|entry| !entry.listed);
            if unlisted && Some(&previous) != rider_id.as_ref() {
                inner.riders.remove(&previous);
            }
        }

        inner.pinned = rider_id;
    }

    pub fn get(&self, rider_id: &RiderId) -> Option<Rider> {
        self.inner
            .read()
            .riders
            .get(rider_id)
            .map(|entry| entry.rider.clone())
    }

    pub fn contains(&self, rider_id: &RiderId) -> bool {
        self.inner.read().riders.contains_key(rider_id)
    }

    /// Riders in the current listing, in snapshot order followed by riders
    /// resolved from the stream in arrival order.
    pub fn listed(&self) -> Vec<Rider> {
        let inner = self.inner.read();
        let mut entries: Vec<&Entry> = inner.riders.values().filter(|entry| entry.listed).collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.rider.clone()).collect()
    }

    /// Every rider held, listed or pinned.
    pub fn len(&self) -> usize {
        self.inner.read().riders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FleetStore {
    fn default() -> Self {
        Self::new()
    }
}

fn upsert(inner: &mut Inner, rider: Rider) {
    match inner.riders.get_mut(&rider.id) {
        Some(entry) => entry.rider = rider,
        None => {
            // A rider fetched only because it was selected stays off the listing.
            let listed = inner.pinned.as_ref() != Some(&rider.id);
            inner.insert(rider, listed);
        }
    }
}

fn merge_location(rider: &mut Rider, location: RiderLocation, now: DateTime<Utc>) -> MergeOutcome {
    if let Some(current) = rider.location_timestamp() {
        if location.timestamp < current {
            debug!(
                rider_id = %rider.id,
                incoming = %location.timestamp,
                current = %current,
                "discarding out-of-order location"
            );
            return MergeOutcome::Stale;
        }
    }

    rider.set_location(location, now);
    MergeOutcome::Applied
}

/// Same rules as the `apply_*` methods, for a rider already held.
fn merge(rider: &mut Rider, event: StreamEvent, now: DateTime<Utc>) -> MergeOutcome {
    match event {
        StreamEvent::RiderLocationUpdate(update) => merge_location(rider, update.location, now),
        StreamEvent::RiderStatusUpdate(update) => {
            rider.set_status(update.is_online, update.is_available_for_delivery, now);
            MergeOutcome::Applied
        }
        StreamEvent::RiderOrdersUpdate(update) => {
            rider.set_orders(update.orders, now);
            MergeOutcome::Applied
        }
    }
}

/// Replays queued events over a fetched record in arrival order. Locations
/// are only ordered against each other, not against the fetched one.
fn overlay(mut rider: Rider, events: Vec<StreamEvent>, now: DateTime<Utc>) -> Rider {
    let mut latest: Option<DateTime<Utc>> = None;

    for event in events {
        match event {
            StreamEvent::RiderLocationUpdate(update) => {
                if latest.is_some_and(|seen| update.location.timestamp < seen) {
                    continue;
                }
                latest = Some(update.location.timestamp);
                rider.set_location(update.location, now);
            }
            other => {
                merge(&mut rider, other, now);
            }
        }
    }

    rider
}
