#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};

use fleet_presence::engine::controller::{ControllerOptions, PresenceController};
use fleet_presence::error::AppError;
use fleet_presence::models::event::{
    ChangeNotice, LocationUpdate, OrdersUpdate, StatusUpdate, StreamEvent,
};
use fleet_presence::models::rider::{Presence, Rider, RiderId, RiderLocation};
use fleet_presence::models::snapshot::{
    LocationHistory, Pagination, RiderSnapshot, Role, SnapshotQuery,
};
use fleet_presence::observability::metrics::Metrics;
use fleet_presence::source::{RiderSource, StaticTokenProvider};
use fleet_presence::stream::StreamHandle;

/// In-memory riders API. `snapshot = None` makes snapshot fetches fail; a
/// gate holds the matching fetch until it is notified.
#[derive(Default)]
pub struct FakeSource {
    pub snapshot: Mutex<Option<Vec<Rider>>>,
    pub details: Mutex<HashMap<RiderId, Rider>>,
    pub history: Mutex<Vec<RiderLocation>>,
    pub last_query: Mutex<Option<SnapshotQuery>>,
    pub snapshot_gate: Mutex<Option<Arc<Notify>>>,
    pub detail_gate: Mutex<Option<Arc<Notify>>>,
    pub snapshot_calls: AtomicUsize,
    pub detail_calls: AtomicUsize,
}

impl FakeSource {
    pub fn with_riders(riders: Vec<Rider>) -> Arc<Self> {
        let source = Self::default();
        *source.snapshot.lock() = Some(riders);
        Arc::new(source)
    }

    pub fn set_riders(&self, riders: Vec<Rider>) {
        *self.snapshot.lock() = Some(riders);
    }

    pub fn add_detail(&self, rider: Rider) {
        self.details.lock().insert(rider.id.clone(), rider);
    }

    pub fn snapshot_calls(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RiderSource for FakeSource {
    async fn snapshot(&self, _token: &str, query: &SnapshotQuery) -> Result<RiderSnapshot, AppError> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_query.lock() = Some(query.clone());

        let gate = self.snapshot_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let riders = self
            .snapshot
            .lock()
            .clone()
            .ok_or_else(|| AppError::Upstream("riders endpoint unavailable".to_string()))?;
        let total = riders.len() as u32;

        Ok(RiderSnapshot {
            riders,
            pagination: Pagination {
                current_page: query.page,
                total_pages: 1,
                total_riders: total,
                limit: query.limit,
            },
        })
    }

    async fn detail(&self, _token: &str, rider_id: &RiderId) -> Result<Rider, AppError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.detail_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.details
            .lock()
            .get(rider_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("rider {rider_id}")))
    }

    async fn location_history(
        &self,
        _token: &str,
        _rider_id: &RiderId,
    ) -> Result<LocationHistory, AppError> {
        Ok(LocationHistory {
            success: true,
            location_history: self.history.lock().clone(),
        })
    }
}

pub fn rider(id: &str, presence: Presence) -> Rider {
    Rider {
        id: RiderId::new(id),
        name: format!("Rider {id}"),
        email: format!("{id}@example.com"),
        phone: None,
        country: Some("GH".to_string()),
        presence,
        current_location: None,
        assigned_orders: None,
        delivery_stats: None,
        last_active: None,
    }
}

pub fn online(id: &str, available: bool) -> Rider {
    rider(id, Presence::Online { available })
}

pub fn offline(id: &str) -> Rider {
    rider(id, Presence::Offline)
}

pub fn location_at(at: DateTime<Utc>) -> RiderLocation {
    RiderLocation {
        latitude: 5.6037,
        longitude: -0.1870,
        timestamp: at,
        accuracy: Some(8.0),
    }
}

pub fn location_event(id: &str, at: DateTime<Utc>) -> StreamEvent {
    StreamEvent::RiderLocationUpdate(LocationUpdate {
        rider_id: RiderId::new(id),
        location: location_at(at),
    })
}

pub fn status_event(id: &str, is_online: bool, available: bool) -> StreamEvent {
    StreamEvent::RiderStatusUpdate(StatusUpdate {
        rider_id: RiderId::new(id),
        is_online,
        is_available_for_delivery: available,
    })
}

pub fn orders_event(id: &str) -> StreamEvent {
    StreamEvent::RiderOrdersUpdate(OrdersUpdate {
        rider_id: RiderId::new(id),
        orders: Vec::new(),
    })
}

pub fn controller(
    role: Role,
    source: Arc<FakeSource>,
    stream: &StreamHandle,
    token: Option<&str>,
) -> Arc<PresenceController> {
    Arc::new(PresenceController::new(
        role,
        source,
        Arc::new(StaticTokenProvider::new(token.map(str::to_string))),
        stream.clone(),
        Metrics::new(),
        ControllerOptions {
            history_enabled: matches!(role, Role::Admin),
            ..ControllerOptions::default()
        },
    ))
}

pub fn ids(riders: &[Rider]) -> Vec<&str> {
    riders.iter().map(|rider| rider.id.as_str()).collect()
}

/// Waits for the first notice matching `predicate`, skipping the rest.
pub async fn wait_for<F>(changes: &mut broadcast::Receiver<ChangeNotice>, predicate: F) -> ChangeNotice
where
    F: Fn(&ChangeNotice) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let notice = changes.recv().await.expect("change channel open");
            if predicate(&notice) {
                return notice;
            }
        }
    })
    .await
    .expect("timed out waiting for change notice")
}

/// Polls `condition` until it holds; aborted tasks release their resources
/// only once the runtime gets to them.
pub async fn wait_until<F>(condition: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}
