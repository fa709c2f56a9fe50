//! One presence page per observer role.
//!
//! Admin and moderator pages share this controller; they differ only in the
//! `RiderSource` they are given (endpoint paths) and whether the
//! location-history toggle is offered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::projector::{self, RiderListView, SelectedRiderView, StatusCounts};
use crate::engine::resolver::Resolver;
use crate::engine::store::{Clock, FleetStore, MergeOutcome, SystemClock};
use crate::error::AppError;
use crate::models::event::{ChangeKind, ChangeNotice, OutboundIntent, StreamEvent};
use crate::models::rider::{Rider, RiderId, RiderLocation};
use crate::models::snapshot::{
    AvailabilityFilter, Pagination, RiderSnapshot, Role, SnapshotFilters, SnapshotQuery,
    StatusFilter,
};
use crate::observability::metrics::Metrics;
use crate::source::{require_token, RiderSource, TokenProvider};
use crate::stream::{StreamHandle, Subscription};

const CHANGE_BUFFER_SIZE: usize = 256;
const EARLY_EVENT_LIMIT: usize = 1024;

pub struct ControllerOptions {
    pub history_enabled: bool,
    pub page_limit: u32,
    pub clock: Arc<dyn Clock>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            history_enabled: false,
            page_limit: 10,
            clock: Arc::new(SystemClock),
        }
    }
}

/// Partial query change. Touching filters or the page size goes back to
/// page 1 unless a page is given explicitly.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryUpdate {
    pub status: Option<StatusFilter>,
    pub availability: Option<AvailabilityFilter>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl QueryUpdate {
    pub fn apply(&self, query: &SnapshotQuery) -> Result<SnapshotQuery, AppError> {
        if self.page == Some(0) {
            return Err(AppError::BadRequest("page must be >= 1".to_string()));
        }
        if self.limit == Some(0) {
            return Err(AppError::BadRequest("limit must be >= 1".to_string()));
        }

        let mut next = query.clone();
        next.filters = SnapshotFilters {
            status: self.status.unwrap_or(query.filters.status),
            availability: self.availability.unwrap_or(query.filters.availability),
            search: match &self.search {
                Some(search) if search.trim().is_empty() => None,
                Some(search) => Some(search.clone()),
                None => query.filters.search.clone(),
            },
        };
        next.limit = self.limit.unwrap_or(query.limit);

        let reset_page = next.filters != query.filters || next.limit != query.limit;
        next.page = match self.page {
            Some(page) => page,
            None if reset_page => 1,
            None => query.page,
        };

        Ok(next)
    }
}

struct Selection {
    rider_id: RiderId,
    history: Option<Vec<RiderLocation>>,
}

struct ViewState {
    session: Option<Uuid>,
    query: SnapshotQuery,
    pagination: Option<Pagination>,
    loading: bool,
    error: Option<String>,
    selected: Option<Selection>,
}

pub struct PresenceController {
    role: Role,
    source: Arc<dyn RiderSource>,
    tokens: Arc<dyn TokenProvider>,
    stream: StreamHandle,
    store: Arc<FleetStore>,
    resolver: Arc<Resolver>,
    metrics: Metrics,
    changes: broadcast::Sender<ChangeNotice>,
    history_enabled: bool,
    state: RwLock<ViewState>,
    snapshot_seq: AtomicU64,
    pump: Mutex<Option<JoinHandle<()>>>,
    /// Events received before the session's first snapshot landed.
    early: Mutex<Vec<StreamEvent>>,
}

impl PresenceController {
    pub fn new(
        role: Role,
        source: Arc<dyn RiderSource>,
        tokens: Arc<dyn TokenProvider>,
        stream: StreamHandle,
        metrics: Metrics,
        options: ControllerOptions,
    ) -> Self {
        let store = Arc::new(FleetStore::with_clock(options.clock));
        let (changes, _unused_rx) = broadcast::channel(CHANGE_BUFFER_SIZE);
        let resolver = Arc::new(Resolver::new(
            source.clone(),
            tokens.clone(),
            store.clone(),
            metrics.clone(),
            changes.clone(),
        ));

        Self {
            role,
            source,
            tokens,
            stream,
            store,
            resolver,
            metrics,
            changes,
            history_enabled: options.history_enabled,
            state: RwLock::new(ViewState {
                session: None,
                query: SnapshotQuery::first_page(options.page_limit),
                pagination: None,
                loading: false,
                error: None,
                selected: None,
            }),
            snapshot_seq: AtomicU64::new(0),
            pump: Mutex::new(None),
            early: Mutex::new(Vec::new()),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn history_enabled(&self) -> bool {
        self.history_enabled
    }

    pub fn store(&self) -> &FleetStore {
        &self.store
    }

    pub fn is_mounted(&self) -> bool {
        self.state.read().session.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_connected()
    }

    pub fn query(&self) -> SnapshotQuery {
        self.state.read().query.clone()
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeNotice> {
        self.changes.subscribe()
    }

    /// Opens a session: attaches to the stream, then loads the first
    /// snapshot. A failed snapshot leaves the session open with an inline
    /// error; the next refresh retries.
    pub async fn mount(self: &Arc<Self>) -> Result<(), AppError> {
        let session = {
            let mut state = self.state.write();
            if state.session.is_some() {
                return Ok(());
            }

            let session = Uuid::new_v4();
            self.store.reset();
            self.early.lock().clear();
            state.session = Some(session);
            state.pagination = None;
            state.error = None;
            state.selected = None;
            session
        };

        let subscription = self.stream.subscribe();
        let controller = Arc::clone(self);
        let pump = tokio::spawn(async move { controller.pump(subscription).await });
        if let Some(previous) = self.pump.lock().replace(pump) {
            previous.abort();
        }

        info!(role = %self.role, session = %session, "presence session opened");
        self.refresh().await
    }

    /// Closes the session: detaches from the stream and drops all rider state.
    /// Fetches still in flight are discarded when they land.
    pub fn unmount(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }

        let session = {
            let mut state = self.state.write();
            state.loading = false;
            state.selected = None;
            state.pagination = None;
            state.session.take()
        };
        self.store.reset();
        self.early.lock().clear();
        self.metrics
            .riders_tracked
            .with_label_values(&[self.role.as_str()])
            .set(0);

        if let Some(session) = session {
            info!(role = %self.role, session = %session, "presence session closed");
        }
    }

    /// Reloads the current page. Superseded or post-teardown responses are
    /// dropped.
    pub async fn refresh(&self) -> Result<(), AppError> {
        let seq = self.snapshot_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let (session, query) = {
            let mut state = self.state.write();
            let session = state.session.ok_or_else(not_mounted)?;
            state.loading = true;
            (session, state.query.clone())
        };

        let result = self.fetch_snapshot(&query).await;

        let mut state = self.state.write();
        if state.session != Some(session) || self.snapshot_seq.load(Ordering::SeqCst) != seq {
            debug!(role = %self.role, "discarding superseded snapshot");
            return Ok(());
        }
        state.loading = false;

        match result {
            Ok(snapshot) => {
                let listed = snapshot.riders.len();
                {
                    // Seeded and drained under one lock so the pump cannot
                    // route a newer event ahead of the held ones.
                    let mut early = self.early.lock();
                    self.store.seed(snapshot.riders);
                    for event in early.drain(..) {
                        self.route_event(event);
                    }
                }
                state.pagination = Some(snapshot.pagination);
                state.error = None;
                drop(state);

                self.metrics
                    .riders_tracked
                    .with_label_values(&[self.role.as_str()])
                    .set(self.store.len() as i64);
                debug!(role = %self.role, riders = listed, "store seeded");
                let _ = self.changes.send(ChangeNotice::Reseeded);
                Ok(())
            }
            Err(err) => {
                warn!(role = %self.role, error = %err, "snapshot fetch failed");
                state.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    pub async fn update_query(&self, update: &QueryUpdate) -> Result<(), AppError> {
        {
            let mut state = self.state.write();
            state.query = update.apply(&state.query)?;
        }
        self.refresh().await
    }

    pub async fn set_filters(&self, filters: SnapshotFilters) -> Result<(), AppError> {
        self.update_query(&QueryUpdate {
            status: Some(filters.status),
            availability: Some(filters.availability),
            search: Some(filters.search.unwrap_or_default()),
            ..QueryUpdate::default()
        })
        .await
    }

    pub async fn set_page(&self, page: u32) -> Result<(), AppError> {
        self.update_query(&QueryUpdate {
            page: Some(page),
            ..QueryUpdate::default()
        })
        .await
    }

    pub async fn set_limit(&self, limit: u32) -> Result<(), AppError> {
        self.update_query(&QueryUpdate {
            limit: Some(limit),
            ..QueryUpdate::default()
        })
        .await
    }

    /// Routes one stream event into the store. Unknown riders go to the
    /// resolver without waiting on it. Until the first snapshot lands events
    /// are held back and checked against it.
    pub fn handle_event(&self, event: StreamEvent) -> MergeOutcome {
        {
            let mut early = self.early.lock();
            if !self.store.is_seeded() {
                let outcome = if early.len() < EARLY_EVENT_LIMIT {
                    early.push(event.clone());
                    MergeOutcome::Queued
                } else {
                    warn!(
                        role = %self.role,
                        rider_id = %event.rider_id(),
                        "dropping event received before first snapshot"
                    );
                    MergeOutcome::Ignored
                };
                self.record(&event, outcome);
                return outcome;
            }
        }

        self.route_event(event)
    }

    fn route_event(&self, event: StreamEvent) -> MergeOutcome {
        // While a rider is being resolved all of its events wait for the fetch,
        // so they are merged in arrival order.
        let outcome = if self.resolver.enqueue(&event) {
            MergeOutcome::Queued
        } else {
            self.store.apply_event(&event)
        };
        self.record(&event, outcome);

        match outcome {
            MergeOutcome::Applied => {
                let _ = self.changes.send(ChangeNotice::Rider {
                    rider_id: event.rider_id().clone(),
                    kind: ChangeKind::of(&event),
                });
            }
            MergeOutcome::Unknown => {
                self.resolver.resolve(event);
            }
            MergeOutcome::Stale | MergeOutcome::Ignored | MergeOutcome::Queued => {}
        }

        outcome
    }

    fn record(&self, event: &StreamEvent, outcome: MergeOutcome) {
        self.metrics
            .stream_events_total
            .with_label_values(&[event.kind(), outcome.as_str()])
            .inc();
    }

    /// Starts tracking one rider. A fresh detail read is laid over the held
    /// copy, keeping whatever the stream changed while it was out; when the
    /// read fails the held copy is used as is.
    pub async fn select(&self, rider_id: RiderId) -> Result<SelectedRiderView, AppError> {
        let session = self.state.read().session.ok_or_else(not_mounted)?;

        self.stream.request(OutboundIntent::RequestRiderUpdates {
            rider_id: rider_id.clone(),
        });

        let before = self.store.get(&rider_id);
        let fetched = self.fetch_detail(&rider_id).await;

        {
            let mut state = self.state.write();
            if state.session != Some(session) {
                return Err(not_mounted());
            }

            match fetched {
                Ok(detail) => {
                    self.store.pin(Some(rider_id.clone()));
                    self.store.overlay_detail(detail, before.as_ref());
                }
                Err(err) if self.store.contains(&rider_id) => {
                    warn!(rider_id = %rider_id, error = %err, "rider detail fetch failed; using held data");
                    self.store.pin(Some(rider_id.clone()));
                }
                Err(err) => return Err(err),
            }

            state.selected = Some(Selection {
                rider_id: rider_id.clone(),
                history: None,
            });
        }

        let _ = self.changes.send(ChangeNotice::Selection {
            rider_id: Some(rider_id.clone()),
        });
        self.selected_view()
            .ok_or_else(|| AppError::NotFound(format!("rider {rider_id} not found")))
    }

    pub fn clear_selection(&self) {
        let cleared = self.state.write().selected.take();
        self.store.pin(None);

        if cleared.is_some() {
            let _ = self.changes.send(ChangeNotice::Selection { rider_id: None });
        }
    }

    /// Shows or hides the selected rider's location history.
    pub async fn toggle_history(&self) -> Result<SelectedRiderView, AppError> {
        if !self.history_enabled {
            return Err(AppError::BadRequest(format!(
                "location history is not available for {}",
                self.role
            )));
        }

        let (session, rider_id) = {
            let mut state = self.state.write();
            let session = state.session.ok_or_else(not_mounted)?;
            let selection = state
                .selected
                .as_mut()
                .ok_or_else(|| AppError::BadRequest("no rider selected".to_string()))?;

            if selection.history.take().is_some() {
                drop(state);
                return self.selected_view().ok_or_else(no_selection);
            }
            (session, selection.rider_id.clone())
        };

        let history = self.fetch_history(&rider_id).await?;

        {
            let mut state = self.state.write();
            if state.session != Some(session) {
                return Err(not_mounted());
            }
            match state.selected.as_mut() {
                Some(selection) if selection.rider_id == rider_id => {
                    selection.history = Some(history);
                }
                _ => return Err(AppError::BadRequest("selection changed".to_string())),
            }
        }

        self.selected_view().ok_or_else(no_selection)
    }

    pub fn selected_view(&self) -> Option<SelectedRiderView> {
        let state = self.state.read();
        let selection = state.selected.as_ref()?;
        let rider = self.store.get(&selection.rider_id)?;
        let now = self.store.now();

        Some(SelectedRiderView {
            order_distances: projector::order_distances(&rider),
            location_history: selection.history.clone(),
            rider: projector::row(rider, now),
        })
    }

    pub fn list_view(&self) -> RiderListView {
        let riders = self.store.listed();
        let now = self.store.now();
        let state = self.state.read();

        RiderListView {
            counts: projector::counts_by_status(&riders),
            riders: projector::rows(&riders, now),
            pagination: state.pagination,
            loading: state.loading,
            connected: self.stream.is_connected(),
            error: state.error.clone(),
        }
    }

    pub fn online_riders(&self) -> Vec<Rider> {
        let riders = self.store.listed();
        projector::online_riders(&riders).into_iter().cloned().collect()
    }

    pub fn available_riders(&self) -> Vec<Rider> {
        let riders = self.store.listed();
        projector::available_riders(&riders).into_iter().cloned().collect()
    }

    pub fn counts(&self) -> StatusCounts {
        projector::counts_by_status(&self.store.listed())
    }

    async fn pump(self: Arc<Self>, mut subscription: Subscription) {
        loop {
            tokio::select! {
                received = subscription.events.recv() => match received {
                    Ok(event) => {
                        self.handle_event(event);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(role = %self.role, missed, "stream subscription lagged; reseeding");
                        self.spawn_refresh();
                    }
                    Err(RecvError::Closed) => break,
                },
                changed = subscription.connected.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let connected = *subscription.connected.borrow_and_update();
                    let _ = self.changes.send(ChangeNotice::Connection { connected });

                    // Nothing is replayed after a gap, so start over from a snapshot.
                    if connected {
                        info!(role = %self.role, "stream reconnected; reseeding");
                        self.spawn_refresh();
                    }
                }
            }
        }

        debug!(role = %self.role, "event pump stopped");
    }

    fn spawn_refresh(self: &Arc<Self>) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let _ = controller.refresh().await;
        });
    }

    async fn fetch_snapshot(&self, query: &SnapshotQuery) -> Result<RiderSnapshot, AppError> {
        let token = require_token(self.tokens.as_ref()).await?;
        let start = Instant::now();
        let result = self.source.snapshot(&token, query).await;
        self.metrics
            .observe_fetch("snapshot", result.is_ok(), start.elapsed().as_secs_f64());
        result
    }

    async fn fetch_detail(&self, rider_id: &RiderId) -> Result<Rider, AppError> {
        let token = require_token(self.tokens.as_ref()).await?;
        let start = Instant::now();
        let result = self.source.detail(&token, rider_id).await;
        self.metrics
            .observe_fetch("detail", result.is_ok(), start.elapsed().as_secs_f64());
        result
    }

    async fn fetch_history(&self, rider_id: &RiderId) -> Result<Vec<RiderLocation>, AppError> {
        let token = require_token(self.tokens.as_ref()).await?;
        let start = Instant::now();
        let result = self.source.location_history(&token, rider_id).await;
        self.metrics
            .observe_fetch("location_history", result.is_ok(), start.elapsed().as_secs_f64());
        result.map(|history| history.location_history)
    }
}

fn not_mounted() -> AppError {
    AppError::BadRequest("presence session is not open".to_string())
}

fn no_selection() -> AppError {
    AppError::NotFound("selected rider is no longer available".to_string())
}
