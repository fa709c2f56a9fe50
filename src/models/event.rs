use serde::{Deserialize, Serialize};

use crate::models::rider::{AssignedOrder, RiderId, RiderLocation};

/// Push events delivered by the shared stream, one JSON text frame each:
/// `{"event": "rider_location_update", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    RiderLocationUpdate(LocationUpdate),
    RiderStatusUpdate(StatusUpdate),
    RiderOrdersUpdate(OrdersUpdate),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub rider_id: RiderId,
    pub location: RiderLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub rider_id: RiderId,
    pub is_online: bool,
    #[serde(default)]
    pub is_available_for_delivery: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrdersUpdate {
    pub rider_id: RiderId,
    #[serde(default)]
    pub orders: Vec<AssignedOrder>,
}

impl StreamEvent {
    pub fn rider_id(&self) -> &RiderId {
        match self {
            StreamEvent::RiderLocationUpdate(update) => &update.rider_id,
            StreamEvent::RiderStatusUpdate(update) => &update.rider_id,
            StreamEvent::RiderOrdersUpdate(update) => &update.rider_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::RiderLocationUpdate(_) => "location",
            StreamEvent::RiderStatusUpdate(_) => "status",
            StreamEvent::RiderOrdersUpdate(_) => "orders",
        }
    }
}

/// Frames the service sends back over the stream. These are hints only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundIntent {
    RequestRiderUpdates {
        #[serde(rename = "riderId")]
        rider_id: RiderId,
    },
}

/// What changed in a controller's view, pushed to dashboard sockets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeNotice {
    Rider {
        #[serde(rename = "riderId")]
        rider_id: RiderId,
        kind: ChangeKind,
    },
    Reseeded,
    Connection {
        connected: bool,
    },
    Selection {
        #[serde(rename = "riderId")]
        rider_id: Option<RiderId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Location,
    Status,
    Orders,
    Resolved,
}

impl ChangeKind {
    pub fn of(event: &StreamEvent) -> Self {
        match event {
            StreamEvent::RiderLocationUpdate(_) => ChangeKind::Location,
            StreamEvent::RiderStatusUpdate(_) => ChangeKind::Status,
            StreamEvent::RiderOrdersUpdate(_) => ChangeKind::Orders,
        }
    }
}
