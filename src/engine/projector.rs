//! Read-only views derived from the store. Nothing here mutates state or
//! reads the wall clock; `now` is always passed in.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::geo::haversine_km;
use crate::models::rider::{Rider, RiderLocation};
use crate::models::snapshot::Pagination;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub total: usize,
    pub online: usize,
    pub available: usize,
    /// Online but not taking deliveries.
    pub busy: usize,
    pub offline: usize,
}

/// A rider as the dashboard shows it, with its last-seen label resolved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiderRow {
    #[serde(flatten)]
    pub rider: Rider,
    pub last_seen: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiderListView {
    pub riders: Vec<RiderRow>,
    pub pagination: Option<Pagination>,
    pub counts: StatusCounts,
    pub loading: bool,
    pub connected: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDistance {
    pub order_id: String,
    pub distance_km: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedRiderView {
    pub rider: RiderRow,
    pub location_history: Option<Vec<RiderLocation>>,
    pub order_distances: Vec<OrderDistance>,
}

pub fn online_riders(riders: &[Rider]) -> Vec<&Rider> {
    riders.iter().filter(|rider| rider.is_online()).collect()
}

pub fn available_riders(riders: &[Rider]) -> Vec<&Rider> {
    online_riders(riders)
        .into_iter()
        .filter(|rider| rider.is_available_for_delivery())
        .collect()
}

pub fn counts_by_status(riders: &[Rider]) -> StatusCounts {
    riders.iter().fold(
        StatusCounts {
            total: riders.len(),
            ..StatusCounts::default()
        },
        |mut counts, rider| {
            if rider.is_available_for_delivery() {
                counts.online += 1;
                counts.available += 1;
            } else if rider.is_online() {
                counts.online += 1;
                counts.busy += 1;
            } else {
                counts.offline += 1;
            }
            counts
        },
    )
}

/// Relative "last seen" label. Future timestamps count as just now.
pub fn format_last_seen(now: DateTime<Utc>, last_active: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(last_active);
    let minutes = elapsed.num_minutes();

    if minutes < 1 {
        "just now".to_string()
    } else if minutes < 60 {
        format!("{minutes}m ago")
    } else if elapsed.num_hours() < 24 {
        format!("{}h ago", elapsed.num_hours())
    } else {
        format!("{}d ago", elapsed.num_days())
    }
}

pub fn row(rider: Rider, now: DateTime<Utc>) -> RiderRow {
    let last_seen = rider.last_active.map(|at| format_last_seen(now, at));
    RiderRow { rider, last_seen }
}

pub fn rows<'a>(riders: impl IntoIterator<Item = &'a Rider>, now: DateTime<Utc>) -> Vec<RiderRow> {
    riders.into_iter().map(|rider| row(rider.clone(), now)).collect()
}

/// Straight-line distance from the rider's current location to each order
/// that carries customer coordinates.
pub fn order_distances(rider: &Rider) -> Vec<OrderDistance> {
    let (Some(location), Some(orders)) = (&rider.current_location, &rider.assigned_orders) else {
        return Vec::new();
    };
    let origin = location.coordinates();

    orders
        .iter()
        .filter_map(|order| {
            order.customer_coordinates.map(|target| OrderDistance {
                order_id: order.id.clone(),
                distance_km: haversine_km(&origin, &target),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::{
        available_riders, counts_by_status, format_last_seen, online_riders, order_distances,
    };
    use crate::engine::store::tests::{location_at, rider, t0};
    use crate::models::rider::{AssignedOrder, Coordinates, Presence, Rider};

    fn ids(riders: Vec<&Rider>) -> Vec<&str> {
        riders.into_iter().map(|rider| rider.id.as_str()).collect()
    }

    #[test]
    fn last_seen_buckets() {
        let now = t0();
        assert_eq!(format_last_seen(now, now - Duration::seconds(30)), "just now");
        assert_eq!(format_last_seen(now, now - Duration::minutes(5)), "5m ago");
        assert_eq!(format_last_seen(now, now - Duration::hours(3)), "3h ago");
        assert_eq!(format_last_seen(now, now - Duration::days(2)), "2d ago");
    }

    #[test]
    fn last_seen_bucket_edges() {
        let now = t0();
        assert_eq!(format_last_seen(now, now - Duration::seconds(59)), "just now");
        assert_eq!(format_last_seen(now, now - Duration::seconds(60)), "1m ago");
        assert_eq!(format_last_seen(now, now - Duration::minutes(60)), "1h ago");
        assert_eq!(format_last_seen(now, now - Duration::hours(24)), "1d ago");
        assert_eq!(format_last_seen(now, now + Duration::minutes(3)), "just now");
    }

    #[test]
    fn online_and_available_filters_keep_order() {
        let riders = vec![
            rider("a", Presence::Online { available: false }),
            rider("b", Presence::Offline),
            rider("c", Presence::Online { available: true }),
        ];

        assert_eq!(ids(online_riders(&riders)), vec!["a", "c"]);
        assert_eq!(ids(available_riders(&riders)), vec!["c"]);
    }

    #[test]
    fn counts_split_online_into_available_and_busy() {
        let riders = vec![
            rider("a", Presence::Online { available: false }),
            rider("b", Presence::Offline),
            rider("c", Presence::Online { available: true }),
            rider("d", Presence::Offline),
        ];

        let counts = counts_by_status(&riders);
        assert_eq!(counts.total, 4);
        assert_eq!(counts.online, 2);
        assert_eq!(counts.available, 1);
        assert_eq!(counts.busy, 1);
        assert_eq!(counts.offline, 2);
    }

    #[test]
    fn distances_skip_orders_without_coordinates() {
        let mut carrying = rider("a", Presence::Online { available: false });
        carrying.current_location = Some(location_at(t0()));
        carrying.assigned_orders = Some(vec![
            AssignedOrder {
                id: "o-1".to_string(),
                customer_name: "Kwame".to_string(),
                customer_address: "Osu".to_string(),
                customer_coordinates: Some(Coordinates {
                    latitude: 5.56,
                    longitude: -0.18,
                }),
                status: "assigned".to_string(),
                total_amount: 18.0,
            },
            AssignedOrder {
                id: "o-2".to_string(),
                customer_name: "Ama".to_string(),
                customer_address: "unknown".to_string(),
                customer_coordinates: None,
                status: "assigned".to_string(),
                total_amount: 7.5,
            },
        ]);

        let distances = order_distances(&carrying);
        assert_eq!(distances.len(), 1);
        assert_eq!(distances[0].order_id, "o-1");
        assert!(distances[0].distance_km > 0.0 && distances[0].distance_km < 10.0);
    }

    #[test]
    fn no_location_means_no_distances() {
        assert!(order_distances(&rider("a", Presence::Offline)).is_empty());
    }
}
