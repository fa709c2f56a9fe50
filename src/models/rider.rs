use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RiderId(pub String);

impl RiderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RiderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiderLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

impl RiderLocation {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedOrder {
    #[serde(alias = "_id")]
    pub id: String,
    pub customer_name: String,
    pub customer_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_coordinates: Option<Coordinates>,
    pub status: String,
    pub total_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStats {
    pub total_deliveries: u32,
    pub today_deliveries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_rating: Option<f64>,
}

/// Connection state of a rider that is present in the store. A rider that is
/// not in the store at all is the implicit `Unknown` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum Presence {
    Online { available: bool },
    Offline,
}

impl Presence {
    /// Offline riders are never available, whatever the flags say.
    pub fn from_flags(is_online: bool, is_available: bool) -> Self {
        if is_online {
            Presence::Online {
                available: is_available,
            }
        } else {
            Presence::Offline
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, Presence::Online { .. })
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Presence::Online { available: true })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RiderRecord", into = "RiderRecord")]
pub struct Rider {
    pub id: RiderId,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub country: Option<String>,
    pub presence: Presence,
    pub current_location: Option<RiderLocation>,
    pub assigned_orders: Option<Vec<AssignedOrder>>,
    pub delivery_stats: Option<DeliveryStats>,
    pub last_active: Option<DateTime<Utc>>,
}

impl Rider {
    pub fn is_online(&self) -> bool {
        self.presence.is_online()
    }

    pub fn is_available_for_delivery(&self) -> bool {
        self.presence.is_available()
    }

    /// Takes the location unconditionally; ordering checks belong to the caller.
    pub fn set_location(&mut self, location: RiderLocation, now: DateTime<Utc>) {
        self.current_location = Some(location);
        if !self.presence.is_online() {
            self.presence = Presence::Online { available: false };
        }
        self.last_active = Some(now);
    }

    pub fn set_status(&mut self, is_online: bool, is_available: bool, now: DateTime<Utc>) {
        self.presence = Presence::from_flags(is_online, is_available);
        if is_online || self.last_active.is_none() {
            self.last_active = Some(now);
        }
    }

    pub fn set_orders(&mut self, orders: Vec<AssignedOrder>, now: DateTime<Utc>) {
        self.assigned_orders = Some(orders);
        self.last_active = Some(now);
    }

    pub fn location_timestamp(&self) -> Option<DateTime<Utc>> {
        self.current_location.as_ref().map(|loc| loc.timestamp)
    }
}

/// Wire shape used by the upstream API, with the two presence flags spelled out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RiderRecord {
    #[serde(alias = "_id")]
    id: RiderId,
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    country: Option<String>,
    #[serde(default)]
    is_online: bool,
    #[serde(default)]
    is_available_for_delivery: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_location: Option<RiderLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    assigned_orders: Option<Vec<AssignedOrder>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delivery_stats: Option<DeliveryStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_active: Option<DateTime<Utc>>,
}

impl From<RiderRecord> for Rider {
    fn from(record: RiderRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            email: record.email,
            phone: record.phone,
            country: record.country,
            presence: Presence::from_flags(record.is_online, record.is_available_for_delivery),
            current_location: record.current_location,
            assigned_orders: record.assigned_orders,
            delivery_stats: record.delivery_stats,
            last_active: record.last_active,
        }
    }
}

impl From<Rider> for RiderRecord {
    fn from(rider: Rider) -> Self {
        Self {
            id: rider.id,
            name: rider.name,
            email: rider.email,
            phone: rider.phone,
            country: rider.country,
            is_online: rider.presence.is_online(),
            is_available_for_delivery: rider.presence.is_available(),
            current_location: rider.current_location,
            assigned_orders: rider.assigned_orders,
            delivery_stats: rider.delivery_stats,
            last_active: rider.last_active,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use super::{Presence, Rider};

    fn rider_json(is_online: bool, available: bool) -> serde_json::Value {
        json!({
            "_id": "r-1",
            "name": "Amina",
            "email": "amina@example.com",
            "isOnline": is_online,
            "isAvailableForDelivery": available,
            "currentLocation": {
                "latitude": -1.2921,
                "longitude": 36.8219,
                "timestamp": "2026-10-19T08:00:00Z"
            }
        })
    }

    #[test]
    fn offline_but_available_flags_collapse_to_offline() {
        let rider: Rider = serde_json::from_value(rider_json(false, true)).unwrap();
        assert_eq!(rider.presence, Presence::Offline);
        assert!(!rider.is_available_for_delivery());
    }

    #[test]
    fn serializes_back_to_flag_shape() {
        let rider: Rider = serde_json::from_value(rider_json(true, true)).unwrap();
        let value = serde_json::to_value(&rider).unwrap();

        assert_eq!(value["id"], "r-1");
        assert_eq!(value["isOnline"], true);
        assert_eq!(value["isAvailableForDelivery"], true);
        assert_eq!(value["currentLocation"]["latitude"], -1.2921);
    }

    #[test]
    fn going_offline_keeps_existing_last_active() {
        let mut rider: Rider = serde_json::from_value(rider_json(true, true)).unwrap();
        let earlier = Utc.with_ymd_and_hms(2026, 10, 19, 7, 0, 0).unwrap();
        rider.last_active = Some(earlier);

        rider.set_status(false, true, earlier + Duration::hours(1));

        assert_eq!(rider.presence, Presence::Offline);
        assert_eq!(rider.last_active, Some(earlier));
    }

    #[test]
    fn location_brings_offline_rider_online_but_unavailable() {
        let mut rider: Rider = serde_json::from_value(rider_json(false, false)).unwrap();
        let location = rider.current_location.clone().unwrap();

        rider.set_location(location, Utc::now());

        assert_eq!(rider.presence, Presence::Online { available: false });
    }
}
