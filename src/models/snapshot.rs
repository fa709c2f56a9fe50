use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::rider::{Rider, RiderLocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Moderator,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Admin, Role::Moderator];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Moderator => "moderator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "admin" => Ok(Role::Admin),
            "moderator" => Ok(Role::Moderator),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityFilter {
    #[default]
    All,
    Available,
    Unavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFilters {
    #[serde(default)]
    pub status: StatusFilter,
    #[serde(default)]
    pub availability: AvailabilityFilter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotQuery {
    pub filters: SnapshotFilters,
    pub page: u32,
    pub limit: u32,
}

impl SnapshotQuery {
    pub fn first_page(limit: u32) -> Self {
        Self {
            filters: SnapshotFilters::default(),
            page: 1,
            limit,
        }
    }

    /// Query-string pairs understood by the riders endpoints. `all` filters
    /// and blank searches are left out.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("page", self.page.to_string()),
            ("limit", self.limit.to_string()),
        ];

        match self.filters.status {
            StatusFilter::All => {}
            StatusFilter::Online => params.push(("status", "online".to_string())),
            StatusFilter::Offline => params.push(("status", "offline".to_string())),
        }

        match self.filters.availability {
            AvailabilityFilter::All => {}
            AvailabilityFilter::Available => params.push(("availability", "available".to_string())),
            AvailabilityFilter::Unavailable => {
                params.push(("availability", "unavailable".to_string()))
            }
        }

        if let Some(search) = self.filters.search.as_deref().map(str::trim) {
            if !search.is_empty() {
                params.push(("search", search.to_string()));
            }
        }

        params
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: u32,
    pub total_pages: u32,
    pub total_riders: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiderSnapshot {
    pub riders: Vec<Rider>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationHistory {
    pub success: bool,
    #[serde(default)]
    pub location_history: Vec<RiderLocation>,
}
