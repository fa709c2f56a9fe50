//! Upstream collaborators: the riders REST API and the auth token supplier.

pub mod http;

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::rider::{Rider, RiderId};
use crate::models::snapshot::{LocationHistory, RiderSnapshot, SnapshotQuery};

#[async_trait]
pub trait RiderSource: Send + Sync {
    async fn snapshot(&self, token: &str, query: &SnapshotQuery) -> Result<RiderSnapshot, AppError>;

    async fn detail(&self, token: &str, rider_id: &RiderId) -> Result<Rider, AppError>;

    async fn location_history(
        &self,
        token: &str,
        rider_id: &RiderId,
    ) -> Result<LocationHistory, AppError>;
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// `None` means no session is available; callers treat it as fatal for
    /// the operation at hand.
    async fn token(&self) -> Option<String>;
}

/// Token read once from configuration.
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// Fetches a token, failing with `Unauthorized` when there is none.
pub async fn require_token(tokens: &dyn TokenProvider) -> Result<String, AppError> {
    tokens.token().await.ok_or(AppError::Unauthorized)
}
