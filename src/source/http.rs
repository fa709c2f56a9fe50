use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;

use crate::error::AppError;
use crate::models::rider::{Rider, RiderId};
use crate::models::snapshot::{LocationHistory, RiderSnapshot, SnapshotQuery};
use crate::source::RiderSource;

const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Riders API client for one role. Roles differ only in `riders_path`.
pub struct HttpRiderSource {
    http: reqwest::Client,
    riders_url: Url,
}

impl HttpRiderSource {
    pub fn new(base_url: &str, riders_path: &str, timeout: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|err| AppError::Internal(format!("failed to build http client: {err}")))?;

        let mut riders_url = Url::parse(base_url)
            .map_err(|err| AppError::Internal(format!("invalid API base url {base_url}: {err}")))?;
        riders_url
            .path_segments_mut()
            .map_err(|_| AppError::Internal(format!("API base url {base_url} cannot carry a path")))?
            .pop_if_empty()
            .extend(riders_path.split('/').filter(|segment| !segment.is_empty()));

        Ok(Self { http, riders_url })
    }

    pub fn snapshot_url(&self) -> Url {
        self.riders_url.clone()
    }

    pub fn detail_url(&self, rider_id: &RiderId) -> Result<Url, AppError> {
        self.rider_url(rider_id, None)
    }

    pub fn history_url(&self, rider_id: &RiderId) -> Result<Url, AppError> {
        self.rider_url(rider_id, Some("location-history"))
    }

    /// The id travels as one escaped path segment, whatever it contains.
    fn rider_url(&self, rider_id: &RiderId, tail: Option<&str>) -> Result<Url, AppError> {
        let id = rider_id.as_str();
        // `push` silently drops dot segments.
        if id.is_empty() || id == "." || id == ".." {
            return Err(AppError::BadRequest(format!("invalid rider id {id:?}")));
        }

        let mut url = self.riders_url.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::Internal(format!("{} cannot carry a path", self.riders_url)))?
            .push(id)
            .extend(tail);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<T, AppError> {
        let response = request.send().await?;

        match response.status() {
            status if status.is_success() => Ok(response.json::<T>().await?),
            StatusCode::NOT_FOUND => Err(AppError::NotFound(what.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AppError::Unauthorized),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(AppError::Upstream(format!("{what}: {status} {body}")))
            }
        }
    }
}

#[async_trait]
impl RiderSource for HttpRiderSource {
    async fn snapshot(&self, token: &str, query: &SnapshotQuery) -> Result<RiderSnapshot, AppError> {
        let request = self
            .http
            .get(self.snapshot_url())
            .bearer_auth(token)
            .query(&query.to_params());

        self.get_json(request, "rider snapshot").await
    }

    async fn detail(&self, token: &str, rider_id: &RiderId) -> Result<Rider, AppError> {
        let request = self.http.get(self.detail_url(rider_id)?).bearer_auth(token);
        self.get_json(request, &format!("rider {rider_id}")).await
    }

    async fn location_history(
        &self,
        token: &str,
        rider_id: &RiderId,
    ) -> Result<LocationHistory, AppError> {
        let request = self.http.get(self.history_url(rider_id)?).bearer_auth(token);
        let history: LocationHistory = self
            .get_json(request, &format!("location history for {rider_id}"))
            .await?;

        if !history.success {
            return Err(AppError::Upstream(format!(
                "location history for {rider_id} was not returned"
            )));
        }

        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::HttpRiderSource;
    use crate::error::AppError;
    use crate::models::rider::RiderId;

    fn moderator_source() -> HttpRiderSource {
        HttpRiderSource::new("http://api.local/", "/api/moderator/riders/", Duration::from_secs(1))
            .unwrap()
    }

    #[test]
    fn endpoint_paths_follow_role_prefix() {
        let source = moderator_source();
        let id = RiderId::new("r-9");

        assert_eq!(source.snapshot_url().as_str(), "http://api.local/api/moderator/riders");
        assert_eq!(
            source.detail_url(&id).unwrap().as_str(),
            "http://api.local/api/moderator/riders/r-9"
        );
        assert_eq!(
            source.history_url(&id).unwrap().as_str(),
            "http://api.local/api/moderator/riders/r-9/location-history"
        );
    }

    #[test]
    fn base_url_path_is_kept() {
        let source =
            HttpRiderSource::new("https://gw.local/v2", "api/admin/riders", Duration::from_secs(1))
                .unwrap();

        assert_eq!(source.snapshot_url().path(), "/v2/api/admin/riders");
    }

    #[test]
    fn rider_id_cannot_leave_the_role_prefix() {
        let source = moderator_source();
        let hostile = RiderId::new("../../admin/riders?x=");

        let detail = source.detail_url(&hostile).unwrap();
        assert_eq!(detail.path(), "/api/moderator/riders/..%2F..%2Fadmin%2Friders%3Fx=");
        assert_eq!(detail.query(), None);

        let history = source.history_url(&hostile).unwrap();
        assert!(history.path().starts_with("/api/moderator/riders/"));
        assert!(history.path().ends_with("/location-history"));
        assert_eq!(history.path_segments().unwrap().count(), 5);
    }

    #[test]
    fn dot_segment_ids_are_rejected() {
        let source = moderator_source();

        for id in ["", ".", ".."] {
            assert!(matches!(
                source.detail_url(&RiderId::new(id)),
                Err(AppError::BadRequest(_))
            ));
        }
    }
}
