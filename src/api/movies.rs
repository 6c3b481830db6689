//! Watchlist and external catalog endpoints.
//!
//! Both catalog sources decode through [`ListEnvelope`], so a backend that
//! switches between bare arrays and paginated objects is handled in one place.

use std::collections::HashSet;

use super::client::{ApiRequest, SessionClient};
use super::error::ApiError;
use super::types::{
    ExternalMovie, ListEnvelope, LocalMovie, LocalQuery, MovieUpdate, NewMovie, Stats,
};
use serde_json::Value;

#[derive(Clone)]
pub struct MoviesApi {
    client: SessionClient,
}

impl MoviesApi {
    pub fn new(client: SessionClient) -> Self {
        Self { client }
    }

    // ========================================================================
    // Local source
    // ========================================================================

    /// All saved movies matching `query`, following `next` links until the
    /// last page. Pages are concatenated in order.
    ///
    /// # Arguments
    ///
    /// * `query` - Server-side filters; only the non-empty ones are sent
    ///
    /// # Returns
    ///
    /// Every saved movie across all pages. A `next` link already visited ends
    /// the walk early instead of looping.
    ///
    /// # Errors
    ///
    /// Any [`ApiError`] from the first failing page. Pages fetched before the
    /// failure are discarded.
    pub async fn list_local(&self, query: &LocalQuery) -> Result<Vec<LocalMovie>, ApiError> {
        let mut request = ApiRequest::get("movies/").query(query.to_pairs());
        let mut movies = Vec::new();
        let mut visited = HashSet::new();
        let mut reported = None;

        loop {
            let page: ListEnvelope<LocalMovie> = self.client.send_json(request).await?;
            reported = reported.or(page.total_count());
            let next = page.next_link().map(str::to_owned);
            movies.extend(page.into_items());

            match next {
                Some(link) if visited.insert(link.clone()) => {
                    tracing::trace!(next = %link, fetched = movies.len(), "Following next page");
                    request = ApiRequest::get(link);
                }
                Some(link) => {
                    tracing::warn!(next = %link, "Pagination loop detected, stopping");
                    break;
                }
                None => break,
            }
        }

        tracing::debug!(count = movies.len(), reported = ?reported, "Fetched saved movies");
        Ok(movies)
    }

    pub async fn get_local(&self, id: i64) -> Result<LocalMovie, ApiError> {
        self.client
            .send_json(ApiRequest::get(format!("movies/{id}/")))
            .await
    }

    pub async fn create(&self, movie: &NewMovie) -> Result<LocalMovie, ApiError> {
        let created: LocalMovie = self
            .client
            .send_json(ApiRequest::post("movies/").json(movie)?)
            .await?;
        tracing::info!(id = created.id, title = %created.title, "Movie saved");
        Ok(created)
    }

    /// PATCH with only the fields set in `update`.
    pub async fn update(&self, id: i64, update: &MovieUpdate) -> Result<LocalMovie, ApiError> {
        self.client
            .send_json(ApiRequest::patch(format!("movies/{id}/")).json(update)?)
            .await
    }

    pub async fn delete(&self, id: i64) -> Result<(), ApiError> {
        self.client
            .send(ApiRequest::delete(format!("movies/{id}/")))
            .await?;
        tracing::info!(id, "Movie deleted");
        Ok(())
    }

    pub async fn mark_watched(&self, id: i64) -> Result<(), ApiError> {
        self.client
            .send(ApiRequest::post(format!("movies/{id}/mark_watched/")))
            .await
    }

    pub async fn mark_unwatched(&self, id: i64) -> Result<(), ApiError> {
        self.client
            .send(ApiRequest::post(format!("movies/{id}/mark_unwatched/")))
            .await
    }

    pub async fn stats(&self) -> Result<Stats, ApiError> {
        self.client.send_json(ApiRequest::get("movies/stats/")).await
    }

    // ========================================================================
    // External source
    // ========================================================================

    /// Search the external catalog. An empty title is sent as-is and returns
    /// the backend's default listing.
    ///
    /// Results are decoded one at a time; an entry without an external id or
    /// with an unexpected shape is skipped so the rest of the search survives.
    pub async fn search_external(&self, title: &str) -> Result<Vec<ExternalMovie>, ApiError> {
        let request =
            ApiRequest::get("search-movie/").query(vec![("title".to_string(), title.to_string())]);
        let page: ListEnvelope<Value> = self.client.send_json(request).await?;
        let items = page.into_items();
        let received = items.len();
        let movies: Vec<ExternalMovie> = items.into_iter().filter_map(decode_external).collect();
        tracing::debug!(
            query = %title,
            count = movies.len(),
            skipped = received - movies.len(),
            "External search finished"
        );
        Ok(movies)
    }

    pub async fn external_details(&self, external_id: &str) -> Result<ExternalMovie, ApiError> {
        self.client
            .send_json(ApiRequest::get(format!("movie-details/{external_id}/")))
            .await
    }

    /// Add an external movie to the watchlist as unwatched.
    ///
    /// Details are fetched first since search results may omit plot and genre.
    pub async fn save_external(&self, external_id: &str) -> Result<LocalMovie, ApiError> {
        let details = self.external_details(external_id).await?;
        self.create(&NewMovie::from_external(&details)).await
    }
}

fn decode_external(item: Value) -> Option<ExternalMovie> {
    match serde_json::from_value::<ExternalMovie>(item) {
        Ok(movie) if !movie.external_id.trim().is_empty() => Some(movie),
        Ok(movie) => {
            tracing::warn!(title = %movie.title, "Skipping external result without an id");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "Skipping malformed external result");
            None
        }
    }
}
