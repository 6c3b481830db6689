//! Catalog snapshots, filter criteria and page position.
//!
//! Each source snapshot is replaced wholesale when a fetch succeeds and left
//! as is when one fails. Every fetch is tagged with a per-source generation
//! number and a completion is applied only if its generation is still the
//! latest one issued, so a slow response to an old search can never
//! overwrite a newer one.

use std::sync::Arc;

use super::filter::{self, FilterCriteria, PageView, PageWindow, ViewMode};
use super::merge;
use super::record::CatalogRecord;
use crate::api::{ApiError, ExternalMovie, LocalMovie, WatchStatus};

/// Result of offering a fetch completion to the state.
#[derive(Debug)]
pub enum FetchOutcome {
    /// A newer fetch was issued since; nothing changed.
    Stale,
    /// The snapshot was replaced.
    Applied { count: usize },
    /// The fetch failed. For the external source the snapshot was emptied.
    Failed(ApiError),
}

#[derive(Debug, Clone)]
pub struct CatalogState {
    local: Arc<Vec<LocalMovie>>,
    external: Arc<Vec<ExternalMovie>>,
    merged: Arc<Vec<CatalogRecord>>,

    local_generation: u64,
    external_generation: u64,
    local_loaded: bool,
    external_loaded: bool,
    /// Query of the latest external fetch issued.
    external_query: String,

    criteria: FilterCriteria,
    window: PageWindow,
}

impl Default for CatalogState {
    fn default() -> Self {
        Self::new(filter::DEFAULT_PAGE_SIZE)
    }
}

impl CatalogState {
    pub fn new(page_size: usize) -> Self {
        Self {
            local: Arc::new(Vec::new()),
            external: Arc::new(Vec::new()),
            merged: Arc::new(Vec::new()),
            local_generation: 0,
            external_generation: 0,
            local_loaded: false,
            external_loaded: false,
            external_query: String::new(),
            criteria: FilterCriteria::default(),
            window: PageWindow::new(page_size),
        }
    }

    // ========================================================================
    // Fetch bookkeeping
    // ========================================================================

    /// Register a new Local fetch; returns the generation its completion must carry.
    pub fn begin_local_fetch(&mut self) -> u64 {
        self.local_generation = self.local_generation.wrapping_add(1);
        self.local_generation
    }

    /// Register a new External fetch for `query`.
    pub fn begin_external_fetch(&mut self, query: &str) -> u64 {
        self.external_generation = self.external_generation.wrapping_add(1);
        self.external_query = query.to_string();
        self.external_generation
    }

    /// Offer a Local fetch completion. A failure keeps the previous snapshot.
    pub fn complete_local_fetch(
        &mut self,
        generation: u64,
        result: Result<Vec<LocalMovie>, ApiError>,
    ) -> FetchOutcome {
        if generation != self.local_generation {
            tracing::debug!(
                expected = self.local_generation,
                got = generation,
                "Ignoring stale saved-movies result"
            );
            return FetchOutcome::Stale;
        }

        match result {
            Ok(movies) => {
                let count = movies.len();
                self.local = Arc::new(movies);
                self.local_loaded = true;
                self.snapshots_changed();
                FetchOutcome::Applied { count }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load saved movies");
                FetchOutcome::Failed(e)
            }
        }
    }

    /// Offer an External fetch completion. A failure keeps the previous
    /// snapshot but still counts as resolved for [`CatalogState::is_ready`].
    pub fn complete_external_fetch(
        &mut self,
        generation: u64,
        result: Result<Vec<ExternalMovie>, ApiError>,
    ) -> FetchOutcome {
        if generation != self.external_generation {
            tracing::debug!(
                expected = self.external_generation,
                got = generation,
                query = %self.external_query,
                "Ignoring stale external search result"
            );
            return FetchOutcome::Stale;
        }

        self.external_loaded = true;
        match result {
            Ok(movies) => {
                let count = movies.len();
                self.external = Arc::new(movies);
                self.snapshots_changed();
                FetchOutcome::Applied { count }
            }
            Err(e) => {
                tracing::warn!(error = %e, query = %self.external_query, "External search failed");
                FetchOutcome::Failed(e)
            }
        }
    }

    fn snapshots_changed(&mut self) {
        self.merged = Arc::new(merge::merge(&self.local, &self.external));
        let count = self.filtered_count();
        self.window.clamp(count);
    }

    /// Both sources have resolved at least once.
    pub fn is_ready(&self) -> bool {
        self.local_loaded && self.external_loaded
    }

    pub fn local(&self) -> &Arc<Vec<LocalMovie>> {
        &self.local
    }

    pub fn external(&self) -> &Arc<Vec<ExternalMovie>> {
        &self.external
    }

    pub fn merged(&self) -> &Arc<Vec<CatalogRecord>> {
        &self.merged
    }

    pub fn external_query(&self) -> &str {
        &self.external_query
    }

    pub fn total_available(&self) -> usize {
        self.merged.len()
    }

    // ========================================================================
    // Filters & paging
    // ========================================================================

    pub fn criteria(&self) -> &FilterCriteria {
        &self.criteria
    }

    pub fn window(&self) -> &PageWindow {
        &self.window
    }

    /// Search text changes keep the current page where possible.
    pub fn set_search_text(&mut self, text: impl Into<String>) {
        self.criteria.search_text = text.into();
        let count = self.filtered_count();
        self.window.clamp(count);
    }

    pub fn set_status(&mut self, status: Option<WatchStatus>) {
        self.criteria.status = status;
        self.window.reset();
    }

    pub fn set_genre(&mut self, genre: Option<String>) {
        self.criteria.genre = genre.filter(|g| !g.trim().is_empty());
        self.window.reset();
    }

    pub fn set_view_mode(&mut self, view_mode: ViewMode) {
        self.criteria.view_mode = view_mode;
        self.window.reset();
    }

    /// Returns false (and stays put) when `page` is out of range.
    pub fn go_to_page(&mut self, page: usize) -> bool {
        let count = self.filtered_count();
        self.window.go_to(page, count)
    }

    pub fn filtered(&self) -> Vec<CatalogRecord> {
        filter::apply(&self.merged, &self.criteria)
    }

    pub fn filtered_count(&self) -> usize {
        filter::select(&self.merged, &self.criteria).count()
    }

    /// The page to render.
    pub fn visible(&self) -> PageView {
        filter::paginate(&self.filtered(), &self.window)
    }
}
