//! Client-side filtering and pagination over the merged catalog.
//!
//! The pipeline order is fixed: source selection, title text, status, genre.
//! Nothing here fails; out-of-range pages are clamped or ignored.

use std::fmt;
use std::str::FromStr;

use super::record::CatalogRecord;
use crate::api::WatchStatus;

/// Records per page unless configured otherwise.
pub const DEFAULT_PAGE_SIZE: usize = 9;

// ============================================================================
// Criteria
// ============================================================================

/// Which source set the pipeline starts from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ViewMode {
    /// Merged local + external view.
    #[default]
    All,
    /// Saved movies only.
    Saved,
}

impl ViewMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Saved => "saved",
        }
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViewMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "saved" => Ok(Self::Saved),
            other => Err(format!("unknown view '{other}' (expected all or saved)")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterCriteria {
    pub view_mode: ViewMode,
    pub status: Option<WatchStatus>,
    /// Blank means no genre filter.
    pub genre: Option<String>,
    /// Empty means no text filter.
    pub search_text: String,
}

impl FilterCriteria {
    fn genre_filter(&self) -> Option<&str> {
        self.genre.as_deref().filter(|g| !g.is_empty())
    }

    /// True when `record` passes the text, status and genre stages.
    pub fn matches(&self, record: &CatalogRecord) -> bool {
        if !self.search_text.is_empty()
            && !record
                .title()
                .to_lowercase()
                .contains(&self.search_text.to_lowercase())
        {
            return false;
        }

        if let Some(status) = self.status {
            if record.status() != Some(status) {
                return false;
            }
        }

        if let Some(genre) = self.genre_filter() {
            match record.genre() {
                Some(g) if g.to_lowercase() == genre.to_lowercase() => {}
                _ => return false,
            }
        }

        true
    }
}

/// The pipeline as a lazy iterator over the merged view.
pub fn select<'a>(
    merged: &'a [CatalogRecord],
    criteria: &'a FilterCriteria,
) -> impl Iterator<Item = &'a CatalogRecord> + 'a {
    merged
        .iter()
        .filter(|r| criteria.view_mode == ViewMode::All || r.is_local())
        .filter(|r| criteria.matches(r))
}

/// Run the pipeline over the merged view.
pub fn apply(merged: &[CatalogRecord], criteria: &FilterCriteria) -> Vec<CatalogRecord> {
    select(merged, criteria).cloned().collect()
}

// ============================================================================
// Pagination
// ============================================================================

/// Current page position. `page_number` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    page_size: usize,
    page_number: usize,
}

impl Default for PageWindow {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl PageWindow {
    /// A page size of 0 is raised to 1.
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            page_number: 1,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_number(&self) -> usize {
        self.page_number
    }

    /// Always at least 1, even for an empty result.
    pub fn total_pages(&self, filtered_count: usize) -> usize {
        filtered_count.div_ceil(self.page_size).max(1)
    }

    /// Move to `page` if it is within `[1, total_pages]`. Returns whether it moved.
    pub fn go_to(&mut self, page: usize, filtered_count: usize) -> bool {
        if page < 1 || page > self.total_pages(filtered_count) {
            tracing::debug!(page, filtered_count, "Ignoring out-of-range page request");
            return false;
        }
        self.page_number = page;
        true
    }

    pub fn reset(&mut self) {
        self.page_number = 1;
    }

    /// Pull the page back into range after the filtered count changed.
    pub fn clamp(&mut self, filtered_count: usize) {
        self.page_number = self
            .page_number
            .clamp(1, self.total_pages(filtered_count));
    }

    /// The records on the current page.
    pub fn slice<'a, T>(&self, records: &'a [T]) -> &'a [T] {
        let start = (self.page_number - 1).saturating_mul(self.page_size);
        if start >= records.len() {
            return &[];
        }
        let end = start.saturating_add(self.page_size).min(records.len());
        &records[start..end]
    }
}

/// What the caller renders: one page of filtered records plus the counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageView {
    pub records: Vec<CatalogRecord>,
    pub page_number: usize,
    pub total_pages: usize,
    pub filtered_count: usize,
}

/// Slice `filtered` according to `window`.
pub fn paginate(filtered: &[CatalogRecord], window: &PageWindow) -> PageView {
    PageView {
        records: window.slice(filtered).to_vec(),
        page_number: window.page_number(),
        total_pages: window.total_pages(filtered.len()),
        filtered_count: filtered.len(),
    }
}
