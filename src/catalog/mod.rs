//! Catalog reconciliation: saved movies merged with external search results.
//!
//! - [`record`] - tagged record type with the fields filtering needs
//! - [`merge`] - dedup by external id, saved movies win
//! - [`filter`] - view/text/status/genre pipeline and page window
//! - [`debounce`] - trailing-edge delay for typed searches
//! - [`state`] - snapshots with per-source generations
//! - [`source`] - where snapshots come from
//! - [`runner`] - the select loop tying it together

pub mod debounce;
pub mod filter;
pub mod merge;
pub mod record;
pub mod runner;
pub mod source;
pub mod state;

pub use debounce::SearchDebouncer;
pub use filter::{FilterCriteria, PageView, PageWindow, ViewMode, DEFAULT_PAGE_SIZE};
pub use merge::{merge, total_available};
pub use record::CatalogRecord;
pub use runner::{CatalogCommand, CatalogEvent, CatalogRunner, CatalogUpdate, RunExit};
pub use source::{CatalogSource, Mutation};
pub use state::{CatalogState, FetchOutcome};
