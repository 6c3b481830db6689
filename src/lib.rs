//! Watchlist client: authenticated backend access with transparent credential
//! renewal, and a catalog view that merges saved movies with external search.

pub mod api;
pub mod catalog;
pub mod config;
pub mod storage;
pub mod util;
