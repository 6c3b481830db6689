//! Backend access for the watchlist service.
//!
//! - [`session`] - credential pair, persistence and logged-in/out state
//! - [`client`] - bearer attachment, status mapping and single-flight renewal
//! - [`auth`] - register, login, logout
//! - [`movies`] - saved movies, external catalog search, stats
//!
//! # Example
//!
//! ```ignore
//! let session = Session::init(db).await?;
//! let client = SessionClient::new(&config.api_url, session)?;
//! AuthApi::new(client.clone()).login("neo", "hunter2").await?;
//! let saved = MoviesApi::new(client).list_local(&LocalQuery::default()).await?;
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod movies;
pub mod session;
pub mod types;

pub use auth::AuthApi;
pub use client::{ApiRequest, SessionClient};
pub use error::{ApiError, FieldErrors, RenewalFailure};
pub use movies::MoviesApi;
pub use session::{LogoutReason, Session, SessionState};
pub use types::{
    ExternalMovie, ListEnvelope, LocalMovie, LocalQuery, MovieUpdate, NewMovie, RegisterRequest,
    Stats, WatchStatus, FALLBACK_GENRE, GENRES,
};
