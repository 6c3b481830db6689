use std::fmt;

use futures::future::{BoxFuture, FutureExt};

use crate::api::{
    ApiError, ExternalMovie, LocalMovie, LocalQuery, MoviesApi, MovieUpdate, NewMovie,
};

/// A watchlist change requested from the catalog view.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    MarkWatched(i64),
    MarkUnwatched(i64),
    Delete(i64),
    /// Save an external movie by its external id.
    SaveExternal(String),
    Create(NewMovie),
    Update(i64, MovieUpdate),
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MarkWatched(id) => write!(f, "mark #{id} watched"),
            Self::MarkUnwatched(id) => write!(f, "mark #{id} unwatched"),
            Self::Delete(id) => write!(f, "delete #{id}"),
            Self::SaveExternal(external_id) => write!(f, "save {external_id}"),
            Self::Create(movie) => write!(f, "add \"{}\"", movie.title),
            Self::Update(id, _) => write!(f, "update #{id}"),
        }
    }
}

/// Where the catalog runner gets its data.
///
/// Futures are boxed and `'static` so the runner can spawn them.
pub trait CatalogSource: Clone + Send + Sync + 'static {
    /// The full saved-movie set.
    fn fetch_local(&self) -> BoxFuture<'static, Result<Vec<LocalMovie>, ApiError>>;

    /// External search; an empty query returns the default listing.
    fn search_external(
        &self,
        query: String,
    ) -> BoxFuture<'static, Result<Vec<ExternalMovie>, ApiError>>;

    fn apply(&self, mutation: Mutation) -> BoxFuture<'static, Result<(), ApiError>>;
}

impl CatalogSource for MoviesApi {
    fn fetch_local(&self) -> BoxFuture<'static, Result<Vec<LocalMovie>, ApiError>> {
        let api = self.clone();
        async move { api.list_local(&LocalQuery::default()).await }.boxed()
    }

    fn search_external(
        &self,
        query: String,
    ) -> BoxFuture<'static, Result<Vec<ExternalMovie>, ApiError>> {
        let api = self.clone();
        async move { api.search_external(&query).await }.boxed()
    }

    fn apply(&self, mutation: Mutation) -> BoxFuture<'static, Result<(), ApiError>> {
        let api = self.clone();
        async move {
            match mutation {
                Mutation::MarkWatched(id) => api.mark_watched(id).await,
                Mutation::MarkUnwatched(id) => api.mark_unwatched(id).await,
                Mutation::Delete(id) => api.delete(id).await,
                Mutation::SaveExternal(external_id) => {
                    api.save_external(&external_id).await.map(|_| ())
                }
                Mutation::Create(movie) => api.create(&movie.normalized()).await.map(|_| ()),
                Mutation::Update(id, update) => api.update(id, &update).await.map(|_| ()),
            }
        }
        .boxed()
    }
}
