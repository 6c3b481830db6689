use crate::api::{ExternalMovie, LocalMovie, WatchStatus};

/// One entry of the merged catalog, tagged by where it came from.
///
/// Filtering and pagination only look at the projected accessors below, so
/// they never need to know which source a record belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogRecord {
    Local(LocalMovie),
    External(ExternalMovie),
}

impl CatalogRecord {
    pub fn title(&self) -> &str {
        match self {
            Self::Local(m) => &m.title,
            Self::External(m) => &m.title,
        }
    }

    /// Genre, `None` when blank.
    pub fn genre(&self) -> Option<&str> {
        let genre = match self {
            Self::Local(m) => Some(m.genre.as_str()),
            Self::External(m) => m.genre.as_deref(),
        };
        genre.filter(|g| !g.trim().is_empty())
    }

    pub fn year(&self) -> Option<i32> {
        match self {
            Self::Local(m) => m.year,
            Self::External(m) => m.year,
        }
    }

    pub fn rating(&self) -> Option<f32> {
        match self {
            Self::Local(m) => m.rating,
            Self::External(m) => m.rating,
        }
    }

    /// Only saved movies carry a watch status.
    pub fn status(&self) -> Option<WatchStatus> {
        match self {
            Self::Local(m) => Some(m.status),
            Self::External(_) => None,
        }
    }

    /// Dedup key. Blank keys are treated as absent.
    pub fn external_id(&self) -> Option<&str> {
        let id = match self {
            Self::Local(m) => m.external_id.as_deref(),
            Self::External(m) => Some(m.external_id.as_str()),
        };
        id.filter(|id| !id.is_empty())
    }

    /// Watchlist id; only saved movies have one.
    pub fn local_id(&self) -> Option<i64> {
        match self {
            Self::Local(m) => Some(m.id),
            Self::External(_) => None,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}
