use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

// ============================================================================
// Status & Genres
// ============================================================================

/// Watch status of a saved movie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchStatus {
    Watched,
    Unwatched,
}

impl WatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Watched => "watched",
            Self::Unwatched => "unwatched",
        }
    }
}

impl fmt::Display for WatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "watched" => Ok(Self::Watched),
            "unwatched" => Ok(Self::Unwatched),
            other => Err(format!(
                "unknown status '{other}' (expected watched or unwatched)"
            )),
        }
    }
}

/// Genre choices accepted by the backend for saved movies.
pub const GENRES: [&str; 10] = [
    "action",
    "comedy",
    "drama",
    "horror",
    "sci-fi",
    "thriller",
    "romance",
    "documentary",
    "animation",
    "other",
];

/// Genre used when an external record has none.
pub const FALLBACK_GENRE: &str = "other";

// ============================================================================
// Catalog Records (wire shapes)
// ============================================================================

/// A movie saved in the user's watchlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalMovie {
    pub id: i64,
    /// Cross-source dedup key. Absent (or blank) for hand-entered movies.
    #[serde(rename = "imdb_id", default, deserialize_with = "non_blank")]
    pub external_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub genre: String,
    #[serde(rename = "release_year", default, deserialize_with = "lenient_year")]
    pub year: Option<i32>,
    pub status: WatchStatus,
    #[serde(default, deserialize_with = "lenient_rating")]
    pub rating: Option<f32>,
    #[serde(default)]
    pub plot: Option<String>,
    #[serde(default)]
    pub poster: Option<String>,
}

/// A movie from the external catalog search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalMovie {
    #[serde(rename = "imdb_id")]
    pub external_id: String,
    pub title: String,
    #[serde(default, deserialize_with = "non_blank")]
    pub genre: Option<String>,
    #[serde(
        rename = "release_year",
        alias = "year",
        default,
        deserialize_with = "lenient_year"
    )]
    pub year: Option<i32>,
    #[serde(default, deserialize_with = "lenient_rating")]
    pub rating: Option<f32>,
    #[serde(default, deserialize_with = "non_blank")]
    pub plot: Option<String>,
    #[serde(default, deserialize_with = "non_blank")]
    pub poster: Option<String>,
}

// ============================================================================
// List Envelope
// ============================================================================

/// The one list shape accepted at the transport boundary.
///
/// List endpoints answer either with a bare array or with a paginated object
/// `{results, next, count}`. Both decode here; callers only see items plus an
/// optional link to the next page.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ListEnvelope<T> {
    Paginated {
        results: Vec<T>,
        #[serde(default)]
        next: Option<String>,
        #[serde(default)]
        count: Option<u64>,
    },
    Bare(Vec<T>),
}

impl<T> ListEnvelope<T> {
    /// Absolute URL of the next page, if the backend paginated this list.
    pub fn next_link(&self) -> Option<&str> {
        match self {
            Self::Paginated { next, .. } => next.as_deref().filter(|n| !n.is_empty()),
            Self::Bare(_) => None,
        }
    }

    /// Total across all pages when the backend reports it.
    pub fn total_count(&self) -> Option<u64> {
        match self {
            Self::Paginated { count, .. } => *count,
            Self::Bare(items) => Some(items.len() as u64),
        }
    }

    pub fn into_items(self) -> Vec<T> {
        match self {
            Self::Paginated { results, .. } | Self::Bare(results) => results,
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Server-side filters for the saved-movies list. Empty values are not sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalQuery {
    pub status: Option<WatchStatus>,
    pub genre: Option<String>,
    pub search: Option<String>,
}

impl LocalQuery {
    pub(crate) fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(status) = self.status {
            pairs.push(("status".to_string(), status.as_str().to_string()));
        }
        if let Some(genre) = self.genre.as_deref().filter(|g| !g.trim().is_empty()) {
            pairs.push(("genre".to_string(), genre.to_string()));
        }
        if let Some(search) = self.search.as_deref().filter(|s| !s.trim().is_empty()) {
            pairs.push(("search".to_string(), search.to_string()));
        }
        pairs
    }
}

/// Body for creating a saved movie.
///
/// Optional fields serialize as `null` rather than being omitted; the backend
/// treats a missing `imdb_id` and a null one identically but rejects `""`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMovie {
    #[serde(rename = "imdb_id")]
    pub external_id: Option<String>,
    pub title: String,
    pub genre: String,
    #[serde(rename = "release_year")]
    pub year: Option<i32>,
    pub status: WatchStatus,
    pub plot: Option<String>,
    pub poster: Option<String>,
    pub rating: Option<f32>,
}

impl NewMovie {
    /// Project an external catalog entry into a new, unwatched watchlist entry.
    pub fn from_external(movie: &ExternalMovie) -> Self {
        Self {
            external_id: Some(movie.external_id.clone()),
            title: movie.title.clone(),
            genre: movie
                .genre
                .clone()
                .unwrap_or_else(|| FALLBACK_GENRE.to_string()),
            year: movie.year,
            status: WatchStatus::Unwatched,
            plot: movie.plot.clone(),
            poster: movie.poster.clone(),
            rating: movie.rating,
        }
    }

    /// Turn blank optional strings into `None`.
    pub fn normalized(mut self) -> Self {
        fn blank_to_none(value: Option<String>) -> Option<String> {
            value.filter(|v| !v.trim().is_empty())
        }
        self.external_id = blank_to_none(self.external_id);
        self.plot = blank_to_none(self.plot);
        self.poster = blank_to_none(self.poster);
        self
    }
}

/// Partial update for a saved movie. Only set fields are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MovieUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(rename = "release_year", skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<WatchStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
}

impl MovieUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Account registration form.
#[derive(Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub password2: String,
    pub first_name: String,
    pub last_name: String,
}

impl fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("password2", &"[REDACTED]")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .finish()
    }
}

#[derive(Clone, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Serialize)]
pub(crate) struct RefreshRequest<'a> {
    pub refresh: &'a str,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Deserialize)]
pub(crate) struct TokenPair {
    pub access: String,
    pub refresh: String,
}

#[derive(Deserialize)]
pub(crate) struct RenewedAccess {
    pub access: String,
}

/// Watchlist statistics for the dashboard.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Stats {
    #[serde(default)]
    pub watched_movies: u64,
    #[serde(default)]
    pub watched_this_month: u64,
    #[serde(default)]
    pub by_genre: BTreeMap<String, u64>,
    #[serde(default)]
    pub recent_watched: Vec<LocalMovie>,
}

// ============================================================================
// Lenient field decoders
// ============================================================================

/// `""` and whitespace-only strings decode as `None`.
fn non_blank<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.trim().is_empty()))
}

/// Ratings arrive as numbers, decimal strings (`"8.5"`) or `"N/A"`.
fn lenient_rating<'de, D>(deserializer: D) -> Result<Option<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64().map(|v| v as f32),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f32>().ok(),
        _ => None,
    })
}

/// Years arrive as numbers or strings such as `"2010"` or `"2010–2014"`;
/// the leading four digits win.
fn lenient_year<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        Some(serde_json::Value::String(s)) => {
            let digits: String = s.trim().chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok()
        }
        _ => None,
    })
}
