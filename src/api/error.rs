use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by [`SessionClient`](super::SessionClient) and the endpoint wrappers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The backend rejected the access credential and it could not be renewed
    /// for this call (the replay was rejected too).
    #[error("Authorization expired")]
    AuthExpired,

    /// Renewal failed; both credentials were cleared and the user must log in again.
    #[error("Session lost, please log in again")]
    SessionLost,

    /// Field-level validation errors from the backend (or the client-side form checks).
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("Not found")]
    NotFound,

    /// Any other non-2xx response. The decoded body is kept for field extraction.
    #[error("HTTP error: status {status}")]
    Http { status: u16, body: Value },

    /// DNS, connect, TLS or body read failure.
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid response body: {0}")]
    Decode(String),

    #[error("Session store error: {0}")]
    Storage(String),

    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Map a non-2xx, non-401 response to the taxonomy.
    pub(crate) fn from_status(status: u16, body: Value) -> Self {
        match status {
            404 => ApiError::NotFound,
            400 => match FieldErrors::from_body(&body) {
                Some(errors) => ApiError::Validation(errors),
                None => ApiError::Http { status, body },
            },
            _ => ApiError::Http { status, body },
        }
    }

    /// True when the caller should send the user back to the login entry point.
    ///
    /// Only a lost session qualifies. `AuthExpired` leaves the stored
    /// credentials in place, so the call can simply be retried.
    pub fn requires_login(&self) -> bool {
        matches!(self, ApiError::SessionLost)
    }

    /// The backend's `detail` message, if the error carries one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ApiError::Http { body, .. } => body.get("detail").and_then(Value::as_str),
            ApiError::Validation(errors) => errors.first("detail"),
            _ => None,
        }
    }
}

/// Why a credential renewal did not produce a new access token.
///
/// `Clone` so one in-flight renewal can hand the same outcome to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenewalFailure {
    #[error("no renewal credential stored")]
    NoRefreshToken,

    #[error("renewal rejected with status {0}")]
    Rejected(u16),

    #[error("renewal request failed: {0}")]
    Transport(String),

    #[error("renewal response invalid: {0}")]
    Decode(String),

    #[error("could not persist renewed credential: {0}")]
    Storage(String),
}

// ============================================================================
// Field Errors
// ============================================================================

/// Field name → messages, as returned by the backend on a 400.
///
/// Values may arrive as a string or an array of strings; both are normalized
/// to a list. `detail` and `non_field_errors` are kept as ordinary fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl FieldErrors {
    /// A single client-side error.
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(field.into(), vec![message.into()]);
        Self { fields }
    }

    /// Parse a JSON object body. Returns `None` for anything that isn't a
    /// non-empty object.
    pub fn from_body(body: &Value) -> Option<Self> {
        let object = body.as_object()?;
        if object.is_empty() {
            return None;
        }

        let fields = object
            .iter()
            .map(|(field, value)| (field.clone(), messages_of(value)))
            .collect();

        Some(Self { fields })
    }

    /// First message for `field`.
    pub fn first(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .and_then(|messages| messages.first())
            .map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

fn messages_of(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        other => vec![other.to_string()],
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.fields {
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            write!(f, "{}: {}", field, messages.join(", "))?;
        }
        Ok(())
    }
}
