//! Session context: the access/renewal credential pair and its lifecycle.
//!
//! A [`Session`] is created once with [`Session::init`] and handed by clone to
//! every component that talks to the backend. Credentials live in memory behind
//! a lock and are written through to the [`Database`] so they survive restarts.
//! Only three things mutate them: login ([`Session::establish`]), renewal
//! ([`Session::replace_access`]) and logout or renewal failure ([`Session::clear`]).

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::watch;

use super::error::ApiError;
use crate::storage::{Database, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// The user logged out.
    UserRequested,
    /// Renewal failed; the user has to log in again.
    Expired,
}

/// Observable session state.
///
/// Collaborators subscribe with [`Session::subscribe`]; a transition to
/// `LoggedOut { reason: Some(Expired) }` is the signal to return to the login
/// entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Authenticated,
    LoggedOut { reason: Option<LogoutReason> },
}

#[derive(Default)]
struct Tokens {
    access: Option<SecretString>,
    refresh: Option<SecretString>,
}

struct SessionInner {
    db: Database,
    tokens: RwLock<Tokens>,
    state: watch::Sender<SessionState>,
}

/// Shared, cheaply cloneable session context.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Load stored credentials. A missing access credential means logged out.
    pub async fn init(db: Database) -> Result<Self, ApiError> {
        let access = db
            .get_session_value(ACCESS_TOKEN_KEY)
            .await
            .map_err(|e| ApiError::Storage(e.to_string()))?;
        let refresh = db
            .get_session_value(REFRESH_TOKEN_KEY)
            .await
            .map_err(|e| ApiError::Storage(e.to_string()))?;

        let state = if access.is_some() {
            SessionState::Authenticated
        } else {
            SessionState::LoggedOut { reason: None }
        };
        tracing::debug!(authenticated = access.is_some(), "Session initialized");

        let (state_tx, _) = watch::channel(state);
        Ok(Self {
            inner: Arc::new(SessionInner {
                db,
                tokens: RwLock::new(Tokens {
                    access: access.map(SecretString::from),
                    refresh: refresh.map(SecretString::from),
                }),
                state: state_tx,
            }),
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.read_tokens(|t| t.access.is_some())
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// `Authorization` header value for the current access credential.
    pub(crate) fn bearer(&self) -> Option<String> {
        self.read_tokens(|t| {
            t.access
                .as_ref()
                .map(|a| format!("Bearer {}", a.expose_secret()))
        })
    }

    pub(crate) fn refresh_token(&self) -> Option<String> {
        self.read_tokens(|t| t.refresh.as_ref().map(|r| r.expose_secret().to_string()))
    }

    /// Store a fresh credential pair after login.
    pub async fn establish(&self, access: String, refresh: String) -> Result<(), ApiError> {
        self.inner
            .db
            .set_session_values(&[(ACCESS_TOKEN_KEY, &access), (REFRESH_TOKEN_KEY, &refresh)])
            .await
            .map_err(|e| ApiError::Storage(e.to_string()))?;

        self.write_tokens(|t| {
            t.access = Some(SecretString::from(access));
            t.refresh = Some(SecretString::from(refresh));
        });
        self.inner.state.send_replace(SessionState::Authenticated);
        tracing::info!("Session established");
        Ok(())
    }

    /// Swap in a renewed access credential. The renewal credential is kept.
    pub(crate) async fn replace_access(&self, access: String) -> Result<(), ApiError> {
        self.inner
            .db
            .set_session_value(ACCESS_TOKEN_KEY, &access)
            .await
            .map_err(|e| ApiError::Storage(e.to_string()))?;

        self.write_tokens(|t| t.access = Some(SecretString::from(access)));
        self.inner.state.send_replace(SessionState::Authenticated);
        Ok(())
    }

    /// Destroy both credentials and publish the logged-out state.
    ///
    /// Memory is cleared before the store so in-flight calls stop attaching the
    /// old bearer even if the store write fails.
    pub async fn clear(&self, reason: LogoutReason) -> Result<(), ApiError> {
        self.write_tokens(|t| *t = Tokens::default());
        self.inner.state.send_replace(SessionState::LoggedOut {
            reason: Some(reason),
        });

        match reason {
            LogoutReason::Expired => tracing::warn!("Session expired, credentials cleared"),
            LogoutReason::UserRequested => tracing::info!("Logged out"),
        }

        self.inner
            .db
            .delete_session_values(&[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY])
            .await
            .map_err(|e| ApiError::Storage(e.to_string()))?;
        Ok(())
    }

    fn read_tokens<R>(&self, f: impl FnOnce(&Tokens) -> R) -> R {
        let guard = self
            .inner
            .tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write_tokens(&self, f: impl FnOnce(&mut Tokens)) {
        let mut guard = self
            .inner
            .tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (has_access, has_refresh) =
            self.read_tokens(|t| (t.access.is_some(), t.refresh.is_some()));
        f.debug_struct("Session")
            .field("access", &has_access.then_some("[REDACTED]"))
            .field("refresh", &has_refresh.then_some("[REDACTED]"))
            .field("state", &self.state())
            .finish()
    }
}
