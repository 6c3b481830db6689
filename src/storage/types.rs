use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Session store errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process has locked the store
    #[error("Another instance of cinelist appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Session store migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Session store error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classify a sqlx error, mapping SQLite lock conditions to `InstanceLocked`.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if Self::is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }

    /// SQLITE_BUSY, SQLITE_LOCKED and SQLITE_CANTOPEN all surface as lock-ish messages.
    pub(crate) fn is_lock_message(message: &str) -> bool {
        let lower = message.to_lowercase();
        lower.contains("database is locked")
            || lower.contains("database table is locked")
            || lower.contains("sqlite_busy")
            || lower.contains("sqlite_locked")
            || lower.contains("unable to open database file")
    }
}
