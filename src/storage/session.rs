use anyhow::Result;

use super::schema::Database;

/// Store key for the short-lived access credential.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Store key for the long-lived renewal credential.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

impl Database {
    // ========================================================================
    // Session Key-Value Operations
    // ========================================================================

    /// Read a single session value, `None` if the key is absent.
    pub async fn get_session_value(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM session_store WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(value,)| value))
    }

    /// Upsert a session value.
    pub async fn set_session_value(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO session_store (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Write several values in one transaction so a crash never leaves a
    /// half-written credential pair behind.
    pub async fn set_session_values(&self, entries: &[(&str, &str)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in entries {
            sqlx::query(
                r#"
                INSERT INTO session_store (key, value, updated_at)
                VALUES (?, ?, datetime('now'))
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Remove the given keys. Missing keys are ignored.
    ///
    /// # Returns
    ///
    /// Number of rows actually deleted.
    pub async fn delete_session_values(&self, keys: &[&str]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for key in keys {
            removed += sqlx::query("DELETE FROM session_store WHERE key = ?")
                .bind(key)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_get_missing_value() {
        let db = test_db().await;
        assert_eq!(db.get_session_value(ACCESS_TOKEN_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_and_get_value() {
        let db = test_db().await;
        db.set_session_value(ACCESS_TOKEN_KEY, "abc").await.unwrap();

        let value = db.get_session_value(ACCESS_TOKEN_KEY).await.unwrap();
        assert_eq!(value.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_set_value_upserts() {
        let db = test_db().await;
        db.set_session_value(ACCESS_TOKEN_KEY, "old").await.unwrap();
        db.set_session_value(ACCESS_TOKEN_KEY, "new").await.unwrap();

        let value = db.get_session_value(ACCESS_TOKEN_KEY).await.unwrap();
        assert_eq!(value.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_set_values_writes_pair() {
        let db = test_db().await;
        db.set_session_values(&[(ACCESS_TOKEN_KEY, "a1"), (REFRESH_TOKEN_KEY, "r1")])
            .await
            .unwrap();

        assert_eq!(
            db.get_session_value(ACCESS_TOKEN_KEY).await.unwrap().as_deref(),
            Some("a1")
        );
        assert_eq!(
            db.get_session_value(REFRESH_TOKEN_KEY).await.unwrap().as_deref(),
            Some("r1")
        );
    }

    #[tokio::test]
    async fn test_delete_values() {
        let db = test_db().await;
        db.set_session_values(&[(ACCESS_TOKEN_KEY, "a1"), (REFRESH_TOKEN_KEY, "r1")])
            .await
            .unwrap();

        let removed = db
            .delete_session_values(&[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY])
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(db.get_session_value(ACCESS_TOKEN_KEY).await.unwrap(), None);
        assert_eq!(db.get_session_value(REFRESH_TOKEN_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_missing_is_noop() {
        let db = test_db().await;
        let removed = db.delete_session_values(&[ACCESS_TOKEN_KEY]).await.unwrap();
        assert_eq!(removed, 0);
    }
}
