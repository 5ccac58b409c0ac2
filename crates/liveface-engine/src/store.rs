use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

/// Method string written with every verification record.
pub const VERIFICATION_METHOD: &str = "live_face_recognition";
/// Schema version of the verification procedure.
pub const VERIFICATION_VERSION: i64 = 2;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
}

/// Outcome of a successful verification as persisted for one user.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct VerificationRecord {
    pub user_id: String,
    pub verified: bool,
    pub confidence: f64,
    pub method: String,
    pub version: i64,
    pub verified_at: String,
}

/// SQLite-backed store for verification flags.
///
/// Only the decision and its confidence are persisted — never signatures,
/// landmarks, or any other biometric payload.
#[derive(Clone)]
pub struct VerificationStore {
    conn: Connection,
}

impl VerificationStore {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 CREATE TABLE IF NOT EXISTS verifications (
                     user_id TEXT PRIMARY KEY,
                     verified INTEGER NOT NULL,
                     confidence REAL NOT NULL,
                     method TEXT NOT NULL,
                     version INTEGER NOT NULL,
                     verified_at TEXT NOT NULL
                 );",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Record a successful verification for a user. A later verification
    /// replaces the earlier record.
    pub async fn record_verification(
        &self,
        user_id: &str,
        confidence: f32,
    ) -> Result<(), StoreError> {
        let user_id = user_id.to_string();
        let verified_at = chrono::Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO verifications
                     (user_id, verified, confidence, method, version, verified_at)
                     VALUES (?1, 1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        user_id,
                        confidence as f64,
                        VERIFICATION_METHOD,
                        VERIFICATION_VERSION,
                        verified_at
                    ],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    /// Fetch the verification record for a user, if any.
    pub async fn get(&self, user_id: &str) -> Result<Option<VerificationRecord>, StoreError> {
        let user_id = user_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT user_id, verified, confidence, method, version, verified_at
                     FROM verifications WHERE user_id = ?1",
                )?;
                let mut rows = stmt.query_map([&user_id], |row| {
                    Ok(VerificationRecord {
                        user_id: row.get(0)?,
                        verified: row.get::<_, i64>(1)? != 0,
                        confidence: row.get(2)?,
                        method: row.get(3)?,
                        version: row.get(4)?,
                        verified_at: row.get(5)?,
                    })
                })?;
                match rows.next() {
                    Some(record) => Ok(Some(record?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::from)
    }

    /// Whether a user has a positive verification on file.
    pub async fn is_verified(&self, user_id: &str) -> Result<bool, StoreError> {
        Ok(self.get(user_id).await?.map(|r| r.verified).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_and_fetch() {
        let store = VerificationStore::open(Path::new(":memory:")).await.unwrap();

        store.record_verification("alice", 0.85).await.unwrap();

        let record = store.get("alice").await.unwrap().unwrap();
        assert!(record.verified);
        assert!((record.confidence - 0.85).abs() < 1e-6);
        assert_eq!(record.method, VERIFICATION_METHOD);
        assert_eq!(record.version, VERIFICATION_VERSION);
        assert!(!record.verified_at.is_empty());
    }

    #[tokio::test]
    async fn test_unverified_user_absent() {
        let store = VerificationStore::open(Path::new(":memory:")).await.unwrap();
        assert!(store.get("bob").await.unwrap().is_none());
        assert!(!store.is_verified("bob").await.unwrap());
    }

    #[tokio::test]
    async fn test_reverification_replaces_record() {
        let store = VerificationStore::open(Path::new(":memory:")).await.unwrap();

        store.record_verification("alice", 0.72).await.unwrap();
        store.record_verification("alice", 0.91).await.unwrap();

        let record = store.get("alice").await.unwrap().unwrap();
        assert!((record.confidence - 0.91).abs() < 1e-6);
        assert!(store.is_verified("alice").await.unwrap());
    }
}
