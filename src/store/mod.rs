//! Persistence ports: the fingerprint cache, the operation history and the
//! session table. The SQLite adapter lives in [`sqlite`].

mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::feature::Feature;
use crate::fingerprint::Fingerprint;
use crate::identity::{AnonId, Identity, UserId};

pub use sqlite::SqliteStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("store connection lock poisoned")]
    Poisoned,
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One cached model result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub feature: Feature,
    pub fingerprint: Fingerprint,
    pub input: String,
    pub output: String,
    /// Edit entries also keep the prompt and its digest.
    pub prompt_hash: Option<Fingerprint>,
    pub prompt: Option<String>,
}

/// Append-only history row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRecord {
    pub id: Uuid,
    pub feature: Feature,
    pub owner: Identity,
    pub input: String,
    pub output: String,
    pub prompt: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OperationRecord {
    pub fn new(
        feature: Feature,
        owner: Identity,
        input: String,
        output: String,
        prompt: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            feature,
            owner,
            input,
            output,
            prompt,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn lookup(
        &self,
        feature: Feature,
        fingerprint: &Fingerprint,
    ) -> StoreResult<Option<String>>;

    /// Insert or overwrite the entry for `(feature, fingerprint)`.
    async fn store(&self, entry: &CacheEntry) -> StoreResult<()>;
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, record: &OperationRecord) -> StoreResult<()>;

    async fn count_for_anon(&self, feature: Feature, anon: &AnonId) -> StoreResult<u64>;

    /// The user's records for one feature, newest first.
    async fn list_for_user(
        &self,
        feature: Feature,
        user: &UserId,
    ) -> StoreResult<Vec<OperationRecord>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn user_for_token(&self, token: &str) -> StoreResult<Option<UserId>>;

    /// Create a session and return its bearer token. Only a digest of the
    /// token is kept.
    async fn issue(&self, user: &UserId) -> StoreResult<String>;
}
