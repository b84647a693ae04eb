use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{
    CacheEntry, CacheStore, HistoryStore, OperationRecord, SessionStore, StoreError, StoreResult,
};
use crate::feature::Feature;
use crate::fingerprint::Fingerprint;
use crate::identity::{AnonId, Identity, UserId};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cache_entries (
    feature     TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    input_data  TEXT NOT NULL,
    output_data TEXT NOT NULL,
    prompt_hash TEXT,
    prompt      TEXT,
    PRIMARY KEY (feature, fingerprint)
);
CREATE TABLE IF NOT EXISTS operations (
    id          TEXT PRIMARY KEY,
    feature     TEXT NOT NULL,
    user_id     TEXT,
    anon_id     TEXT,
    input_data  TEXT NOT NULL,
    output_data TEXT NOT NULL,
    prompt      TEXT,
    created_at  TEXT NOT NULL,
    CHECK ((user_id IS NULL) <> (anon_id IS NULL))
);
CREATE INDEX IF NOT EXISTS operations_by_user ON operations (user_id, feature, created_at);
CREATE INDEX IF NOT EXISTS operations_by_anon ON operations (anon_id, feature);
CREATE TABLE IF NOT EXISTS sessions (
    token_hash TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL,
    created_at TEXT NOT NULL
);
";

/// SQLite-backed implementation of every store port. One connection is
/// shared behind a mutex; each call hops onto the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&guard)
        })
        .await?
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

struct OperationRow {
    id: String,
    feature: String,
    user_id: Option<String>,
    anon_id: Option<String>,
    input: String,
    output: String,
    prompt: Option<String>,
    created_at: String,
}

impl OperationRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            feature: row.get(1)?,
            user_id: row.get(2)?,
            anon_id: row.get(3)?,
            input: row.get(4)?,
            output: row.get(5)?,
            prompt: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

impl TryFrom<OperationRow> for OperationRecord {
    type Error = StoreError;

    fn try_from(row: OperationRow) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| StoreError::Corrupt(format!("operation id `{}`: {e}", row.id)))?;
        let feature = row.feature.parse::<Feature>().map_err(StoreError::Corrupt)?;
        let owner = match (row.user_id, row.anon_id) {
            (Some(user), None) => Identity::User(UserId::new(user)),
            (None, Some(anon)) => Identity::Anonymous(AnonId::new(anon)),
            _ => return Err(StoreError::Corrupt(format!("operation {id} has no single owner"))),
        };
        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map_err(|e| StoreError::Corrupt(format!("created_at `{}`: {e}", row.created_at)))?
            .with_timezone(&Utc);
        Ok(Self {
            id,
            feature,
            owner,
            input: row.input,
            output: row.output,
            prompt: row.prompt,
            created_at,
        })
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn lookup(
        &self,
        feature: Feature,
        fingerprint: &Fingerprint,
    ) -> StoreResult<Option<String>> {
        let fingerprint = fingerprint.as_str().to_owned();
        self.with_conn(move |conn| {
            let output = conn
                .query_row(
                    "SELECT output_data FROM cache_entries WHERE feature = ?1 AND fingerprint = ?2",
                    params![feature.as_str(), fingerprint],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            Ok(output)
        })
        .await
    }

    async fn store(&self, entry: &CacheEntry) -> StoreResult<()> {
        let entry = entry.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO cache_entries
                     (feature, fingerprint, input_data, output_data, prompt_hash, prompt)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (feature, fingerprint) DO UPDATE SET
                     input_data = excluded.input_data,
                     output_data = excluded.output_data,
                     prompt_hash = excluded.prompt_hash,
                     prompt = excluded.prompt",
                params![
                    entry.feature.as_str(),
                    entry.fingerprint.as_str(),
                    entry.input,
                    entry.output,
                    entry.prompt_hash.as_ref().map(Fingerprint::as_str),
                    entry.prompt,
                ],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl HistoryStore for SqliteStore {
    async fn append(&self, record: &OperationRecord) -> StoreResult<()> {
        let record = record.clone();
        self.with_conn(move |conn| {
            let (user_id, anon_id) = match &record.owner {
                Identity::User(user) => (Some(user.as_str()), None),
                Identity::Anonymous(anon) => (None, Some(anon.as_str())),
            };
            conn.execute(
                "INSERT INTO operations
                     (id, feature, user_id, anon_id, input_data, output_data, prompt, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id.to_string(),
                    record.feature.as_str(),
                    user_id,
                    anon_id,
                    record.input,
                    record.output,
                    record.prompt,
                    timestamp(&record.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn count_for_anon(&self, feature: Feature, anon: &AnonId) -> StoreResult<u64> {
        let anon = anon.as_str().to_owned();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM operations WHERE anon_id = ?1 AND feature = ?2",
                params![anon, feature.as_str()],
                |row| row.get(0),
            )?;
            u64::try_from(count).map_err(|_| StoreError::Corrupt(format!("negative count {count}")))
        })
        .await
    }

    async fn list_for_user(
        &self,
        feature: Feature,
        user: &UserId,
    ) -> StoreResult<Vec<OperationRecord>> {
        let user = user.as_str().to_owned();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, feature, user_id, anon_id, input_data, output_data, prompt, created_at
                 FROM operations
                 WHERE user_id = ?1 AND feature = ?2
                 ORDER BY created_at DESC, rowid DESC",
            )?;
            let rows = stmt
                .query_map(params![user, feature.as_str()], OperationRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(OperationRecord::try_from).collect()
        })
        .await
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn user_for_token(&self, token: &str) -> StoreResult<Option<UserId>> {
        let token_hash = Fingerprint::of_bytes(token.as_bytes()).to_string();
        self.with_conn(move |conn| {
            let user = conn
                .query_row(
                    "SELECT user_id FROM sessions WHERE token_hash = ?1",
                    params![token_hash],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            Ok(user.map(UserId::new))
        })
        .await
    }

    async fn issue(&self, user: &UserId) -> StoreResult<String> {
        let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        let token_hash = Fingerprint::of_bytes(token.as_bytes()).to_string();
        let user = user.as_str().to_owned();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sessions (token_hash, user_id, created_at) VALUES (?1, ?2, ?3)",
                params![token_hash, user, timestamp(&Utc::now())],
            )?;
            Ok(())
        })
        .await?;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().expect("in-memory store")
    }

    fn entry(output: &str) -> CacheEntry {
        CacheEntry {
            feature: Feature::Restore,
            fingerprint: Fingerprint::of_bytes(b"image"),
            input: "data:image/png;base64,aW1hZ2U=".into(),
            output: output.into(),
            prompt_hash: None,
            prompt: None,
        }
    }

    fn record(feature: Feature, owner: Identity, minutes_ago: i64) -> OperationRecord {
        let mut record = OperationRecord::new(
            feature,
            owner,
            "in".into(),
            format!("out-{minutes_ago}"),
            None,
        );
        record.created_at = Utc::now() - Duration::minutes(minutes_ago);
        record
    }

    #[tokio::test]
    async fn cache_miss_then_hit() {
        let store = store();
        let key = Fingerprint::of_bytes(b"image");
        assert_eq!(store.lookup(Feature::Restore, &key).await.expect("lookup"), None);

        store.store(&entry("first")).await.expect("store");
        assert_eq!(
            store.lookup(Feature::Restore, &key).await.expect("lookup"),
            Some("first".to_owned())
        );
    }

    #[tokio::test]
    async fn cache_upsert_is_last_write_wins() {
        let store = store();
        store.store(&entry("first")).await.expect("store");
        store.store(&entry("second")).await.expect("store");

        let key = Fingerprint::of_bytes(b"image");
        assert_eq!(
            store.lookup(Feature::Restore, &key).await.expect("lookup"),
            Some("second".to_owned())
        );
    }

    #[tokio::test]
    async fn cache_is_namespaced_by_feature() {
        let store = store();
        store.store(&entry("restored")).await.expect("store");

        let key = Fingerprint::of_bytes(b"image");
        assert_eq!(store.lookup(Feature::Edit, &key).await.expect("lookup"), None);
    }

    #[tokio::test]
    async fn lists_user_history_newest_first() {
        let store = store();
        let alice = UserId::new("alice");
        for minutes_ago in [30, 10, 20] {
            store
                .append(&record(Feature::Restore, Identity::User(alice.clone()), minutes_ago))
                .await
                .expect("append");
        }
        store
            .append(&record(Feature::Edit, Identity::User(alice.clone()), 1))
            .await
            .expect("append");
        store
            .append(&record(Feature::Restore, Identity::User(UserId::new("bob")), 0))
            .await
            .expect("append");

        let listed = store
            .list_for_user(Feature::Restore, &alice)
            .await
            .expect("list");
        let outputs: Vec<_> = listed.iter().map(|r| r.output.as_str()).collect();
        assert_eq!(outputs, ["out-10", "out-20", "out-30"]);
        assert!(listed
            .iter()
            .all(|r| r.owner == Identity::User(alice.clone())));
    }

    #[tokio::test]
    async fn round_trips_edit_records() {
        let store = store();
        let user = UserId::new("u1");
        let original = OperationRecord::new(
            Feature::Edit,
            Identity::User(user.clone()),
            "in".into(),
            "out".into(),
            Some("add a hat".into()),
        );
        store.append(&original).await.expect("append");

        let listed = store.list_for_user(Feature::Edit, &user).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, original.id);
        assert_eq!(listed[0].prompt.as_deref(), Some("add a hat"));
        assert_eq!(
            listed[0].created_at.timestamp_micros(),
            original.created_at.timestamp_micros()
        );
    }

    #[tokio::test]
    async fn counts_anonymous_operations_per_feature() {
        let store = store();
        let anon = AnonId::new("anon-1");
        for _ in 0..2 {
            store
                .append(&record(Feature::Restore, Identity::Anonymous(anon.clone()), 0))
                .await
                .expect("append");
        }
        store
            .append(&record(Feature::Restore, Identity::Anonymous(AnonId::new("anon-2")), 0))
            .await
            .expect("append");

        assert_eq!(store.count_for_anon(Feature::Restore, &anon).await.expect("count"), 2);
        assert_eq!(store.count_for_anon(Feature::Edit, &anon).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn issued_tokens_resolve_to_their_user() {
        let store = store();
        let token = store.issue(&UserId::new("carol")).await.expect("issue");

        assert_eq!(
            store.user_for_token(&token).await.expect("lookup"),
            Some(UserId::new("carol"))
        );
        assert_eq!(store.user_for_token("bogus").await.expect("lookup"), None);
    }

    #[test]
    fn opens_a_file_backed_database_twice() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("restore.db");
        SqliteStore::open(&path).expect("first open");
        SqliteStore::open(&path).expect("schema creation is idempotent");
    }
}
