//! The request pipeline shared by restore and edit:
//! quota gate, fingerprint, cache, model call, history.

use std::sync::Arc;

use crate::embedded::{decode_upload, mime_for_format};
use crate::error::AppError;
use crate::feature::Feature;
use crate::fingerprint::{EditKey, Fingerprint};
use crate::identity::{check_quota, Identity};
use crate::model::{ImageModel, ModelRequest};
use crate::store::{CacheEntry, CacheStore, HistoryStore, OperationRecord};

/// Client input after JSON decoding.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub input_image: String,
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    pub output: String,
    pub cache: CacheStatus,
}

enum CacheKey {
    Restore(Fingerprint),
    Edit(EditKey),
}

impl CacheKey {
    fn compute(image_bytes: &[u8], prompt: Option<&str>) -> Self {
        match prompt {
            None => CacheKey::Restore(Fingerprint::of_bytes(image_bytes)),
            Some(prompt) => CacheKey::Edit(EditKey::new(image_bytes, prompt)),
        }
    }

    fn fingerprint(&self) -> &Fingerprint {
        match self {
            CacheKey::Restore(fingerprint) => fingerprint,
            CacheKey::Edit(key) => &key.combined,
        }
    }

    fn prompt_hash(&self) -> Option<&Fingerprint> {
        match self {
            CacheKey::Restore(_) => None,
            CacheKey::Edit(key) => Some(&key.prompt),
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    cache: Arc<dyn CacheStore>,
    history: Arc<dyn HistoryStore>,
    model: Arc<dyn ImageModel>,
    anon_limit: u64,
}

impl Pipeline {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        history: Arc<dyn HistoryStore>,
        model: Arc<dyn ImageModel>,
        anon_limit: u64,
    ) -> Self {
        Self {
            cache,
            history,
            model,
            anon_limit,
        }
    }

    /// Run one create request. `submission` is the decoded body, or the
    /// reason it could not be decoded; it is only inspected after the quota
    /// gate so an exhausted caller learns about the quota first.
    #[tracing::instrument(skip_all, fields(feature = %feature))]
    pub async fn process(
        &self,
        feature: Feature,
        identity: &Identity,
        submission: Result<Submission, AppError>,
    ) -> Result<Processed, AppError> {
        check_quota(self.history.as_ref(), feature, identity, self.anon_limit).await?;

        let submission = submission?;
        let prompt = match feature {
            Feature::Restore => None,
            Feature::Edit => Some(required_prompt(submission.prompt.as_deref())?),
        };

        let (bytes, format) = decode_upload(&submission.input_image)?;
        let key = CacheKey::compute(&bytes, prompt);
        tracing::debug!(
            fingerprint = key.fingerprint().short(),
            mime = mime_for_format(format),
            len = bytes.len(),
            "input fingerprinted"
        );

        let (output, cache) = match self.lookup(feature, key.fingerprint()).await {
            Some(output) => (output, CacheStatus::Hit),
            None => {
                let output = self
                    .model
                    .run(ModelRequest {
                        feature,
                        input_image: &submission.input_image,
                        prompt,
                    })
                    .await?;
                self.populate(CacheEntry {
                    feature,
                    fingerprint: key.fingerprint().clone(),
                    input: submission.input_image.clone(),
                    output: output.clone(),
                    prompt_hash: key.prompt_hash().cloned(),
                    prompt: prompt.map(str::to_owned),
                })
                .await;
                (output, CacheStatus::Miss)
            }
        };
        tracing::info!(
            cache = cache.as_str(),
            fingerprint = key.fingerprint().short(),
            "operation complete"
        );

        self.record_history(OperationRecord::new(
            feature,
            identity.clone(),
            submission.input_image,
            output.clone(),
            prompt.map(str::to_owned),
        ))
        .await;

        Ok(Processed { output, cache })
    }

    /// A failing lookup counts as a miss.
    async fn lookup(&self, feature: Feature, fingerprint: &Fingerprint) -> Option<String> {
        match self.cache.lookup(feature, fingerprint).await {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(error = %err, "cache lookup failed, treating as miss");
                None
            }
        }
    }

    async fn populate(&self, entry: CacheEntry) {
        if let Err(err) = self.cache.store(&entry).await {
            tracing::warn!(error = %err, fingerprint = entry.fingerprint.short(), "cache write failed");
        }
    }

    /// Best effort: the caller gets their result even when this fails.
    async fn record_history(&self, record: OperationRecord) {
        if let Err(err) = self.history.append(&record).await {
            tracing::warn!(error = %err, record = %record.id, "history write failed");
        }
    }
}

fn required_prompt(prompt: Option<&str>) -> Result<&str, AppError> {
    prompt
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::BadRequest("Prompt is required for editing".to_owned()))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::embedded::tests::png_data_url;
    use crate::identity::{AnonId, UserId};
    use crate::model::ModelError;
    use crate::store::{SqliteStore, StoreError, StoreResult};

    const OUTPUT: &str = "data:image/png;base64,cmVzdG9yZWQ=";

    #[derive(Default)]
    struct StubModel {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ImageModel for StubModel {
        async fn run(&self, _request: ModelRequest<'_>) -> Result<String, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ModelError::Status {
                    status: 500,
                    body: "upstream exploded".into(),
                });
            }
            Ok(OUTPUT.to_owned())
        }
    }

    /// History store whose writes always fail.
    struct BrokenHistory(SqliteStore);

    #[async_trait]
    impl HistoryStore for BrokenHistory {
        async fn append(&self, _record: &OperationRecord) -> StoreResult<()> {
            Err(StoreError::Corrupt("disk full".into()))
        }

        async fn count_for_anon(&self, feature: Feature, anon: &AnonId) -> StoreResult<u64> {
            self.0.count_for_anon(feature, anon).await
        }

        async fn list_for_user(
            &self,
            feature: Feature,
            user: &UserId,
        ) -> StoreResult<Vec<OperationRecord>> {
            self.0.list_for_user(feature, user).await
        }
    }

    fn pipeline(store: &SqliteStore, model: Arc<StubModel>) -> Pipeline {
        Pipeline::new(Arc::new(store.clone()), Arc::new(store.clone()), model, 2)
    }

    fn restore() -> Result<Submission, AppError> {
        Ok(Submission {
            input_image: png_data_url(),
            prompt: None,
        })
    }

    fn edit(prompt: &str) -> Result<Submission, AppError> {
        Ok(Submission {
            input_image: png_data_url(),
            prompt: Some(prompt.to_owned()),
        })
    }

    fn user() -> Identity {
        Identity::User(UserId::new("user-1"))
    }

    #[tokio::test]
    async fn cache_hit_does_not_call_the_model() {
        let store = SqliteStore::open_in_memory().expect("store");
        let model = Arc::new(StubModel::default());
        let pipeline = pipeline(&store, model.clone());

        let first = pipeline
            .process(Feature::Restore, &user(), restore())
            .await
            .expect("first");
        let second = pipeline
            .process(Feature::Restore, &user(), restore())
            .await
            .expect("second");

        assert_eq!(first.cache, CacheStatus::Miss);
        assert_eq!(second.cache, CacheStatus::Hit);
        assert_eq!(second.output, OUTPUT);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hits_and_misses_are_both_recorded() {
        let store = SqliteStore::open_in_memory().expect("store");
        let pipeline = pipeline(&store, Arc::new(StubModel::default()));

        for _ in 0..2 {
            pipeline
                .process(Feature::Restore, &user(), restore())
                .await
                .expect("process");
        }

        let history = store
            .list_for_user(Feature::Restore, &UserId::new("user-1"))
            .await
            .expect("list");
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|r| r.output == OUTPUT));
    }

    #[tokio::test]
    async fn edit_cache_is_keyed_by_prompt() {
        let store = SqliteStore::open_in_memory().expect("store");
        let model = Arc::new(StubModel::default());
        let pipeline = pipeline(&store, model.clone());

        for prompt in ["add a hat", "  ADD A HAT ", "remove the hat"] {
            pipeline
                .process(Feature::Edit, &user(), edit(prompt))
                .await
                .expect("process");
        }

        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn restore_and_edit_do_not_share_cache_entries() {
        let store = SqliteStore::open_in_memory().expect("store");
        let model = Arc::new(StubModel::default());
        let pipeline = pipeline(&store, model.clone());

        pipeline
            .process(Feature::Restore, &user(), restore())
            .await
            .expect("restore");
        pipeline
            .process(Feature::Edit, &user(), edit("colorize"))
            .await
            .expect("edit");

        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn third_anonymous_restore_is_rejected_but_edit_is_not() {
        let store = SqliteStore::open_in_memory().expect("store");
        let model = Arc::new(StubModel::default());
        let pipeline = pipeline(&store, model.clone());
        let anon = Identity::Anonymous(AnonId::new("visitor"));

        for _ in 0..2 {
            pipeline
                .process(Feature::Restore, &anon, restore())
                .await
                .expect("within quota");
        }
        let third = pipeline.process(Feature::Restore, &anon, restore()).await;
        assert!(matches!(third, Err(AppError::QuotaExceeded(_))));

        pipeline
            .process(Feature::Edit, &anon, edit("add a hat"))
            .await
            .expect("edit quota is separate");
    }

    #[tokio::test]
    async fn quota_is_checked_before_the_body() {
        let store = SqliteStore::open_in_memory().expect("store");
        let pipeline = Pipeline::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(StubModel::default()),
            0,
        );
        let anon = Identity::Anonymous(AnonId::new("visitor"));

        let result = pipeline
            .process(
                Feature::Restore,
                &anon,
                Err(AppError::BadRequest("bad json".into())),
            )
            .await;
        assert!(matches!(result, Err(AppError::QuotaExceeded(_))));
    }

    #[tokio::test]
    async fn upstream_failure_writes_nothing() {
        let store = SqliteStore::open_in_memory().expect("store");
        let model = Arc::new(StubModel {
            fail: true,
            ..StubModel::default()
        });
        let pipeline = pipeline(&store, model);

        let err = pipeline
            .process(Feature::Restore, &user(), restore())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Upstream(ref m) if m == "upstream exploded"));

        let (bytes, _) = decode_upload(&png_data_url()).expect("decode");
        let cached = store
            .lookup(Feature::Restore, &Fingerprint::of_bytes(&bytes))
            .await
            .expect("lookup");
        assert_eq!(cached, None);
        let history = store
            .list_for_user(Feature::Restore, &UserId::new("user-1"))
            .await
            .expect("list");
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn history_failure_does_not_fail_the_request() {
        let store = SqliteStore::open_in_memory().expect("store");
        let pipeline = Pipeline::new(
            Arc::new(store.clone()),
            Arc::new(BrokenHistory(store.clone())),
            Arc::new(StubModel::default()),
            2,
        );

        let processed = pipeline
            .process(Feature::Restore, &user(), restore())
            .await
            .expect("history is best effort");
        assert_eq!(processed.output, OUTPUT);
    }

    #[tokio::test]
    async fn edit_requires_a_prompt() {
        let store = SqliteStore::open_in_memory().expect("store");
        let model = Arc::new(StubModel::default());
        let pipeline = pipeline(&store, model.clone());

        for prompt in [None, Some("   ")] {
            let submission = Ok(Submission {
                input_image: png_data_url(),
                prompt: prompt.map(str::to_owned),
            });
            let err = pipeline
                .process(Feature::Edit, &user(), submission)
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::BadRequest(ref m) if m == "Prompt is required for editing"));
        }
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejects_input_that_is_not_an_image() {
        let store = SqliteStore::open_in_memory().expect("store");
        let pipeline = pipeline(&store, Arc::new(StubModel::default()));

        let err = pipeline
            .process(
                Feature::Restore,
                &user(),
                Ok(Submission {
                    input_image: "data:text/plain;base64,aGVsbG8=".into(),
                    prompt: None,
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn edit_history_keeps_the_trimmed_prompt() {
        let store = SqliteStore::open_in_memory().expect("store");
        let pipeline = pipeline(&store, Arc::new(StubModel::default()));

        pipeline
            .process(Feature::Edit, &user(), edit("  Make It Sunny  "))
            .await
            .expect("edit");

        let history = store
            .list_for_user(Feature::Edit, &UserId::new("user-1"))
            .await
            .expect("list");
        assert_eq!(history[0].prompt.as_deref(), Some("Make It Sunny"));
    }
}
