//! Fetch → generate → stamp → publish.
//!
//! ## Lifecycle
//!
//! ```text
//! PublishPipeline::run(request)
//!   → prepare(request)
//!       validate      empty request          → NoInput
//!       fetch         store.get(path)        not found = create branch
//!       generate      format + oracle call   → GenerationFailed
//!       stamp         fresh FW_VERSION
//!   → publish(prepared)
//!       update(path, msg, content, token)    stale token  → ConcurrentModification
//!       create(path, msg, content)           path exists  → ConcurrentModification
//! ```
//!
//! The revision token read at fetch is carried inside `PreparedRun` and handed
//! to `update` untouched. There are no locks and no retries: a losing run
//! reports `ConcurrentModification` and stops.
//!
//! Both external calls are bounded by the configured timeouts regardless of
//! the collaborator implementation.

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::errors::{GenerationError, PipelineError, StoreError};
use crate::generation::{CompletionOracle, GenerationClient};
use crate::prompts::{self, CONTRACT_VERSION};
use crate::stamper::{self, StampAction};
use crate::store::{RevisionToken, SourceStore, StoredSource};

/// Whether the publish replaced an existing document or created one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishAction {
    Updated,
    Created,
}

impl std::fmt::Display for PublishAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Updated => write!(f, "updated"),
            Self::Created => write!(f, "created"),
        }
    }
}

/// Record of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishResult {
    pub action: PublishAction,
    pub path: String,
    /// Commit identifier reported by the store, if any.
    pub commit_id: Option<String>,
    /// Revision token of the published document.
    pub revision: RevisionToken,
    /// Audit message attached to the write.
    pub message: String,
    pub published_at: DateTime<Utc>,
    /// `FW_VERSION` value of the published sketch.
    pub marker: String,
}

/// A generated and stamped sketch that has not been published yet.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    path: String,
    base: Option<RevisionToken>,
    content: String,
    marker: String,
    stamp_action: StampAction,
}

impl PreparedRun {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Revision token read at fetch; `None` means the publish will create.
    pub fn base_revision(&self) -> Option<&RevisionToken> {
        self.base.as_ref()
    }

    /// The stamped sketch.
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn stamp_action(&self) -> StampAction {
        self.stamp_action
    }
}

/// Audit message for a publish at `at`.
pub fn commit_message(tag: &str, at: DateTime<Utc>) -> String {
    format!("{tag} {}", at.to_rfc3339_opts(SecondsFormat::Secs, true))
}

async fn bounded<T, E>(
    limit: Duration,
    call: impl Future<Output = Result<T, E>>,
    on_timeout: impl FnOnce(u64) -> E,
) -> Result<T, E> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(limit.as_secs())),
    }
}

/// The regeneration pipeline for one tracked sketch.
pub struct PublishPipeline<O, S> {
    config: PipelineConfig,
    generator: GenerationClient<O>,
    store: S,
}

impl<O, S> PublishPipeline<O, S>
where
    O: CompletionOracle,
    S: SourceStore,
{
    pub fn new(config: PipelineConfig, oracle: O, store: S) -> Self {
        Self {
            config,
            generator: GenerationClient::new(oracle),
            store,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn oracle(&self) -> &O {
        self.generator.oracle()
    }

    /// Apply `change_request` to the tracked sketch and publish the result.
    pub async fn run(&self, change_request: &str) -> Result<PublishResult, PipelineError> {
        let prepared = self.prepare(change_request).await?;
        self.publish(prepared).await
    }

    /// Fetch, generate and stamp without writing anything.
    pub async fn prepare(&self, change_request: &str) -> Result<PreparedRun, PipelineError> {
        let request = change_request.trim();
        if request.is_empty() {
            warn!("empty change request, nothing to do");
            return Err(PipelineError::NoInput);
        }

        let path = self.config.repository.sketch_path.clone();
        let (current, base) = match self.fetch(&path).await? {
            Some(doc) => {
                info!(path = %path, revision = %doc.revision, bytes = doc.content.len(), "fetched sketch");
                (doc.content, Some(doc.revision))
            }
            None => {
                info!(path = %path, "sketch not found, a new file will be created");
                (String::new(), None)
            }
        };

        let payload = prompts::format_change_request(&current, request);
        let started = Instant::now();
        info!(
            contract_version = CONTRACT_VERSION,
            model = %self.config.oracle.model,
            "requesting regenerated sketch"
        );
        let code = bounded(
            self.config.oracle.timeout(),
            self.generator.generate(&payload),
            GenerationError::Timeout,
        )
        .await
        .map_err(|e| {
            warn!(error = %e, transport = e.is_transport(), "generation failed, nothing published");
            PipelineError::from(e)
        })?;

        let stamped = stamper::stamp_at(&code, Utc::now());
        info!(
            marker = %stamped.marker,
            stamp = ?stamped.action,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sketch generated and stamped"
        );

        Ok(PreparedRun {
            path,
            base,
            content: stamped.text,
            marker: stamped.marker,
            stamp_action: stamped.action,
        })
    }

    /// Write a prepared sketch back: conditional update when a revision was
    /// fetched, create otherwise.
    pub async fn publish(&self, prepared: PreparedRun) -> Result<PublishResult, PipelineError> {
        let published_at = Utc::now();
        let message = commit_message(&self.config.repository.commit_tag, published_at);
        let limit = self.config.store.timeout();

        let (action, written) = match &prepared.base {
            Some(token) => (
                PublishAction::Updated,
                bounded(
                    limit,
                    self.store
                        .update(&prepared.path, &message, &prepared.content, token),
                    StoreError::Timeout,
                )
                .await,
            ),
            None => (
                PublishAction::Created,
                bounded(
                    limit,
                    self.store.create(&prepared.path, &message, &prepared.content),
                    StoreError::Timeout,
                )
                .await,
            ),
        };

        let commit = written.map_err(|e| {
            let err = PipelineError::from(e);
            warn!(
                path = %prepared.path,
                state = err.terminal_state(),
                error = %err,
                "publish rejected"
            );
            err
        })?;

        info!(
            path = %prepared.path,
            action = %action,
            revision = %commit.revision,
            marker = %prepared.marker,
            "sketch published"
        );

        Ok(PublishResult {
            action,
            path: prepared.path,
            commit_id: commit.commit_id,
            revision: commit.revision,
            message,
            published_at,
            marker: prepared.marker,
        })
    }

    async fn fetch(&self, path: &str) -> Result<Option<StoredSource>, PipelineError> {
        bounded(
            self.config.store.timeout(),
            self.store.get(path),
            StoreError::Timeout,
        )
        .await
        .map_err(|e| {
            warn!(path, error = %e, "fetch failed");
            PipelineError::from(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::MockCompletionOracle;
    use crate::store::{CommitInfo, MockSourceStore};
    use chrono::TimeZone;

    fn fenced(code: &str) -> String {
        format!("```cpp\n{code}\n```")
    }

    fn commit(rev: &str) -> CommitInfo {
        CommitInfo {
            revision: RevisionToken::new(rev),
            commit_id: Some("c0ffee".into()),
        }
    }

    #[test]
    fn commit_message_carries_tag_and_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        assert_eq!(
            commit_message("🤖 Auto-update", at),
            "🤖 Auto-update 2024-05-06T07:08:09Z"
        );
    }

    #[tokio::test]
    async fn empty_request_touches_nothing() {
        let mut store = MockSourceStore::new();
        store.expect_get().never();
        store.expect_update().never();
        store.expect_create().never();
        let mut oracle = MockCompletionOracle::new();
        oracle.expect_complete().never();

        let pipeline = PublishPipeline::new(PipelineConfig::default(), oracle, store);
        let err = pipeline.run("   \n").await.unwrap_err();
        assert!(matches!(err, PipelineError::NoInput));
    }

    #[tokio::test]
    async fn generation_failure_writes_nothing() {
        let mut store = MockSourceStore::new();
        store.expect_get().times(1).returning(|_| {
            Ok(Some(StoredSource {
                content: "void loop(){}".into(),
                revision: RevisionToken::new("abc"),
            }))
        });
        store.expect_update().never();
        store.expect_create().never();
        let mut oracle = MockCompletionOracle::new();
        oracle
            .expect_complete()
            .times(1)
            .returning(|_, _| Err(GenerationError::Unreachable("connection refused".into())));

        let pipeline = PublishPipeline::new(PipelineConfig::default(), oracle, store);
        let err = pipeline.run("add a blink").await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::GenerationFailed(GenerationError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn unusable_reply_writes_nothing() {
        let mut store = MockSourceStore::new();
        store.expect_get().returning(|_| Ok(None));
        store.expect_update().never();
        store.expect_create().never();
        let mut oracle = MockCompletionOracle::new();
        oracle
            .expect_complete()
            .returning(|_, _| Ok("I cannot help with that.".into()));

        let pipeline = PublishPipeline::new(PipelineConfig::default(), oracle, store);
        let err = pipeline.run("add a blink").await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::GenerationFailed(GenerationError::NoCodeBlock)
        ));
    }

    #[tokio::test]
    async fn not_found_creates_and_never_updates() {
        let mut store = MockSourceStore::new();
        store.expect_get().returning(|_| Ok(None));
        store.expect_update().never();
        store
            .expect_create()
            .times(1)
            .withf(|path, message, content| {
                path == "sketches/automatic.ino"
                    && message.starts_with("🤖 Auto-update ")
                    && content.starts_with("#define FW_VERSION \"")
            })
            .returning(|_, _, _| Ok(commit("new")));
        let mut oracle = MockCompletionOracle::new();
        oracle
            .expect_complete()
            .returning(|_, _| Ok(fenced("void setup(){}\nvoid loop(){}")));

        let pipeline = PublishPipeline::new(PipelineConfig::default(), oracle, store);
        let result = pipeline.run("start fresh").await.unwrap();
        assert_eq!(result.action, PublishAction::Created);
        assert_eq!(result.revision.as_str(), "new");
    }

    #[tokio::test]
    async fn fetched_token_is_passed_to_update_unchanged() {
        let mut store = MockSourceStore::new();
        store.expect_get().returning(|_| {
            Ok(Some(StoredSource {
                content: "#define FW_VERSION \"202401010000\"\nvoid loop(){}".into(),
                revision: RevisionToken::new("abc"),
            }))
        });
        store.expect_create().never();
        store
            .expect_update()
            .times(1)
            .withf(|_, _, _, expected| expected.as_str() == "abc")
            .returning(|_, _, _, _| Ok(commit("def")));
        let mut oracle = MockCompletionOracle::new();
        oracle.expect_complete().returning(|_, _| {
            Ok(fenced("#define FW_VERSION \"202401010000\"\nvoid loop(){ blink(); }"))
        });

        let pipeline = PublishPipeline::new(PipelineConfig::default(), oracle, store);
        let result = pipeline.run("blink").await.unwrap();
        assert_eq!(result.action, PublishAction::Updated);
        assert!(result.marker.as_str() > "202401010000");
    }

    #[tokio::test]
    async fn stale_token_surfaces_as_concurrent_modification() {
        let mut store = MockSourceStore::new();
        store.expect_get().returning(|_| {
            Ok(Some(StoredSource {
                content: String::new(),
                revision: RevisionToken::new("abc"),
            }))
        });
        store.expect_update().times(1).returning(|path, _, _, expected| {
            Err(StoreError::Conflict {
                path: path.to_string(),
                expected: expected.to_string(),
            })
        });
        let mut oracle = MockCompletionOracle::new();
        oracle
            .expect_complete()
            .returning(|_, _| Ok(fenced("void loop(){}")));

        let pipeline = PublishPipeline::new(PipelineConfig::default(), oracle, store);
        let err = pipeline.run("x").await.unwrap_err();
        assert!(matches!(err, PipelineError::ConcurrentModification(_)));
        assert_eq!(err.terminal_state(), "aborted_concurrent_modification");
    }

    #[tokio::test]
    async fn fetch_failure_stops_before_generation() {
        let mut store = MockSourceStore::new();
        store
            .expect_get()
            .returning(|_| Err(StoreError::Unauthorized(401)));
        store.expect_update().never();
        store.expect_create().never();
        let mut oracle = MockCompletionOracle::new();
        oracle.expect_complete().never();

        let pipeline = PublishPipeline::new(PipelineConfig::default(), oracle, store);
        let err = pipeline.run("x").await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StoreFailure(StoreError::Unauthorized(401))
        ));
    }

    #[tokio::test]
    async fn prepare_reports_insertion_for_markerless_reply() {
        let mut store = MockSourceStore::new();
        store.expect_get().returning(|_| Ok(None));
        let mut oracle = MockCompletionOracle::new();
        oracle
            .expect_complete()
            .returning(|_, _| Ok(fenced("void loop(){}")));

        let pipeline = PublishPipeline::new(PipelineConfig::default(), oracle, store);
        let prepared = pipeline.prepare("x").await.unwrap();
        assert_eq!(prepared.stamp_action(), StampAction::Inserted);
        assert!(prepared.base_revision().is_none());
        assert!(prepared.content().ends_with("\nvoid loop(){}"));
    }
}
