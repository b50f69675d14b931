//! One vote per identity per open quiz, applied with revision-checked writes.

use tracing::{debug, info, warn};

use crate::{
    dao::quiz_repository::{QuizRepository, quiz_key},
    error::ServiceError,
    services::retry::backoff_after_conflict,
    state::{
        SharedState,
        quiz::{Quiz, QuizId},
    },
};

/// Record `voter`'s choice of `option_index` on quiz `quiz_id`.
///
/// Every attempt re-reads the record, so a vote that lands concurrently for
/// the same voter is reported as [`ServiceError::AlreadyVoted`] on retry.
/// Checks run in this order: unknown quiz, closed quiz, repeat voter, option
/// range.
pub async fn cast_vote(
    state: &SharedState,
    quiz_id: QuizId,
    option_index: usize,
    voter: &str,
) -> Result<Quiz, ServiceError> {
    let voter = voter.trim();
    if voter.is_empty() {
        return Err(ServiceError::IdentityUnavailable(
            "a voter identity is required".into(),
        ));
    }
    let repository = state.repository().await?;
    let attempts = state.config().vote_attempts;

    for attempt in 1..=attempts {
        let stored = repository
            .find(quiz_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("quiz {quiz_id}")))?;

        let mut quiz = stored.value;
        quiz.record_vote(option_index, voter, state.now())
            .map_err(|rejection| ServiceError::from_rejection(rejection, quiz_id, voter))?;

        match repository.replace(&quiz, &stored.revision).await {
            Ok(_) => {
                refresh_pointer(&repository, &quiz, attempts).await;
                info!(quiz_id, voter, option_index, attempt, "vote recorded");
                return Ok(quiz);
            }
            Err(err) if err.is_conflict() => {
                debug!(quiz_id, voter, attempt, "vote write lost a race; retrying");
                backoff_after_conflict(attempt).await;
            }
            Err(err) => return Err(err.into()),
        }
    }

    warn!(quiz_id, voter, attempts, "giving up on vote after repeated write conflicts");
    Err(ServiceError::Contention {
        key: quiz_key(quiz_id),
        attempts,
    })
}

/// Whether `voter` already has a vote on quiz `quiz_id`.
pub async fn has_voted(
    state: &SharedState,
    quiz_id: QuizId,
    voter: &str,
) -> Result<bool, ServiceError> {
    let repository = state.repository().await?;
    let stored = repository
        .find(quiz_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("quiz {quiz_id}")))?;
    Ok(stored.value.has_voted(voter.trim()))
}

/// Bring the classroom pointer copy up to date with a freshly written record.
///
/// Only a pointer that still names the quiz and holds an older version is
/// touched; failures are logged since the record itself is authoritative.
async fn refresh_pointer(repository: &QuizRepository, quiz: &Quiz, attempts: usize) {
    for attempt in 1..=attempts {
        let current = match repository.find_current(&quiz.classroom).await {
            Ok(Some(current)) => current,
            Ok(None) => return,
            Err(err) => {
                warn!(quiz_id = quiz.id, error = %err, "failed to read current-quiz pointer");
                return;
            }
        };
        if current.value.id != quiz.id || current.value.version >= quiz.version {
            return;
        }

        match repository.replace_current(quiz, &current.revision).await {
            Ok(_) => return,
            Err(err) if err.is_conflict() => {
                debug!(quiz_id = quiz.id, attempt, "pointer refresh raced; retrying");
                backoff_after_conflict(attempt).await;
            }
            Err(err) => {
                warn!(quiz_id = quiz.id, error = %err, "failed to refresh current-quiz pointer");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use futures::future::BoxFuture;
    use time::OffsetDateTime;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            kv_store::{Expect, KvEntry, KvStore, MemoryKvStore, Revision},
            storage::{StorageError, StorageResult},
        },
        services::lifecycle_service::{self, QuizDraft},
        state::{AppState, clock::ManualClock, quiz::ClassroomId},
    };

    async fn setup_with(store: Arc<dyn KvStore>) -> (SharedState, ManualClock) {
        let clock = ManualClock::new(OffsetDateTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000));
        let state = AppState::with_clock(AppConfig::default(), Arc::new(clock.clone()));
        state.set_store(store).await;
        (state, clock)
    }

    async fn open_quiz(state: &SharedState, options: &[&str]) -> Quiz {
        lifecycle_service::create_quiz(
            state,
            QuizDraft {
                title: "Poll".into(),
                options: options.iter().map(|o| o.to_string()).collect(),
                duration: Some(Duration::from_secs(60)),
                ..QuizDraft::default()
            },
            "0xteacher",
        )
        .await
        .unwrap()
    }

    /// Store that lets another voter write first on the first conditional write to a quiz record.
    struct RacingStore {
        inner: MemoryKvStore,
        rival: String,
        raced: AtomicBool,
        puts: AtomicUsize,
    }

    impl KvStore for RacingStore {
        fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<KvEntry>>> {
            self.inner.get(key)
        }

        fn put(
            &self,
            key: &str,
            value: String,
            expect: Expect,
        ) -> BoxFuture<'static, StorageResult<Revision>> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            let race = key.starts_with("quiz_")
                && matches!(expect, Expect::Revision(_))
                && !self.raced.swap(true, Ordering::SeqCst);
            let inner = self.inner.clone();
            let rival = self.rival.clone();
            let key = key.to_string();
            Box::pin(async move {
                if race {
                    let repository = QuizRepository::new(Arc::new(inner.clone()));
                    let id: QuizId = key.trim_start_matches("quiz_").parse().unwrap();
                    let stored = repository.find(id).await?.unwrap();
                    let mut quiz = stored.value;
                    quiz.record_vote(0, &rival, quiz.created_at).unwrap();
                    repository.replace(&quiz, &stored.revision).await?;
                }
                inner.put(&key, value, expect).await
            })
        }

        fn remove(&self, key: &str, expect: Expect) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.remove(key, expect)
        }

        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.health_check()
        }

        fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.try_reconnect()
        }
    }

    /// Store whose conditional writes always conflict.
    struct HostileStore(MemoryKvStore);

    impl KvStore for HostileStore {
        fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<KvEntry>>> {
            self.0.get(key)
        }

        fn put(
            &self,
            key: &str,
            value: String,
            expect: Expect,
        ) -> BoxFuture<'static, StorageResult<Revision>> {
            if matches!(expect, Expect::Revision(_)) {
                let key = key.to_string();
                return Box::pin(async move { Err(StorageError::conflict(key)) });
            }
            self.0.put(key, value, expect)
        }

        fn remove(&self, key: &str, expect: Expect) -> BoxFuture<'static, StorageResult<()>> {
            self.0.remove(key, expect)
        }

        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.0.health_check()
        }

        fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.0.try_reconnect()
        }
    }

    #[tokio::test]
    async fn successive_votes_keep_tally_and_voters_aligned() {
        let (state, _) = setup_with(Arc::new(MemoryKvStore::new())).await;
        let quiz = open_quiz(&state, &["A", "B", "C"]).await;

        for (index, voter) in ["s1", "s2", "s3", "s4"].iter().enumerate() {
            let updated = cast_vote(&state, quiz.id, index % 3, voter).await.unwrap();
            assert_eq!(updated.total_votes(), updated.voters.len() as u64);
            assert_eq!(updated.voters.len(), index + 1);
        }
        assert!(has_voted(&state, quiz.id, "s2").await.unwrap());
        assert!(!has_voted(&state, quiz.id, "s9").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_vote_is_rejected_and_tally_unchanged() {
        let (state, _) = setup_with(Arc::new(MemoryKvStore::new())).await;
        let quiz = open_quiz(&state, &["A", "B"]).await;
        let first = cast_vote(&state, quiz.id, 0, "s1").await.unwrap();

        assert!(matches!(
            cast_vote(&state, quiz.id, 1, "s1").await,
            Err(ServiceError::AlreadyVoted { .. })
        ));
        assert_eq!(lifecycle_service::get_quiz(&state, quiz.id).await.unwrap(), first);
    }

    #[tokio::test]
    async fn votes_after_deadline_or_end_are_expired() {
        let (state, clock) = setup_with(Arc::new(MemoryKvStore::new())).await;
        let quiz = open_quiz(&state, &["A", "B"]).await;

        clock.advance(Duration::from_secs(61));
        assert!(matches!(
            cast_vote(&state, quiz.id, 0, "s1").await,
            Err(ServiceError::Expired(_))
        ));
        let stored = lifecycle_service::get_quiz(&state, quiz.id).await.unwrap();
        assert!(stored.is_active);
        assert_eq!(stored.votes, vec![0, 0]);

        let other = open_quiz(&state, &["A", "B"]).await;
        lifecycle_service::end_quiz(&state, other.id, "0xteacher").await.unwrap();
        assert!(matches!(
            cast_vote(&state, other.id, 0, "s1").await,
            Err(ServiceError::Expired(_))
        ));
    }

    #[tokio::test]
    async fn unknown_quiz_and_bad_option_are_reported() {
        let (state, _) = setup_with(Arc::new(MemoryKvStore::new())).await;
        let quiz = open_quiz(&state, &["A", "B"]).await;

        assert!(matches!(
            cast_vote(&state, 1, 0, "s1").await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            cast_vote(&state, quiz.id, 2, "s1").await,
            Err(ServiceError::InvalidOption {
                index: 2,
                available: 2
            })
        ));
        assert!(matches!(
            cast_vote(&state, quiz.id, 0, "  ").await,
            Err(ServiceError::IdentityUnavailable(_))
        ));
        assert!(matches!(
            has_voted(&state, 1, "s1").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn vote_refreshes_current_pointer_copy() {
        let (state, _) = setup_with(Arc::new(MemoryKvStore::new())).await;
        let quiz = open_quiz(&state, &["A", "B"]).await;
        let updated = cast_vote(&state, quiz.id, 1, "s1").await.unwrap();

        let current = lifecycle_service::get_current_quiz(&state, &ClassroomId::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current, updated);
    }

    #[tokio::test(start_paused = true)]
    async fn interleaved_write_forces_retry_and_both_votes_survive() {
        let store = Arc::new(RacingStore {
            inner: MemoryKvStore::new(),
            rival: "rival".into(),
            raced: AtomicBool::new(false),
            puts: AtomicUsize::new(0),
        });
        let (state, _) = setup_with(store.clone()).await;
        let quiz = open_quiz(&state, &["A", "B"]).await;
        let puts_before = store.puts.load(Ordering::SeqCst);

        let updated = cast_vote(&state, quiz.id, 1, "s1").await.unwrap();

        assert_eq!(updated.votes, vec![1, 1]);
        assert_eq!(updated.voters.iter().collect::<Vec<_>>(), vec!["rival", "s1"]);
        assert!(store.raced.load(Ordering::SeqCst));
        // Lost write, winning retry, then the pointer refresh.
        assert_eq!(store.puts.load(Ordering::SeqCst) - puts_before, 3);
        let persisted = lifecycle_service::get_quiz(&state, quiz.id).await.unwrap();
        assert_eq!(persisted, updated);
    }

    #[tokio::test(start_paused = true)]
    async fn racing_vote_by_same_voter_surfaces_as_already_voted() {
        let store = Arc::new(RacingStore {
            inner: MemoryKvStore::new(),
            rival: "s1".into(),
            raced: AtomicBool::new(false),
            puts: AtomicUsize::new(0),
        });
        let (state, _) = setup_with(store).await;
        let quiz = open_quiz(&state, &["A", "B"]).await;

        assert!(matches!(
            cast_vote(&state, quiz.id, 1, "s1").await,
            Err(ServiceError::AlreadyVoted { .. })
        ));
        let persisted = lifecycle_service::get_quiz(&state, quiz.id).await.unwrap();
        assert_eq!(persisted.votes, vec![1, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_report_contention() {
        let (state, _) = setup_with(Arc::new(HostileStore(MemoryKvStore::new()))).await;
        let quiz = open_quiz(&state, &["A", "B"]).await;

        assert!(matches!(
            cast_vote(&state, quiz.id, 0, "s1").await,
            Err(ServiceError::Contention { attempts: 5, .. })
        ));
        let persisted = lifecycle_service::get_quiz(&state, quiz.id).await.unwrap();
        assert_eq!(persisted.total_votes(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_distinct_voters_all_land() {
        let config = AppConfig {
            vote_attempts: 200,
            ..AppConfig::default()
        };
        let clock = ManualClock::new(OffsetDateTime::now_utc());
        let state = AppState::with_clock(config, Arc::new(clock));
        state.set_store(Arc::new(MemoryKvStore::new())).await;
        let quiz = open_quiz(&state, &["A", "B", "C"]).await;

        let quiz_id = quiz.id;
        let voters = 24;
        let handles: Vec<_> = (0..voters)
            .map(|n| {
                let state = state.clone();
                tokio::spawn(async move {
                    cast_vote(&state, quiz_id, n % 3, &format!("student-{n}")).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let persisted = lifecycle_service::get_quiz(&state, quiz.id).await.unwrap();
        assert_eq!(persisted.total_votes(), voters as u64);
        assert_eq!(persisted.voters.len(), voters);
        assert_eq!(persisted.votes, vec![8, 8, 8]);
        assert!(persisted.check_invariants().is_ok());

        let current = lifecycle_service::get_current_quiz(&state, &ClassroomId::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.version, persisted.version);
    }
}
