//! Quiz lifecycle: creation, ending by the creator, expiry reconciliation and
//! the per-classroom current-quiz pointer.

use std::time::Duration;

use indexmap::IndexSet;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::{
    config::QuizRules,
    dao::quiz_repository::{QuizRepository, active_quiz_key, quiz_key},
    dto::quiz::CreateQuizRequest,
    error::ServiceError,
    services::retry::backoff_after_conflict,
    state::{
        SharedState,
        quiz::{ClassroomId, InvalidClassroom, Quiz, QuizId},
    },
};

/// Ids tried after the time-derived one when several quizzes are created in the same millisecond.
const MAX_ID_ATTEMPTS: u64 = 64;

/// Teacher input for a new quiz, before validation.
#[derive(Debug, Clone, Default)]
pub struct QuizDraft {
    pub title: String,
    pub description: String,
    pub options: Vec<String>,
    /// `None` selects the configured default window.
    pub duration: Option<Duration>,
    pub classroom: ClassroomId,
}

impl TryFrom<CreateQuizRequest> for QuizDraft {
    type Error = ServiceError;

    fn try_from(request: CreateQuizRequest) -> Result<Self, Self::Error> {
        let classroom = match request.classroom.as_deref() {
            Some(raw) => raw
                .parse()
                .map_err(|err: InvalidClassroom| ServiceError::Validation(err.to_string()))?,
            None => ClassroomId::default(),
        };
        Ok(Self {
            title: request.title,
            description: request.description,
            options: request.options,
            duration: request.duration_secs.map(Duration::from_secs),
            classroom,
        })
    }
}

struct ValidDraft {
    title: String,
    description: String,
    options: Vec<String>,
    duration: Duration,
}

fn validate_draft(rules: &QuizRules, draft: QuizDraft) -> Result<ValidDraft, ServiceError> {
    let title = draft.title.trim().to_string();
    if title.is_empty() {
        return Err(ServiceError::Validation("title must not be empty".into()));
    }

    let options: Vec<String> = draft
        .options
        .iter()
        .map(|option| option.trim())
        .filter(|option| !option.is_empty())
        .map(str::to_string)
        .collect();
    if options.len() < rules.min_options {
        return Err(ServiceError::Validation(format!(
            "at least {} non-empty options are required",
            rules.min_options
        )));
    }
    if options.len() > rules.max_options {
        return Err(ServiceError::Validation(format!(
            "at most {} options are allowed",
            rules.max_options
        )));
    }
    let distinct: IndexSet<&str> = options.iter().map(String::as_str).collect();
    if distinct.len() != options.len() {
        return Err(ServiceError::Validation("options must be distinct".into()));
    }

    let duration = draft.duration.unwrap_or(rules.default_duration);
    if duration < rules.min_duration || duration > rules.max_duration {
        return Err(ServiceError::Validation(format!(
            "duration must be between {} and {} seconds",
            rules.min_duration.as_secs(),
            rules.max_duration.as_secs()
        )));
    }

    Ok(ValidDraft {
        title,
        description: draft.description.trim().to_string(),
        options,
        duration,
    })
}

fn id_from_time(now: OffsetDateTime) -> QuizId {
    u64::try_from(now.unix_timestamp_nanos() / 1_000_000).unwrap_or_default()
}

/// Validate and persist a new quiz, then make it the current quiz of its classroom.
///
/// The pointer is overwritten unconditionally: the last quiz created wins.
pub async fn create_quiz(
    state: &SharedState,
    draft: QuizDraft,
    creator: &str,
) -> Result<Quiz, ServiceError> {
    let creator = creator.trim();
    if creator.is_empty() {
        return Err(ServiceError::Validation("creator must not be empty".into()));
    }
    let classroom = draft.classroom.clone();
    let valid = validate_draft(&state.config().rules, draft)?;
    let repository = state.repository().await?;

    let now = state.now();
    let base_id = id_from_time(now);
    let option_count = valid.options.len();
    let mut quiz = Quiz {
        id: base_id,
        title: valid.title,
        description: valid.description,
        options: valid.options,
        votes: vec![0; option_count],
        voters: IndexSet::new(),
        duration: valid.duration,
        created_at: now,
        is_active: true,
        creator: creator.to_string(),
        classroom,
        version: 1,
    };

    let mut inserted = false;
    for offset in 0..MAX_ID_ATTEMPTS {
        quiz.id = base_id + offset;
        match repository.insert(&quiz).await {
            Ok(_) => {
                inserted = true;
                break;
            }
            Err(err) if err.is_conflict() => {
                debug!(quiz_id = quiz.id, "quiz id already taken; trying next");
            }
            Err(err) => return Err(err.into()),
        }
    }
    if !inserted {
        return Err(ServiceError::Contention {
            key: quiz_key(base_id),
            attempts: MAX_ID_ATTEMPTS as usize,
        });
    }

    repository.set_current(&quiz).await?;
    state.register_classroom(&quiz.classroom);
    info!(
        quiz_id = quiz.id,
        classroom = %quiz.classroom,
        options = quiz.options.len(),
        duration_secs = quiz.duration.as_secs(),
        "quiz created"
    );
    Ok(quiz)
}

/// Close a quiz on behalf of its creator.
///
/// Ending an already-ended quiz returns it unchanged.
pub async fn end_quiz(
    state: &SharedState,
    quiz_id: QuizId,
    requester: &str,
) -> Result<Quiz, ServiceError> {
    let repository = state.repository().await?;
    let requester = requester.trim();
    let attempts = state.config().vote_attempts;

    for attempt in 1..=attempts {
        let stored = repository
            .find(quiz_id)
            .await?
            .ok_or_else(|| not_found(quiz_id))?;
        if stored.value.creator != requester {
            return Err(ServiceError::Unauthorized(format!(
                "only the creator can end quiz {quiz_id}"
            )));
        }

        let mut quiz = stored.value;
        if quiz.close() {
            match repository.replace(&quiz, &stored.revision).await {
                Ok(_) => {}
                Err(err) if err.is_conflict() => {
                    debug!(quiz_id, attempt, "end of quiz lost a write race; retrying");
                    backoff_after_conflict(attempt).await;
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
            info!(quiz_id, "quiz ended by its creator");
        }

        clear_pointer_if_current(&repository, &quiz.classroom, quiz_id, attempts).await?;
        return Ok(quiz);
    }

    Err(ServiceError::Contention {
        key: quiz_key(quiz_id),
        attempts,
    })
}

/// Current quiz of `classroom`, as last advertised by its pointer. Read-only.
pub async fn get_current_quiz(
    state: &SharedState,
    classroom: &ClassroomId,
) -> Result<Option<Quiz>, ServiceError> {
    let repository = state.repository().await?;
    Ok(repository
        .find_current(classroom)
        .await?
        .map(|stored| stored.value))
}

/// Historical record of a quiz.
pub async fn get_quiz(state: &SharedState, quiz_id: QuizId) -> Result<Quiz, ServiceError> {
    let repository = state.repository().await?;
    repository
        .find(quiz_id)
        .await?
        .map(|stored| stored.value)
        .ok_or_else(|| not_found(quiz_id))
}

/// Persist `isActive = false` once the deadline of a still-active quiz has passed,
/// and drop the classroom pointer if it still names the quiz.
pub async fn reconcile_expiry(state: &SharedState, quiz_id: QuizId) -> Result<Quiz, ServiceError> {
    let repository = state.repository().await?;
    let attempts = state.config().vote_attempts;

    for attempt in 1..=attempts {
        let stored = repository
            .find(quiz_id)
            .await?
            .ok_or_else(|| not_found(quiz_id))?;
        let mut quiz = stored.value;

        if quiz.is_active && quiz.is_expired(state.now()) {
            quiz.close();
            match repository.replace(&quiz, &stored.revision).await {
                Ok(_) => info!(quiz_id, "quiz expired; marked inactive"),
                Err(err) if err.is_conflict() => {
                    debug!(quiz_id, attempt, "expiry write lost a race; retrying");
                    backoff_after_conflict(attempt).await;
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }

        if !quiz.is_active {
            clear_pointer_if_current(&repository, &quiz.classroom, quiz_id, attempts).await?;
        }
        return Ok(quiz);
    }

    Err(ServiceError::Contention {
        key: quiz_key(quiz_id),
        attempts,
    })
}

/// Reconcile the current quiz of `classroom` when it no longer accepts votes.
///
/// Returns the quiz that was retired, if any.
pub async fn reconcile_current(
    state: &SharedState,
    classroom: &ClassroomId,
) -> Result<Option<Quiz>, ServiceError> {
    let repository = state.repository().await?;
    let Some(current) = repository.find_current(classroom).await? else {
        return Ok(None);
    };
    if current.value.is_open(state.now()) {
        return Ok(None);
    }

    match reconcile_expiry(state, current.value.id).await {
        Ok(quiz) => Ok((!quiz.is_active).then_some(quiz)),
        Err(ServiceError::NotFound(_)) => {
            // Pointer outlived its record; nothing else will ever clear it.
            match repository.clear_current(classroom, &current.revision).await {
                Ok(()) => Ok(Some(current.value)),
                Err(err) if err.is_conflict() => Ok(None),
                Err(err) => Err(err.into()),
            }
        }
        Err(err) => Err(err),
    }
}

/// Remove the pointer of `classroom` if it still references `quiz_id`.
async fn clear_pointer_if_current(
    repository: &QuizRepository,
    classroom: &ClassroomId,
    quiz_id: QuizId,
    attempts: usize,
) -> Result<(), ServiceError> {
    for attempt in 1..=attempts {
        let Some(current) = repository.find_current(classroom).await? else {
            return Ok(());
        };
        if current.value.id != quiz_id {
            return Ok(());
        }
        match repository.clear_current(classroom, &current.revision).await {
            Ok(()) => {
                debug!(quiz_id, %classroom, "current-quiz pointer cleared");
                return Ok(());
            }
            Err(err) if err.is_conflict() => backoff_after_conflict(attempt).await,
            Err(err) => return Err(err.into()),
        }
    }

    Err(ServiceError::Contention {
        key: active_quiz_key(classroom),
        attempts,
    })
}

fn not_found(quiz_id: QuizId) -> ServiceError {
    ServiceError::NotFound(format!("quiz {quiz_id}"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::kv_store::MemoryKvStore,
        state::{AppState, clock::ManualClock},
    };

    async fn setup() -> (SharedState, ManualClock) {
        let clock = ManualClock::new(OffsetDateTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000));
        let state = AppState::with_clock(AppConfig::default(), Arc::new(clock.clone()));
        state.set_store(Arc::new(MemoryKvStore::new())).await;
        (state, clock)
    }

    fn draft(options: &[&str], duration_secs: u64) -> QuizDraft {
        QuizDraft {
            title: "Favourite colour?".into(),
            description: "pick one".into(),
            options: options.iter().map(|o| o.to_string()).collect(),
            duration: Some(Duration::from_secs(duration_secs)),
            classroom: ClassroomId::default(),
        }
    }

    #[tokio::test]
    async fn created_quiz_starts_empty_and_becomes_current() {
        let (state, _) = setup().await;
        let quiz = create_quiz(&state, draft(&["Red", " Blue ", ""], 60), "0xteacher")
            .await
            .unwrap();

        assert_eq!(quiz.options, vec!["Red", "Blue"]);
        assert_eq!(quiz.votes, vec![0, 0]);
        assert!(quiz.voters.is_empty());
        assert!(quiz.is_active);
        assert_eq!(quiz.version, 1);
        assert_eq!(quiz.id, 1_700_000_000_000);

        let current = get_current_quiz(&state, &ClassroomId::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current, quiz);
        assert_eq!(get_quiz(&state, quiz.id).await.unwrap(), quiz);
    }

    #[tokio::test]
    async fn invalid_drafts_are_rejected() {
        let (state, _) = setup().await;
        let cases = [
            QuizDraft {
                title: "   ".into(),
                ..draft(&["A", "B"], 60)
            },
            draft(&["A", "  "], 60),
            draft(&["A", "B", "C", "D", "E", "F", "G"], 60),
            draft(&["A", " A"], 60),
            draft(&["A", "B"], 59),
            draft(&["A", "B"], 3_601),
        ];
        for case in cases {
            assert!(matches!(
                create_quiz(&state, case, "0xteacher").await,
                Err(ServiceError::Validation(_))
            ));
        }
        assert!(matches!(
            create_quiz(&state, draft(&["A", "B"], 60), "  ").await,
            Err(ServiceError::Validation(_))
        ));
        assert!(
            get_current_quiz(&state, &ClassroomId::default())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn omitted_duration_uses_default_window() {
        let (state, _) = setup().await;
        let quiz = create_quiz(
            &state,
            QuizDraft {
                duration: None,
                ..draft(&["A", "B"], 0)
            },
            "0xteacher",
        )
        .await
        .unwrap();
        assert_eq!(quiz.duration, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn same_millisecond_creations_get_distinct_ids() {
        let (state, _) = setup().await;
        let first = create_quiz(&state, draft(&["A", "B"], 60), "0xt").await.unwrap();
        let second = create_quiz(&state, draft(&["C", "D"], 60), "0xt").await.unwrap();

        assert_eq!(second.id, first.id + 1);
        assert_eq!(get_quiz(&state, first.id).await.unwrap().options, vec!["A", "B"]);
        let current = get_current_quiz(&state, &ClassroomId::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.id, second.id);
    }

    #[tokio::test]
    async fn non_creator_cannot_end_quiz() {
        let (state, _) = setup().await;
        let quiz = create_quiz(&state, draft(&["A", "B"], 60), "0xteacher").await.unwrap();

        assert!(matches!(
            end_quiz(&state, quiz.id, "0xstudent").await,
            Err(ServiceError::Unauthorized(_))
        ));
        assert_eq!(get_quiz(&state, quiz.id).await.unwrap(), quiz);
        assert!(
            get_current_quiz(&state, &ClassroomId::default())
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn ending_clears_pointer_and_is_idempotent() {
        let (state, _) = setup().await;
        let quiz = create_quiz(&state, draft(&["A", "B"], 60), "0xteacher").await.unwrap();

        let ended = end_quiz(&state, quiz.id, "0xteacher").await.unwrap();
        assert!(!ended.is_active);
        assert_eq!(ended.version, 2);
        assert!(
            get_current_quiz(&state, &ClassroomId::default())
                .await
                .unwrap()
                .is_none()
        );

        let again = end_quiz(&state, quiz.id, "0xteacher").await.unwrap();
        assert_eq!(again, ended);
        assert!(matches!(
            end_quiz(&state, 42, "0xteacher").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn ending_an_older_quiz_keeps_the_newer_pointer() {
        let (state, clock) = setup().await;
        let older = create_quiz(&state, draft(&["A", "B"], 60), "0xteacher").await.unwrap();
        clock.advance(Duration::from_secs(1));
        let newer = create_quiz(&state, draft(&["C", "D"], 60), "0xteacher").await.unwrap();

        end_quiz(&state, older.id, "0xteacher").await.unwrap();
        let current = get_current_quiz(&state, &ClassroomId::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.id, newer.id);
    }

    #[tokio::test]
    async fn reconcile_retires_expired_current_quiz() {
        let (state, clock) = setup().await;
        let quiz = create_quiz(&state, draft(&["A", "B"], 60), "0xteacher").await.unwrap();

        clock.advance(Duration::from_secs(60));
        assert!(
            reconcile_current(&state, &ClassroomId::default())
                .await
                .unwrap()
                .is_none()
        );

        clock.advance(Duration::from_secs(1));
        let retired = reconcile_current(&state, &ClassroomId::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retired.id, quiz.id);
        assert!(!retired.is_active);
        assert!(!get_quiz(&state, quiz.id).await.unwrap().is_active);
        assert!(
            get_current_quiz(&state, &ClassroomId::default())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn reconcile_expiry_leaves_open_quiz_alone() {
        let (state, _) = setup().await;
        let quiz = create_quiz(&state, draft(&["A", "B"], 60), "0xteacher").await.unwrap();
        assert_eq!(reconcile_expiry(&state, quiz.id).await.unwrap(), quiz);
    }

    #[tokio::test]
    async fn degraded_state_refuses_operations() {
        let state = AppState::new(AppConfig::default());
        assert!(matches!(
            create_quiz(&state, draft(&["A", "B"], 60), "0xteacher").await,
            Err(ServiceError::Degraded)
        ));
    }

    #[tokio::test]
    async fn reading_a_classroom_does_not_register_it() {
        let (state, _) = setup().await;
        let before = state.classrooms().len();

        for name in ["room-1", "room-2", "room-3"] {
            let classroom: ClassroomId = name.parse().unwrap();
            assert!(get_current_quiz(&state, &classroom).await.unwrap().is_none());
        }
        assert_eq!(state.classrooms().len(), before);

        create_quiz(
            &state,
            QuizDraft {
                classroom: "room-1".parse().unwrap(),
                ..draft(&["A", "B"], 60)
            },
            "0xteacher",
        )
        .await
        .unwrap();
        assert_eq!(state.classrooms().len(), before + 1);
    }
}
