use std::sync::Arc;

use tracing::warn;

use crate::{
    dao::{
        kv_store::{Expect, KvStore, Revision},
        models::QuizEntity,
        storage::{StorageError, StorageResult},
    },
    state::quiz::{ClassroomId, Quiz, QuizId},
};

/// Key of the current-quiz pointer of the default classroom.
pub const ACTIVE_QUIZ_KEY: &str = "activeQuiz";

/// Storage key of the historical record of quiz `id`.
pub fn quiz_key(id: QuizId) -> String {
    format!("quiz_{id}")
}

/// Storage key of the current-quiz pointer of `classroom`.
pub fn active_quiz_key(classroom: &ClassroomId) -> String {
    if classroom.is_default() {
        ACTIVE_QUIZ_KEY.to_string()
    } else {
        format!("{ACTIVE_QUIZ_KEY}::{classroom}")
    }
}

/// A decoded value and the revision it was read at.
#[derive(Debug, Clone)]
pub struct Stored<T> {
    pub value: T,
    pub revision: Revision,
}

/// Typed access to quiz records and current-quiz pointers over a [`KvStore`].
///
/// Records that fail to decode or break the quiz invariants are logged and
/// reported as absent so a single corrupt key never takes a reader down.
#[derive(Clone)]
pub struct QuizRepository {
    store: Arc<dyn KvStore>,
}

impl QuizRepository {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Fetch the historical record of a quiz.
    pub async fn find(&self, id: QuizId) -> StorageResult<Option<Stored<Quiz>>> {
        self.load(&quiz_key(id)).await
    }

    /// Fetch the denormalized copy the pointer of `classroom` holds.
    pub async fn find_current(
        &self,
        classroom: &ClassroomId,
    ) -> StorageResult<Option<Stored<Quiz>>> {
        self.load(&active_quiz_key(classroom)).await
    }

    /// Persist a brand-new record; conflicts when the id is already taken.
    pub async fn insert(&self, quiz: &Quiz) -> StorageResult<Revision> {
        self.save(&quiz_key(quiz.id), quiz, Expect::Absent).await
    }

    /// Overwrite a record only if it is still at `revision`.
    pub async fn replace(&self, quiz: &Quiz, revision: &Revision) -> StorageResult<Revision> {
        self.save(&quiz_key(quiz.id), quiz, Expect::Revision(revision.clone()))
            .await
    }

    /// Point the classroom of `quiz` at it, replacing whatever was current.
    pub async fn set_current(&self, quiz: &Quiz) -> StorageResult<Revision> {
        self.save(&active_quiz_key(&quiz.classroom), quiz, Expect::Any)
            .await
    }

    /// Refresh the pointer copy only if the pointer is still at `revision`.
    pub async fn replace_current(
        &self,
        quiz: &Quiz,
        revision: &Revision,
    ) -> StorageResult<Revision> {
        self.save(
            &active_quiz_key(&quiz.classroom),
            quiz,
            Expect::Revision(revision.clone()),
        )
        .await
    }

    /// Drop the pointer of `classroom` if it is still at `revision`.
    pub async fn clear_current(
        &self,
        classroom: &ClassroomId,
        revision: &Revision,
    ) -> StorageResult<()> {
        self.store
            .remove(&active_quiz_key(classroom), Expect::Revision(revision.clone()))
            .await
    }

    async fn load(&self, key: &str) -> StorageResult<Option<Stored<Quiz>>> {
        let Some(entry) = self.store.get(key).await? else {
            return Ok(None);
        };

        let decoded = serde_json::from_str::<QuizEntity>(&entry.value)
            .map_err(|err| err.to_string())
            .and_then(|entity| Quiz::try_from(entity).map_err(|err| err.to_string()));

        match decoded {
            Ok(value) => Ok(Some(Stored {
                value,
                revision: entry.revision,
            })),
            Err(error) => {
                warn!(key, %error, "ignoring unreadable quiz record");
                Ok(None)
            }
        }
    }

    async fn save(&self, key: &str, quiz: &Quiz, expect: Expect) -> StorageResult<Revision> {
        let entity = QuizEntity::from(quiz.clone());
        let value = serde_json::to_string(&entity).map_err(|source| StorageError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.store.put(key, value, expect).await
    }
}
