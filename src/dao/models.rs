use std::time::Duration;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as};
use thiserror::Error;
use time::OffsetDateTime;

use crate::state::quiz::{ClassroomId, Quiz, QuizId};

/// Quiz record as persisted under `quiz_<id>` and `activeQuiz`.
///
/// Field names follow the camelCase layout written by the browser client so
/// existing storage areas stay readable.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuizEntity {
    pub id: QuizId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub options: Vec<String>,
    pub votes: Vec<u64>,
    pub voters: Vec<String>,
    /// Voting window in whole seconds.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub duration: Duration,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub is_active: bool,
    pub creator: String,
    #[serde(default)]
    pub classroom: ClassroomId,
    #[serde(default)]
    pub version: u64,
}

/// A decoded record that violates the quiz invariants.
#[derive(Debug, Error)]
#[error("quiz record `{id}` is inconsistent: {reason}")]
pub struct InvalidQuizRecord {
    pub id: QuizId,
    pub reason: String,
}

impl From<Quiz> for QuizEntity {
    fn from(quiz: Quiz) -> Self {
        Self {
            id: quiz.id,
            title: quiz.title,
            description: quiz.description,
            options: quiz.options,
            votes: quiz.votes,
            voters: quiz.voters.into_iter().collect(),
            duration: quiz.duration,
            created_at: quiz.created_at,
            is_active: quiz.is_active,
            creator: quiz.creator,
            classroom: quiz.classroom,
            version: quiz.version,
        }
    }
}

impl TryFrom<QuizEntity> for Quiz {
    type Error = InvalidQuizRecord;

    fn try_from(entity: QuizEntity) -> Result<Self, Self::Error> {
        let voter_count = entity.voters.len();
        let voters: IndexSet<String> = entity.voters.into_iter().collect();
        if voters.len() != voter_count {
            return Err(InvalidQuizRecord {
                id: entity.id,
                reason: "duplicate voter identities".into(),
            });
        }

        let quiz = Quiz {
            id: entity.id,
            title: entity.title,
            description: entity.description,
            options: entity.options,
            votes: entity.votes,
            voters,
            duration: entity.duration,
            created_at: entity.created_at,
            is_active: entity.is_active,
            creator: entity.creator,
            classroom: entity.classroom,
            version: entity.version,
        };

        quiz.check_invariants()
            .map_err(|reason| InvalidQuizRecord { id: quiz.id, reason })?;
        Ok(quiz)
    }
}
