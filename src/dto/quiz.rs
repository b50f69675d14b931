use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::{
    dto::{
        format_timestamp,
        validation::{validate_classroom, validate_options},
    },
    error::ServiceError,
    state::quiz::{ClassroomId, InvalidClassroom, Quiz, QuizId, QuizStatus},
};

/// Payload used by a teacher to open a new quiz.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateQuizRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub description: String,
    /// Answer options; blank entries are ignored.
    #[validate(length(min = 2, max = 32), custom(function = "validate_options"))]
    pub options: Vec<String>,
    /// Voting window in seconds; the configured default applies when omitted.
    #[serde(default)]
    pub duration_secs: Option<u64>,
    /// Classroom whose current quiz this becomes; `default` when omitted.
    #[serde(default)]
    #[validate(custom(function = "validate_classroom"))]
    pub classroom: Option<String>,
}

/// Ballot submitted by a student.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CastVoteRequest {
    /// Zero-based index into the quiz options.
    pub option_index: usize,
}

/// Query selecting the classroom of a current-quiz lookup.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ClassroomQuery {
    /// Classroom id, `default` when omitted.
    pub classroom: Option<String>,
}

impl ClassroomQuery {
    /// Requested classroom, the default one when the parameter is absent.
    pub fn classroom_id(&self) -> Result<ClassroomId, ServiceError> {
        match self.classroom.as_deref() {
            Some(raw) => raw
                .parse()
                .map_err(|err: InvalidClassroom| ServiceError::Validation(err.to_string())),
            None => Ok(ClassroomId::default()),
        }
    }
}

/// Public projection of a quiz at the instant it was read.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuizResponse {
    pub id: QuizId,
    pub title: String,
    pub description: String,
    pub options: Vec<String>,
    pub votes: Vec<u64>,
    pub voters: Vec<String>,
    pub total_votes: u64,
    pub duration_secs: u64,
    pub created_at: String,
    pub expires_at: String,
    pub is_active: bool,
    /// Whether votes are accepted right now (`live`), or why not.
    pub status: QuizStatus,
    pub remaining_secs: u64,
    pub creator: String,
    pub classroom: String,
    pub version: u64,
}

impl QuizResponse {
    pub fn from_quiz(quiz: &Quiz, now: OffsetDateTime) -> Self {
        Self {
            id: quiz.id,
            title: quiz.title.clone(),
            description: quiz.description.clone(),
            options: quiz.options.clone(),
            votes: quiz.votes.clone(),
            voters: quiz.voters.iter().cloned().collect(),
            total_votes: quiz.total_votes(),
            duration_secs: quiz.duration.as_secs(),
            created_at: format_timestamp(quiz.created_at),
            expires_at: format_timestamp(quiz.expires_at()),
            is_active: quiz.is_active,
            status: quiz.status(now),
            remaining_secs: quiz.remaining(now).as_secs(),
            creator: quiz.creator.clone(),
            classroom: quiz.classroom.to_string(),
            version: quiz.version,
        }
    }
}

/// Current quiz of a classroom, `null` when none is advertised.
#[derive(Debug, Serialize, ToSchema)]
pub struct CurrentQuizResponse {
    pub classroom: String,
    pub quiz: Option<QuizResponse>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HasVotedResponse {
    pub quiz_id: QuizId,
    pub voter: String,
    pub has_voted: bool,
}

/// Tally line of one option.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct OptionResult {
    pub option: String,
    pub votes: u64,
    /// Share of all votes, rounded to one decimal; 0 when nobody voted.
    pub percentage: f64,
}

/// Live results of a quiz.
#[derive(Debug, Serialize, ToSchema)]
pub struct ResultsResponse {
    pub quiz_id: QuizId,
    pub title: String,
    pub status: QuizStatus,
    pub total_votes: u64,
    pub results: Vec<OptionResult>,
    /// Index of the first option with the highest tally, absent while nobody voted.
    pub winner: Option<usize>,
    pub is_tie: bool,
}

/// Downloadable results document.
///
/// `results[].percentage` is a JSON number rounded to one decimal (`33.3`),
/// not the fixed-point string (`"33.3"`) older browser exports wrote.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResultsExport {
    /// Quiz title.
    pub quiz: String,
    pub total_votes: u64,
    pub results: Vec<OptionResult>,
    pub timestamp: String,
}

impl ResultsExport {
    pub fn new(quiz: &Quiz, results: Vec<OptionResult>, at: OffsetDateTime) -> Self {
        Self {
            quiz: quiz.title.clone(),
            total_votes: quiz.total_votes(),
            results,
            timestamp: format_timestamp(at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_checks_shape() {
        let request: CreateQuizRequest = serde_json::from_str(
            r#"{"title": "Q", "options": ["A", "B"], "classroom": "room 1"}"#,
        )
        .unwrap();
        assert!(request.validate().is_err());

        let request: CreateQuizRequest =
            serde_json::from_str(r#"{"title": "Q", "options": ["A", "B"]}"#).unwrap();
        assert!(request.validate().is_ok());
        assert_eq!(request.duration_secs, None);

        let request: CreateQuizRequest =
            serde_json::from_str(r#"{"title": "", "options": ["A"]}"#).unwrap();
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("title"));
        assert!(errors.field_errors().contains_key("options"));
    }
}
