use crate::{
    dto::quiz::{OptionResult, ResultsExport, ResultsResponse},
    error::ServiceError,
    services::lifecycle_service,
    state::{
        SharedState,
        quiz::{Quiz, QuizId},
    },
};

/// Share of `votes` in `total` as a percentage rounded to one decimal, 0 without votes.
pub fn percentage(votes: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (votes as f64 * 1_000.0 / total as f64).round() / 10.0
}

/// Per-option tally lines in option order.
pub fn tally(quiz: &Quiz) -> Vec<OptionResult> {
    let total = quiz.total_votes();
    quiz.options
        .iter()
        .zip(&quiz.votes)
        .map(|(option, &votes)| OptionResult {
            option: option.clone(),
            votes,
            percentage: percentage(votes, total),
        })
        .collect()
}

/// File name the export document is offered under.
pub fn export_file_name(quiz_id: QuizId) -> String {
    format!("quiz-results-{quiz_id}.json")
}

/// Live results of a stored quiz.
pub async fn results(state: &SharedState, quiz_id: QuizId) -> Result<ResultsResponse, ServiceError> {
    let quiz = lifecycle_service::get_quiz(state, quiz_id).await?;
    Ok(ResultsResponse {
        quiz_id: quiz.id,
        title: quiz.title.clone(),
        status: quiz.status(state.now()),
        total_votes: quiz.total_votes(),
        results: tally(&quiz),
        winner: quiz.winning_option(),
        is_tie: quiz.is_tie(),
    })
}

/// Export document of a stored quiz, stamped with the current time.
pub async fn export(state: &SharedState, quiz_id: QuizId) -> Result<ResultsExport, ServiceError> {
    let quiz = lifecycle_service::get_quiz(state, quiz_id).await?;
    Ok(ResultsExport::new(&quiz, tally(&quiz), state.now()))
}
