use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::quiz::{
        CastVoteRequest, ClassroomQuery, CreateQuizRequest, CurrentQuizResponse, HasVotedResponse,
        QuizResponse, ResultsExport, ResultsResponse,
    },
    error::AppError,
    routes::identity::WalletIdentity,
    services::{
        identity_service::normalize_address,
        lifecycle_service::{self, QuizDraft},
        results_service, voting_service,
    },
    state::{SharedState, quiz::QuizId},
};

/// Routes for the teacher panel, the student ballot and the results display.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/quizzes", post(create_quiz))
        .route("/quizzes/current", get(current_quiz))
        .route("/quizzes/{id}", get(get_quiz))
        .route("/quizzes/{id}/end", post(end_quiz))
        .route("/quizzes/{id}/votes", post(cast_vote))
        .route("/quizzes/{id}/voters/{voter}", get(has_voted))
        .route("/quizzes/{id}/results", get(results))
        .route("/quizzes/{id}/export", get(export))
}

/// Open a new quiz and make it the current quiz of its classroom.
#[utoipa::path(
    post,
    path = "/quizzes",
    tag = "quiz",
    params(("X-Wallet-Address" = String, Header, description = "Address of the connected wallet")),
    request_body = CreateQuizRequest,
    responses(
        (status = 201, description = "Quiz created", body = QuizResponse),
        (status = 400, description = "Invalid quiz definition"),
        (status = 401, description = "No wallet connected")
    )
)]
pub async fn create_quiz(
    State(state): State<SharedState>,
    WalletIdentity(creator): WalletIdentity,
    Valid(Json(payload)): Valid<Json<CreateQuizRequest>>,
) -> Result<(StatusCode, Json<QuizResponse>), AppError> {
    let draft = QuizDraft::try_from(payload)?;
    let quiz = lifecycle_service::create_quiz(&state, draft, &creator).await?;
    Ok((
        StatusCode::CREATED,
        Json(QuizResponse::from_quiz(&quiz, state.now())),
    ))
}

/// Quiz currently advertised to a classroom.
#[utoipa::path(
    get,
    path = "/quizzes/current",
    tag = "quiz",
    params(ClassroomQuery),
    responses((status = 200, description = "Current quiz, if any", body = CurrentQuizResponse))
)]
pub async fn current_quiz(
    State(state): State<SharedState>,
    Query(query): Query<ClassroomQuery>,
) -> Result<Json<CurrentQuizResponse>, AppError> {
    let classroom = query.classroom_id()?;
    let quiz = lifecycle_service::get_current_quiz(&state, &classroom).await?;
    let now = state.now();
    Ok(Json(CurrentQuizResponse {
        classroom: classroom.to_string(),
        quiz: quiz.map(|quiz| QuizResponse::from_quiz(&quiz, now)),
    }))
}

/// Historical record of a quiz.
#[utoipa::path(
    get,
    path = "/quizzes/{id}",
    tag = "quiz",
    params(("id" = u64, Path, description = "Quiz identifier")),
    responses(
        (status = 200, description = "Quiz found", body = QuizResponse),
        (status = 404, description = "Unknown quiz")
    )
)]
pub async fn get_quiz(
    State(state): State<SharedState>,
    Path(id): Path<QuizId>,
) -> Result<Json<QuizResponse>, AppError> {
    let quiz = lifecycle_service::get_quiz(&state, id).await?;
    Ok(Json(QuizResponse::from_quiz(&quiz, state.now())))
}

/// End a quiz; only its creator may do so.
#[utoipa::path(
    post,
    path = "/quizzes/{id}/end",
    tag = "quiz",
    params(
        ("id" = u64, Path, description = "Quiz identifier"),
        ("X-Wallet-Address" = String, Header, description = "Address of the connected wallet")
    ),
    responses(
        (status = 200, description = "Quiz ended", body = QuizResponse),
        (status = 403, description = "Caller is not the creator"),
        (status = 404, description = "Unknown quiz")
    )
)]
pub async fn end_quiz(
    State(state): State<SharedState>,
    WalletIdentity(requester): WalletIdentity,
    Path(id): Path<QuizId>,
) -> Result<Json<QuizResponse>, AppError> {
    let quiz = lifecycle_service::end_quiz(&state, id, &requester).await?;
    Ok(Json(QuizResponse::from_quiz(&quiz, state.now())))
}

/// Cast the caller's single vote.
#[utoipa::path(
    post,
    path = "/quizzes/{id}/votes",
    tag = "quiz",
    params(
        ("id" = u64, Path, description = "Quiz identifier"),
        ("X-Wallet-Address" = String, Header, description = "Address of the connected wallet")
    ),
    request_body = CastVoteRequest,
    responses(
        (status = 200, description = "Vote recorded", body = QuizResponse),
        (status = 400, description = "Option out of range"),
        (status = 404, description = "Unknown quiz"),
        (status = 409, description = "Already voted, or too much write contention"),
        (status = 410, description = "Quiz expired or ended")
    )
)]
pub async fn cast_vote(
    State(state): State<SharedState>,
    WalletIdentity(voter): WalletIdentity,
    Path(id): Path<QuizId>,
    Json(payload): Json<CastVoteRequest>,
) -> Result<Json<QuizResponse>, AppError> {
    let quiz = voting_service::cast_vote(&state, id, payload.option_index, &voter).await?;
    Ok(Json(QuizResponse::from_quiz(&quiz, state.now())))
}

/// Whether an address already voted.
#[utoipa::path(
    get,
    path = "/quizzes/{id}/voters/{voter}",
    tag = "quiz",
    params(
        ("id" = u64, Path, description = "Quiz identifier"),
        ("voter" = String, Path, description = "Voter address")
    ),
    responses((status = 200, description = "Membership check", body = HasVotedResponse))
)]
pub async fn has_voted(
    State(state): State<SharedState>,
    Path((id, voter)): Path<(QuizId, String)>,
) -> Result<Json<HasVotedResponse>, AppError> {
    let voter = normalize_address(&voter).unwrap_or_default();
    let has_voted = voting_service::has_voted(&state, id, &voter).await?;
    Ok(Json(HasVotedResponse {
        quiz_id: id,
        voter,
        has_voted,
    }))
}

/// Live tally, percentages and winner.
#[utoipa::path(
    get,
    path = "/quizzes/{id}/results",
    tag = "quiz",
    params(("id" = u64, Path, description = "Quiz identifier")),
    responses((status = 200, description = "Current results", body = ResultsResponse))
)]
pub async fn results(
    State(state): State<SharedState>,
    Path(id): Path<QuizId>,
) -> Result<Json<ResultsResponse>, AppError> {
    Ok(Json(results_service::results(&state, id).await?))
}

/// Results as a downloadable JSON document.
#[utoipa::path(
    get,
    path = "/quizzes/{id}/export",
    tag = "quiz",
    params(("id" = u64, Path, description = "Quiz identifier")),
    responses((status = 200, description = "Export document", body = ResultsExport))
)]
pub async fn export(
    State(state): State<SharedState>,
    Path(id): Path<QuizId>,
) -> Result<impl IntoResponse, AppError> {
    let document = results_service::export(&state, id).await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        results_service::export_file_name(id)
    );
    Ok(([(header::CONTENT_DISPOSITION, disposition)], Json(document)))
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use axum::{extract::FromRequestParts, http::Request, response::Response};
    use time::OffsetDateTime;

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

    fn wallet(address: &str) -> WalletIdentity {
        WalletIdentity(address.into())
    }

    fn into_response<T: IntoResponse>(result: Result<T, AppError>) -> Response {
        match result {
            Ok(body) => body.into_response(),
            Err(err) => err.into_response(),
        }
    }

    async fn open_quiz(state: &SharedState) -> QuizId {
        let payload = CreateQuizRequest {
            title: "Which letter?".into(),
            description: String::new(),
            options: vec!["A".into(), "B".into()],
            duration_secs: Some(60),
            classroom: None,
        };
        let response = into_response(
            create_quiz(State(state.clone()), wallet("0xteacher"), Valid(Json(payload))).await,
        );
        assert_eq!(response.status(), StatusCode::CREATED);
        lifecycle_service::get_current_quiz(state, &Default::default())
            .await
            .unwrap()
            .unwrap()
            .id
    }

    async fn vote(state: &SharedState, id: QuizId, voter: &str, option_index: usize) -> StatusCode {
        into_response(
            cast_vote(
                State(state.clone()),
                wallet(voter),
                Path(id),
                Json(CastVoteRequest { option_index }),
            )
            .await,
        )
        .status()
    }

    #[tokio::test]
    async fn vote_without_wallet_header_is_unauthorized() {
        let (state, _) = setup().await;
        let (mut parts, ()) = Request::builder()
            .method("POST")
            .uri("/quizzes/1/votes")
            .body(())
            .unwrap()
            .into_parts();

        let rejection = WalletIdentity::from_request_parts(&mut parts, &state)
            .await
            .unwrap_err();
        assert_eq!(rejection.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn only_the_creator_may_end_a_quiz() {
        let (state, _) = setup().await;
        let id = open_quiz(&state).await;

        let outsider = into_response(end_quiz(State(state.clone()), wallet("0xstudent"), Path(id)).await);
        assert_eq!(outsider.status(), StatusCode::FORBIDDEN);

        let creator = into_response(end_quiz(State(state.clone()), wallet("0xteacher"), Path(id)).await);
        assert_eq!(creator.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn vote_failures_map_to_distinct_statuses() {
        let (state, clock) = setup().await;
        let id = open_quiz(&state).await;

        assert_eq!(vote(&state, id, "0xa1", 0).await, StatusCode::OK);
        assert_eq!(vote(&state, id, "0xa1", 1).await, StatusCode::CONFLICT);
        assert_eq!(vote(&state, id, "0xa2", 5).await, StatusCode::BAD_REQUEST);
        assert_eq!(vote(&state, id + 1000, "0xa2", 0).await, StatusCode::NOT_FOUND);

        clock.advance(Duration::from_secs(61));
        assert_eq!(vote(&state, id, "0xa2", 0).await, StatusCode::GONE);
    }

    #[tokio::test]
    async fn export_is_served_as_attachment() {
        let (state, _) = setup().await;
        let id = open_quiz(&state).await;

        let response = into_response(export(State(state.clone()), Path(id)).await);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            format!("attachment; filename=\"{}\"", results_service::export_file_name(id)).as_str()
        );
    }

    #[tokio::test]
    async fn missing_store_is_service_unavailable() {
        let state = AppState::new(AppConfig::default());
        let response = into_response(get_quiz(State(state), Path(1)).await);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
