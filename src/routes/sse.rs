use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, Query, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;
use uuid::Uuid;

use crate::{
    dto::quiz::ClassroomQuery,
    error::AppError,
    services::{sse_service, sync_service::ObservedTarget},
    state::{SharedState, quiz::QuizId},
};

#[utoipa::path(
    get,
    path = "/sse/quizzes/current",
    tag = "sse",
    params(ClassroomQuery),
    responses((status = 200, description = "Snapshots of the classroom's current quiz", content_type = "text/event-stream", body = String))
)]
/// Stream the current quiz of a classroom as it changes, with a countdown.
pub async fn current_quiz_stream(
    State(state): State<SharedState>,
    Query(query): Query<ClassroomQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let classroom = query.classroom_id()?;
    info!(connection = %Uuid::new_v4(), %classroom, "new current-quiz SSE connection");
    let observer = sse_service::subscribe(&state, ObservedTarget::Current(classroom));
    Ok(sse_service::to_sse_stream(state, observer))
}

#[utoipa::path(
    get,
    path = "/sse/quizzes/{id}",
    tag = "sse",
    params(("id" = u64, Path, description = "Quiz identifier")),
    responses((status = 200, description = "Snapshots of one quiz", content_type = "text/event-stream", body = String))
)]
/// Stream one quiz record as it changes, with a countdown.
pub async fn quiz_stream(
    State(state): State<SharedState>,
    Path(id): Path<QuizId>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(connection = %Uuid::new_v4(), quiz_id = id, "new quiz SSE connection");
    let observer = sse_service::subscribe(&state, ObservedTarget::Quiz(id));
    sse_service::to_sse_stream(state, observer)
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sse/quizzes/current", get(current_quiz_stream))
        .route("/sse/quizzes/{id}", get(quiz_stream))
}
