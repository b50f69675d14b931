use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document for the QuizChain backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::quiz::create_quiz,
        crate::routes::quiz::current_quiz,
        crate::routes::quiz::get_quiz,
        crate::routes::quiz::end_quiz,
        crate::routes::quiz::cast_vote,
        crate::routes::quiz::has_voted,
        crate::routes::quiz::results,
        crate::routes::quiz::export,
        crate::routes::sse::current_quiz_stream,
        crate::routes::sse::quiz_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::quiz::CreateQuizRequest,
            crate::dto::quiz::CastVoteRequest,
            crate::dto::quiz::QuizResponse,
            crate::dto::quiz::CurrentQuizResponse,
            crate::dto::quiz::HasVotedResponse,
            crate::dto::quiz::OptionResult,
            crate::dto::quiz::ResultsResponse,
            crate::dto::quiz::ResultsExport,
            crate::dto::sse::SnapshotEvent,
            crate::dto::sse::CountdownEvent,
            crate::state::quiz::QuizStatus,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "quiz", description = "Quiz lifecycle, voting and results"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
pub struct ApiDoc;
