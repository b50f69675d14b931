use serde::Serialize;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::{
    dto::{format_timestamp, quiz::QuizResponse},
    services::sync_service::{CountdownTick, Snapshot, format_remaining},
    state::quiz::QuizId,
};

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Whole state of the observed quiz, re-read on every sync tick.
pub struct SnapshotEvent {
    /// Tick counter of the observer, starting at 1.
    pub sequence: u64,
    pub observed_at: String,
    /// `null` when nothing readable is stored for the target.
    pub quiz: Option<QuizResponse>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Display-only time left on the observed quiz.
pub struct CountdownEvent {
    pub quiz_id: QuizId,
    pub remaining_secs: u64,
    /// `m:ss` rendering of `remaining_secs`.
    pub display: String,
    pub ended: bool,
}

impl SnapshotEvent {
    pub fn from_snapshot(snapshot: &Snapshot, now: OffsetDateTime) -> Self {
        Self {
            sequence: snapshot.sequence,
            observed_at: format_timestamp(snapshot.observed_at),
            quiz: snapshot
                .quiz
                .as_ref()
                .map(|quiz| QuizResponse::from_quiz(quiz, now)),
        }
    }
}

impl From<CountdownTick> for CountdownEvent {
    fn from(tick: CountdownTick) -> Self {
        Self {
            quiz_id: tick.quiz_id,
            remaining_secs: tick.remaining.as_secs(),
            display: format_remaining(tick.remaining),
            ended: tick.ended,
        }
    }
}
