//! Polling sync loop: each observer re-reads its target on a fixed interval and
//! publishes the whole state, plus a display-only countdown.

use std::time::Duration;

use futures::Stream;
use time::OffsetDateTime;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::warn;

use crate::{
    error::ServiceError,
    services::lifecycle_service,
    state::{
        SharedState,
        quiz::{ClassroomId, Quiz, QuizId},
    },
};

/// Countdown resolution.
pub const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// What an observer keeps re-reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedTarget {
    /// Whatever quiz the pointer of the classroom names at each tick.
    Current(ClassroomId),
    /// The historical record of one quiz.
    Quiz(QuizId),
}

/// State published by one sync tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// 0 before the first read completes, then +1 per tick.
    pub sequence: u64,
    pub observed_at: OffsetDateTime,
    pub quiz: Option<Quiz>,
}

/// Running observer; dropping it stops the loop.
pub struct ObserverHandle {
    receiver: watch::Receiver<Snapshot>,
    task: JoinHandle<()>,
}

impl ObserverHandle {
    /// Independent receiver of the snapshots this observer publishes.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.receiver.clone()
    }

    /// Last published snapshot.
    pub fn latest(&self) -> Snapshot {
        self.receiver.borrow().clone()
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn read_target(state: &SharedState, target: &ObservedTarget) -> Result<Option<Quiz>, ServiceError> {
    match target {
        ObservedTarget::Current(classroom) => {
            lifecycle_service::get_current_quiz(state, classroom).await
        }
        ObservedTarget::Quiz(quiz_id) => match lifecycle_service::get_quiz(state, *quiz_id).await {
            Ok(quiz) => Ok(Some(quiz)),
            Err(ServiceError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        },
    }
}

/// Start re-reading `target` every `sync_interval`, first read immediately.
///
/// Every tick replaces the published snapshot wholesale. Read failures
/// publish `None` and the loop keeps going.
pub fn spawn_observer(state: SharedState, target: ObservedTarget) -> ObserverHandle {
    let (sender, receiver) = watch::channel(Snapshot {
        sequence: 0,
        observed_at: state.now(),
        quiz: None,
    });

    let task = tokio::spawn(async move {
        let mut ticker = interval(state.config().sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sequence = 0;

        loop {
            ticker.tick().await;
            let quiz = match read_target(&state, &target).await {
                Ok(quiz) => quiz,
                Err(err) => {
                    warn!(observed = ?target, error = %err, "sync read failed");
                    None
                }
            };
            sequence += 1;
            sender.send_replace(Snapshot {
                sequence,
                observed_at: state.now(),
                quiz,
            });
        }
    });

    ObserverHandle { receiver, task }
}

/// One countdown step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownTick {
    pub quiz_id: QuizId,
    pub remaining: Duration,
    pub ended: bool,
}

/// Remaining-time ticks for `quiz`, one per second, ending after the tick
/// that reports zero.
pub fn countdown(state: SharedState, quiz: &Quiz) -> impl Stream<Item = CountdownTick> + Send + 'static {
    let quiz = quiz.clone();
    async_stream::stream! {
        let mut ticker = interval(COUNTDOWN_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let remaining = quiz.remaining(state.now());
            let ended = remaining.as_secs() == 0;
            yield CountdownTick {
                quiz_id: quiz.id,
                remaining,
                ended,
            };
            if ended {
                break;
            }
        }
    }
}

/// `m:ss` rendering of whole seconds left.
pub fn format_remaining(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}
