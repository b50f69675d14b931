use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::{error::ServiceError, services::lifecycle_service, state::SharedState};

/// Retire expired current quizzes on every sync interval so the stored
/// `isActive` flag catches up with the clock.
pub async fn run(state: SharedState) {
    let mut ticker = interval(state.config().sync_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        sweep(&state).await;
    }
}

/// One pass over every known classroom. Returns how many quizzes were retired.
pub async fn sweep(state: &SharedState) -> usize {
    if state.store().await.is_none() {
        debug!("skipping expiry sweep while degraded");
        return 0;
    }

    let mut retired = 0;
    for classroom in state.classrooms() {
        match lifecycle_service::reconcile_current(state, &classroom).await {
            Ok(Some(quiz)) => {
                info!(quiz_id = quiz.id, %classroom, "retired expired quiz");
                retired += 1;
            }
            Ok(None) => {}
            Err(ServiceError::Degraded) => break,
            Err(err) => warn!(%classroom, error = %err, "expiry sweep failed"),
        }
    }
    retired
}
