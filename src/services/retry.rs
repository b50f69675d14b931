use std::time::Duration;

use rand::{Rng, rng};
use tokio::time::sleep;

const BASE_DELAY: Duration = Duration::from_millis(5);
const MAX_DELAY: Duration = Duration::from_millis(100);

/// Delay before retry number `attempt` (1-based) of a conditional write:
/// exponential in the attempt, capped, plus up to the same amount of jitter.
pub fn conflict_delay(attempt: usize) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16) as u32;
    let base = BASE_DELAY.saturating_mul(1_u32 << exponent).min(MAX_DELAY);
    let jitter_ms = rng().random_range(0..=base.as_millis() as u64);
    base + Duration::from_millis(jitter_ms)
}

/// Sleep for [`conflict_delay`] after losing a write race.
pub async fn backoff_after_conflict(attempt: usize) {
    let delay = conflict_delay(attempt);
    sleep(delay).await;
}
