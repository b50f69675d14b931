use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt, stream::BoxStream};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::{
    dto::sse::{CountdownEvent, ServerEvent, SnapshotEvent},
    services::sync_service::{self, CountdownTick, ObservedTarget, ObserverHandle},
    state::{SharedState, quiz::QuizId},
};

const SNAPSHOT_EVENT: &str = "snapshot";
const COUNTDOWN_EVENT: &str = "countdown";

enum Step {
    Closed,
    Snapshot,
    Tick(Option<CountdownTick>),
}

/// Start a sync observer for one SSE client.
pub fn subscribe(state: &SharedState, target: ObservedTarget) -> ObserverHandle {
    sync_service::spawn_observer(state.clone(), target)
}

/// Run the forwarder of one SSE client: every published snapshot becomes a
/// `snapshot` event and every countdown step a `countdown` event.
///
/// The forwarder owns `observer`; dropping the returned receiver stops both
/// the forwarder and the observer loop.
pub fn forward(state: SharedState, observer: ObserverHandle) -> mpsc::Receiver<ServerEvent> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<ServerEvent>(8);

    tokio::spawn(async move {
        let mut snapshots = observer.subscribe();
        let mut countdown: Option<BoxStream<'static, CountdownTick>> = None;
        let mut counting: Option<QuizId> = None;

        loop {
            let step = tokio::select! {
                _ = tx.closed() => Step::Closed,
                changed = snapshots.changed() => match changed {
                    Ok(()) => Step::Snapshot,
                    Err(_) => Step::Closed,
                },
                tick = next_tick(&mut countdown) => Step::Tick(tick),
            };

            let event = match step {
                Step::Closed => break,
                Step::Snapshot => {
                    let snapshot = snapshots.borrow_and_update().clone();
                    let observed = snapshot.quiz.as_ref().map(|quiz| quiz.id);
                    if observed != counting {
                        countdown = snapshot
                            .quiz
                            .as_ref()
                            .map(|quiz| sync_service::countdown(state.clone(), quiz).boxed());
                        counting = observed;
                    }
                    ServerEvent::json(
                        Some(SNAPSHOT_EVENT.to_string()),
                        &SnapshotEvent::from_snapshot(&snapshot, state.now()),
                    )
                }
                Step::Tick(Some(tick)) => ServerEvent::json(
                    Some(COUNTDOWN_EVENT.to_string()),
                    &CountdownEvent::from(tick),
                ),
                Step::Tick(None) => {
                    debug!(quiz_id = ?counting, "countdown finished");
                    countdown = None;
                    continue;
                }
            };

            let payload = match event {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(error = %err, "failed to encode SSE payload");
                    continue;
                }
            };
            if tx.send(payload).await.is_err() {
                break;
            }
        }

        drop(observer);
        info!("quiz SSE stream disconnected");
    });

    rx
}

/// Convert an observer into an SSE response; the observer is dropped, and its
/// loop stopped, once the client goes away.
pub fn to_sse_stream(
    state: SharedState,
    observer: ObserverHandle,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = ReceiverStream::new(forward(state, observer)).map(|payload| {
        let mut event = Event::default().data(payload.data);
        if let Some(name) = payload.event {
            event = event.event(name);
        }
        Ok::<_, Infallible>(event)
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

async fn next_tick(countdown: &mut Option<BoxStream<'static, CountdownTick>>) -> Option<CountdownTick> {
    match countdown {
        Some(ticks) => ticks.next().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use futures::future::BoxFuture;
    use serde_json::Value;
    use time::OffsetDateTime;
    use tokio::time::{Instant, sleep, timeout_at};

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            kv_store::{Expect, KvEntry, KvStore, MemoryKvStore, Revision},
            storage::StorageResult,
        },
        services::lifecycle_service::{self, QuizDraft},
        state::{
            AppState,
            clock::ManualClock,
            quiz::{ClassroomId, Quiz},
        },
    };

    /// Memory store that counts reads, to tell whether an observer still polls.
    #[derive(Clone, Default)]
    struct CountingStore {
        inner: MemoryKvStore,
        reads: Arc<AtomicUsize>,
    }

    impl CountingStore {
        fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    impl KvStore for CountingStore {
        fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<KvEntry>>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key)
        }

        fn put(
            &self,
            key: &str,
            value: String,
            expect: Expect,
        ) -> BoxFuture<'static, StorageResult<Revision>> {
            self.inner.put(key, value, expect)
        }

        fn remove(&self, key: &str, expect: Expect) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.remove(key, expect)
        }

        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.health_check()
        }

        fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.try_reconnect()
        }
    }

    async fn setup(store: Arc<dyn KvStore>) -> (SharedState, ManualClock) {
        let clock = ManualClock::new(OffsetDateTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000));
        let state = AppState::with_clock(AppConfig::default(), Arc::new(clock.clone()));
        state.set_store(store).await;
        (state, clock)
    }

    async fn open_quiz(state: &SharedState, title: &str) -> Quiz {
        lifecycle_service::create_quiz(
            state,
            QuizDraft {
                title: title.into(),
                options: vec!["A".into(), "B".into()],
                duration: Some(Duration::from_secs(60)),
                ..QuizDraft::default()
            },
            "0xteacher",
        )
        .await
        .unwrap()
    }

    /// Next `name` event whose payload satisfies `accept`, skipping the rest.
    async fn next_event(
        events: &mut mpsc::Receiver<ServerEvent>,
        name: &str,
        accept: impl Fn(&Value) -> bool,
    ) -> Value {
        for _ in 0..64 {
            let event = events.recv().await.expect("forwarder stopped early");
            if event.event.as_deref() == Some(name) {
                let data: Value = serde_json::from_str(&event.data).unwrap();
                if accept(&data) {
                    return data;
                }
            }
        }
        panic!("no matching `{name}` event");
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_follows_the_observed_quiz() {
        let (state, clock) = setup(Arc::new(MemoryKvStore::new())).await;
        let first = open_quiz(&state, "first").await;

        let observer = subscribe(&state, ObservedTarget::Current(ClassroomId::default()));
        let mut events = forward(state.clone(), observer);

        let snapshot = next_event(&mut events, SNAPSHOT_EVENT, |_| true).await;
        assert_eq!(snapshot["quiz"]["id"], first.id);
        let tick = next_event(&mut events, COUNTDOWN_EVENT, |_| true).await;
        assert_eq!(tick["quiz_id"], first.id);
        assert_eq!(tick["remaining_secs"], 60);
        assert_eq!(tick["display"], "1:00");
        assert_eq!(tick["ended"], false);

        let second = open_quiz(&state, "second").await;
        assert_ne!(second.id, first.id);
        next_event(&mut events, SNAPSHOT_EVENT, |data| data["quiz"]["id"] == second.id).await;
        let tick = next_event(&mut events, COUNTDOWN_EVENT, |data| data["quiz_id"] == second.id).await;
        assert_eq!(tick["remaining_secs"], 60);

        clock.advance(Duration::from_secs(61));
        next_event(&mut events, COUNTDOWN_EVENT, |data| data["ended"] == true).await;

        let deadline = Instant::now() + Duration::from_secs(3);
        let mut snapshots = 0;
        while let Ok(Some(event)) = timeout_at(deadline, events.recv()).await {
            assert_eq!(event.event.as_deref(), Some(SNAPSHOT_EVENT));
            snapshots += 1;
        }
        assert!(snapshots >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_quiz_streams_null_snapshots_without_countdown() {
        let (state, _) = setup(Arc::new(MemoryKvStore::new())).await;
        let mut events = forward(state.clone(), subscribe(&state, ObservedTarget::Quiz(7)));

        for _ in 0..3 {
            let event = events.recv().await.unwrap();
            assert_eq!(event.event.as_deref(), Some(SNAPSHOT_EVENT));
            let data: Value = serde_json::from_str(&event.data).unwrap();
            assert!(data["quiz"].is_null());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_client_stops_the_observer() {
        let store = CountingStore::default();
        let (state, _) = setup(Arc::new(store.clone())).await;
        let mut events = forward(state.clone(), subscribe(&state, ObservedTarget::Quiz(7)));

        events.recv().await.unwrap();
        let alive = store.reads();
        sleep(Duration::from_secs(3)).await;
        assert!(store.reads() > alive);

        drop(events);
        sleep(Duration::from_millis(10)).await;
        let after_drop = store.reads();
        sleep(Duration::from_secs(5)).await;
        assert_eq!(store.reads(), after_drop);
    }
}
