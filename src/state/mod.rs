pub mod clock;
pub mod quiz;

use std::sync::Arc;

use dashmap::DashSet;
use time::OffsetDateTime;
use tokio::sync::{RwLock, watch};

use crate::{
    config::AppConfig,
    dao::{kv_store::KvStore, quiz_repository::QuizRepository},
    error::ServiceError,
};

use self::{
    clock::{Clock, SystemClock},
    quiz::ClassroomId,
};

pub type SharedState = Arc<AppState>;

/// Central application state holding the storage handle, configuration and clock.
pub struct AppState {
    store: RwLock<Option<Arc<dyn KvStore>>>,
    degraded: watch::Sender<bool>,
    config: AppConfig,
    clock: Arc<dyn Clock>,
    classrooms: DashSet<ClassroomId>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Same as [`AppState::new`] with an explicit time source.
    pub fn with_clock(config: AppConfig, clock: Arc<dyn Clock>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let classrooms = DashSet::new();
        classrooms.insert(ClassroomId::default());
        Arc::new(Self {
            store: RwLock::new(None),
            degraded: degraded_tx,
            config,
            clock,
            classrooms,
        })
    }

    /// Obtain a handle to the current store, if one is installed.
    pub async fn store(&self) -> Option<Arc<dyn KvStore>> {
        let guard = self.store.read().await;
        guard.as_ref().cloned()
    }

    /// Current store or [`ServiceError::Degraded`] when none is installed.
    pub async fn require_store(&self) -> Result<Arc<dyn KvStore>, ServiceError> {
        self.store().await.ok_or(ServiceError::Degraded)
    }

    /// Typed quiz repository over the installed store.
    pub async fn repository(&self) -> Result<QuizRepository, ServiceError> {
        Ok(QuizRepository::new(self.require_store().await?))
    }

    /// Install a new store implementation and leave degraded mode.
    pub async fn set_store(&self, store: Arc<dyn KvStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Remove the current store and enter degraded mode.
    pub async fn clear_store(&self) {
        {
            let mut guard = self.store.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    /// Remember a classroom so the expiry reaper looks at its pointer.
    pub fn register_classroom(&self, classroom: &ClassroomId) {
        if !self.classrooms.contains(classroom) {
            self.classrooms.insert(classroom.clone());
        }
    }

    /// Classrooms a quiz was created in since startup, the default one included.
    pub fn classrooms(&self) -> Vec<ClassroomId> {
        self.classrooms.iter().map(|entry| entry.key().clone()).collect()
    }
}
