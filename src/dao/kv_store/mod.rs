#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::{fmt, sync::Arc};

use futures::future::BoxFuture;

use crate::dao::storage::{StorageError, StorageResult};

pub use self::memory::MemoryKvStore;

/// Opaque token identifying one stored version of a key.
///
/// Backends pick their own representation (CouchDB `_rev`, a MongoDB version
/// counter, an in-memory sequence number); callers only ever compare tokens
/// they previously received from the same store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision(String);

impl Revision {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value stored under a key together with the revision it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub value: String,
    pub revision: Revision,
}

/// Precondition attached to a write or delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expect {
    /// Unconditional, last writer wins.
    Any,
    /// The key must not exist yet.
    Absent,
    /// The key must still be at this revision.
    Revision(Revision),
}

/// Key/value storage area holding JSON-encoded text values.
///
/// There are no transactions; the only coordination primitive is the
/// [`Expect`] precondition, which implementations must check atomically with
/// the write and report as [`StorageError::Conflict`] when it does not hold.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<KvEntry>>>;
    fn put(
        &self,
        key: &str,
        value: String,
        expect: Expect,
    ) -> BoxFuture<'static, StorageResult<Revision>>;
    fn remove(&self, key: &str, expect: Expect) -> BoxFuture<'static, StorageResult<()>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Storage backend selected at startup through `QUIZCHAIN_STORE`.
#[derive(Clone)]
pub enum StoreBackend {
    /// Process-local storage area; contents are lost on restart.
    Memory(MemoryKvStore),
    #[cfg(feature = "couch-store")]
    Couch,
    #[cfg(feature = "mongo-store")]
    Mongo,
}

/// Environment variable selecting the storage backend.
pub const STORE_BACKEND_ENV: &str = "QUIZCHAIN_STORE";

impl StoreBackend {
    /// Resolve the backend from the environment, defaulting to the in-memory store.
    pub fn from_env() -> StorageResult<Self> {
        let selected = std::env::var(STORE_BACKEND_ENV).unwrap_or_else(|_| "memory".into());
        match selected.trim().to_ascii_lowercase().as_str() {
            "" | "memory" => Ok(Self::Memory(MemoryKvStore::new())),
            #[cfg(feature = "couch-store")]
            "couch" | "couchdb" => Ok(Self::Couch),
            #[cfg(feature = "mongo-store")]
            "mongo" | "mongodb" => Ok(Self::Mongo),
            other => Err(StorageError::unavailable(
                format!("unsupported storage backend `{other}`"),
                std::io::Error::new(std::io::ErrorKind::InvalidInput, other.to_string()),
            )),
        }
    }

    /// Human readable backend name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            #[cfg(feature = "couch-store")]
            Self::Couch => "couchdb",
            #[cfg(feature = "mongo-store")]
            Self::Mongo => "mongodb",
        }
    }

    /// Open a connection to the backend.
    ///
    /// The in-memory variant hands out the same shared map on every call so a
    /// supervisor-driven reconnect never drops data.
    pub fn connect(&self) -> BoxFuture<'static, StorageResult<Arc<dyn KvStore>>> {
        let backend = self.clone();
        Box::pin(async move {
            match backend {
                Self::Memory(store) => Ok(Arc::new(store) as Arc<dyn KvStore>),
                #[cfg(feature = "couch-store")]
                Self::Couch => {
                    let config = couchdb::CouchConfig::from_env()?;
                    let store = couchdb::CouchKvStore::connect(config).await?;
                    Ok(Arc::new(store) as Arc<dyn KvStore>)
                }
                #[cfg(feature = "mongo-store")]
                Self::Mongo => {
                    let config = mongodb::MongoConfig::from_env().await?;
                    let store = mongodb::MongoKvStore::connect(config).await?;
                    Ok(Arc::new(store) as Arc<dyn KvStore>)
                }
            }
        })
    }
}
