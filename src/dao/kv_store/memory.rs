use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::{self, BoxFuture};

use super::{Expect, KvEntry, KvStore, Revision};
use crate::dao::storage::{StorageError, StorageResult};

/// In-process storage area, the equivalent of one browser profile's local storage.
///
/// Every write is stamped with a fresh sequence number used as its revision.
/// Preconditions are checked while holding the shard lock of the key so a
/// compare-and-swap is atomic with respect to other writers of that key.
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    entries: DashMap<String, StoredValue>,
    sequence: AtomicU64,
}

struct StoredValue {
    value: String,
    revision: u64,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    fn next_revision(&self) -> u64 {
        self.inner.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn get_now(&self, key: &str) -> Option<KvEntry> {
        self.inner.entries.get(key).map(|stored| KvEntry {
            value: stored.value.clone(),
            revision: Revision::new(stored.revision.to_string()),
        })
    }

    fn put_now(&self, key: &str, value: String, expect: Expect) -> StorageResult<Revision> {
        let revision = self.next_revision();
        match self.inner.entries.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let allowed = match &expect {
                    Expect::Any => true,
                    Expect::Absent => false,
                    Expect::Revision(expected) => {
                        expected.as_str() == occupied.get().revision.to_string()
                    }
                };
                if !allowed {
                    return Err(StorageError::conflict(key));
                }
                occupied.insert(StoredValue { value, revision });
            }
            Entry::Vacant(vacant) => {
                if matches!(expect, Expect::Revision(_)) {
                    return Err(StorageError::conflict(key));
                }
                vacant.insert(StoredValue { value, revision });
            }
        }
        Ok(Revision::new(revision.to_string()))
    }

    fn remove_now(&self, key: &str, expect: Expect) -> StorageResult<()> {
        match expect {
            Expect::Any => {
                self.inner.entries.remove(key);
                Ok(())
            }
            Expect::Absent => {
                if self.inner.entries.contains_key(key) {
                    Err(StorageError::conflict(key))
                } else {
                    Ok(())
                }
            }
            Expect::Revision(expected) => self
                .inner
                .entries
                .remove_if(key, |_, stored| {
                    expected.as_str() == stored.revision.to_string()
                })
                .map(|_| ())
                .ok_or_else(|| StorageError::conflict(key)),
        }
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<KvEntry>>> {
        Box::pin(future::ready(Ok(self.get_now(key))))
    }

    fn put(
        &self,
        key: &str,
        value: String,
        expect: Expect,
    ) -> BoxFuture<'static, StorageResult<Revision>> {
        Box::pin(future::ready(self.put_now(key, value, expect)))
    }

    fn remove(&self, key: &str, expect: Expect) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(future::ready(self.remove_now(key, expect)))
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(future::ready(Ok(())))
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(future::ready(Ok(())))
    }
}
