use std::sync::Arc;

use futures::future::BoxFuture;
use mongodb::{
    Client, Collection, Database,
    bson::{Document, doc},
    options::ReturnDocument,
};
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    config::MongoConfig,
    connection,
    error::{MongoDaoError, MongoResult},
    models::{MongoKvDocument, is_duplicate_key, new_revision, revision_filter},
};
use crate::dao::{
    kv_store::{Expect, KvEntry, KvStore, Revision},
    storage::{StorageError, StorageResult},
};

const UNCONDITIONAL_WRITE_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct MongoKvStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            connection::open(&self.config).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoKvStore {
    /// Establish a connection to MongoDB.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            connection::open(&config).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        Ok(Self { inner })
    }

    async fn collection(&self) -> Collection<MongoKvDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoKvDocument>(&self.inner.config.collection_name)
    }

    async fn find(&self, key: &str) -> MongoResult<Option<MongoKvDocument>> {
        self.collection()
            .await
            .find_one(doc! { "_id": key })
            .await
            .map_err(|source| MongoDaoError::Load {
                key: key.to_string(),
                source,
            })
    }

    async fn update(
        &self,
        key: &str,
        filter: Document,
        value: &str,
        upsert: bool,
    ) -> Result<Option<MongoKvDocument>, mongodb::error::Error> {
        self.collection()
            .await
            .find_one_and_update(
                filter,
                doc! { "$set": { "value": value, "revision": new_revision() } },
            )
            .upsert(upsert)
            .return_document(ReturnDocument::After)
            .await
            .inspect_err(|err| debug!(key, error = %err, "MongoDB update failed"))
    }

    async fn put_entry(&self, key: &str, value: String, expect: Expect) -> StorageResult<Revision> {
        let save_error = |source| MongoDaoError::Save {
            key: key.to_string(),
            source,
        };

        match expect {
            Expect::Absent => {
                let document = MongoKvDocument {
                    key: key.to_string(),
                    value,
                    revision: new_revision(),
                };
                match self.collection().await.insert_one(&document).await {
                    Ok(_) => Ok(Revision::new(document.revision)),
                    Err(err) if is_duplicate_key(&err) => Err(StorageError::conflict(key)),
                    Err(err) => Err(save_error(err).into()),
                }
            }
            Expect::Revision(expected) => {
                let filter = revision_filter(key, expected.as_str());
                match self.update(key, filter, &value, false).await {
                    Ok(Some(updated)) => Ok(Revision::new(updated.revision)),
                    Ok(None) => Err(StorageError::conflict(key)),
                    Err(err) => Err(save_error(err).into()),
                }
            }
            Expect::Any => {
                for attempt in 1..=UNCONDITIONAL_WRITE_ATTEMPTS {
                    match self.update(key, doc! { "_id": key }, &value, true).await {
                        Ok(Some(updated)) => return Ok(Revision::new(updated.revision)),
                        // Two racing upserts of a new key: one loses on `_id`.
                        Ok(None) => {}
                        Err(err) if is_duplicate_key(&err) => {
                            debug!(key, attempt, "MongoDB upsert raced; retrying");
                        }
                        Err(err) => return Err(save_error(err).into()),
                    }
                }
                Err(StorageError::conflict(key))
            }
        }
    }

    async fn remove_entry(&self, key: &str, expect: Expect) -> StorageResult<()> {
        let conditional = matches!(expect, Expect::Revision(_));
        let filter = match expect {
            Expect::Any => doc! { "_id": key },
            Expect::Absent => {
                return match self.find(key).await? {
                    Some(_) => Err(StorageError::conflict(key)),
                    None => Ok(()),
                };
            }
            Expect::Revision(expected) => revision_filter(key, expected.as_str()),
        };

        let result = self
            .collection()
            .await
            .delete_one(filter)
            .await
            .map_err(|source| MongoDaoError::Delete {
                key: key.to_string(),
                source,
            })?;

        if conditional && result.deleted_count == 0 {
            return Err(StorageError::conflict(key));
        }
        Ok(())
    }
}

impl KvStore for MongoKvStore {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<KvEntry>>> {
        let store = self.clone();
        let key = key.to_string();
        Box::pin(async move {
            let document = store.find(&key).await?;
            Ok(document.map(|doc| KvEntry {
                value: doc.value,
                revision: Revision::new(doc.revision),
            }))
        })
    }

    fn put(
        &self,
        key: &str,
        value: String,
        expect: Expect,
    ) -> BoxFuture<'static, StorageResult<Revision>> {
        let store = self.clone();
        let key = key.to_string();
        Box::pin(async move { store.put_entry(&key, value, expect).await })
    }

    fn remove(&self, key: &str, expect: Expect) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let key = key.to_string();
        Box::pin(async move { store.remove_entry(&key, expect).await })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
