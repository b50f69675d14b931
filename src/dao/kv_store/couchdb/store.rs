use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use tracing::debug;

use crate::dao::{
    kv_store::{Expect, KvEntry, KvStore, Revision},
    storage::{StorageError, StorageResult},
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{CouchKvDocument, WriteOutcome, WriteResponse},
};

/// Unconditional writes re-read the `_rev` and retry this many times when
/// another writer slips in between.
const UNCONDITIONAL_WRITE_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct CouchKvStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchKvStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::Client { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config.credentials.map(|credentials| {
            (
                Arc::<str>::from(credentials.username),
                Arc::<str>::from(credentials.password),
            )
        });

        let store = Self {
            client,
            base_url,
            database,
            auth,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    fn request(&self, method: Method, doc_id: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.database_url(), doc_id);
        self.authorize(self.client.request(method, url))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.database_url();

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::Database {
                database: database.clone(),
                operation: "query",
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorize(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::Database {
                        database: database.clone(),
                        operation: "create",
                        source,
                    })?;
                // 412 means another instance created it first.
                if create.status().is_success()
                    || create.status() == StatusCode::PRECONDITION_FAILED
                {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document(&self, doc_id: &str) -> CouchResult<Option<CouchKvDocument>> {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::Transport {
                key: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<CouchKvDocument>()
                .await
                .map(Some)
                .map_err(|source| CouchDaoError::Decode {
                    key: doc_id.to_string(),
                    source,
                }),
            other => Err(CouchDaoError::UnexpectedStatus {
                key: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn put_document(&self, document: &CouchKvDocument) -> CouchResult<WriteOutcome> {
        let response = self
            .request(Method::PUT, &document.id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::Transport {
                key: document.id.clone(),
                source,
            })?;

        self.write_outcome(&document.id, response).await
    }

    async fn delete_document(&self, doc_id: &str, rev: &str) -> CouchResult<WriteOutcome> {
        let response = self
            .request(Method::DELETE, doc_id)
            .query(&[("rev", rev)])
            .send()
            .await
            .map_err(|source| CouchDaoError::Transport {
                key: doc_id.to_string(),
                source,
            })?;

        self.write_outcome(doc_id, response).await
    }

    async fn write_outcome(
        &self,
        doc_id: &str,
        response: reqwest::Response,
    ) -> CouchResult<WriteOutcome> {
        match response.status() {
            StatusCode::CONFLICT => Ok(WriteOutcome::Conflict),
            StatusCode::NOT_FOUND => Ok(WriteOutcome::Missing),
            status if status.is_success() => {
                let body = response.json::<WriteResponse>().await.map_err(|source| {
                    CouchDaoError::Decode {
                        key: doc_id.to_string(),
                        source,
                    }
                })?;
                Ok(WriteOutcome::Written(body.rev))
            }
            other => Err(CouchDaoError::UnexpectedStatus {
                key: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn put_entry(&self, key: &str, value: String, expect: Expect) -> StorageResult<Revision> {
        let mut document = CouchKvDocument {
            id: key.to_string(),
            rev: None,
            value,
        };

        match expect {
            Expect::Absent => match self.put_document(&document).await? {
                WriteOutcome::Written(rev) => Ok(Revision::new(rev)),
                WriteOutcome::Conflict | WriteOutcome::Missing => Err(StorageError::conflict(key)),
            },
            Expect::Revision(expected) => {
                document.rev = Some(expected.as_str().to_string());
                match self.put_document(&document).await? {
                    WriteOutcome::Written(rev) => Ok(Revision::new(rev)),
                    WriteOutcome::Conflict | WriteOutcome::Missing => {
                        Err(StorageError::conflict(key))
                    }
                }
            }
            Expect::Any => {
                for attempt in 1..=UNCONDITIONAL_WRITE_ATTEMPTS {
                    document.rev = self.get_document(key).await?.and_then(|doc| doc.rev);
                    match self.put_document(&document).await? {
                        WriteOutcome::Written(rev) => return Ok(Revision::new(rev)),
                        WriteOutcome::Conflict | WriteOutcome::Missing => {
                            debug!(key, attempt, "CouchDB overwrite raced; re-reading _rev");
                        }
                    }
                }
                Err(StorageError::conflict(key))
            }
        }
    }

    async fn remove_entry(&self, key: &str, expect: Expect) -> StorageResult<()> {
        match expect {
            Expect::Absent => match self.get_document(key).await? {
                Some(_) => Err(StorageError::conflict(key)),
                None => Ok(()),
            },
            Expect::Revision(expected) => match self.delete_document(key, expected.as_str()).await? {
                WriteOutcome::Written(_) => Ok(()),
                WriteOutcome::Conflict | WriteOutcome::Missing => Err(StorageError::conflict(key)),
            },
            Expect::Any => {
                for attempt in 1..=UNCONDITIONAL_WRITE_ATTEMPTS {
                    let Some(rev) = self.get_document(key).await?.and_then(|doc| doc.rev) else {
                        return Ok(());
                    };
                    match self.delete_document(key, &rev).await? {
                        WriteOutcome::Written(_) | WriteOutcome::Missing => return Ok(()),
                        WriteOutcome::Conflict => {
                            debug!(key, attempt, "CouchDB delete raced; re-reading _rev");
                        }
                    }
                }
                Err(StorageError::conflict(key))
            }
        }
    }
}

impl KvStore for CouchKvStore {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<KvEntry>>> {
        let store = self.clone();
        let key = key.to_string();
        Box::pin(async move {
            let document = store.get_document(&key).await?;
            Ok(document.and_then(|doc| {
                doc.rev.map(|rev| KvEntry {
                    value: doc.value,
                    revision: Revision::new(rev),
                })
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
        Box::pin(async move {
            let url = store.database_url();
            let response = store
                .authorize(store.client.get(&url))
                .send()
                .await
                .map_err(|source| CouchDaoError::Transport {
                    key: store.database.to_string(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::UnexpectedStatus {
                    key: store.database.to_string(),
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
