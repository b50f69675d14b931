use mongodb::options::ClientOptions;

use super::error::{MongoDaoError, MongoResult};

const URI_ENV: &str = "MONGO_URI";
const DATABASE_ENV: &str = "MONGO_DB";
const COLLECTION_ENV: &str = "MONGO_COLLECTION";
const DEFAULT_DATABASE: &str = "quizchain";
const DEFAULT_COLLECTION: &str = "kv";

/// Parsed client options plus the place where key/value documents are kept.
#[derive(Clone)]
pub struct MongoConfig {
    pub options: ClientOptions,
    pub database_name: String,
    pub collection_name: String,
}

impl MongoConfig {
    /// `MONGO_URI` is required; `MONGO_DB` and `MONGO_COLLECTION` fall back
    /// to `quizchain` and `kv`.
    pub async fn from_env() -> MongoResult<Self> {
        let uri =
            std::env::var(URI_ENV).map_err(|_| MongoDaoError::MissingEnvVar { var: URI_ENV })?;
        let options = ClientOptions::parse(&uri)
            .await
            .map_err(|source| MongoDaoError::InvalidUri { uri, source })?;

        Ok(Self {
            options,
            database_name: env_or(DATABASE_ENV, DEFAULT_DATABASE),
            collection_name: env_or(COLLECTION_ENV, DEFAULT_COLLECTION),
        })
    }
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_owned())
}
