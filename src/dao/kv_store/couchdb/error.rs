//! Failures of the CouchDB key/value backend.

use reqwest::StatusCode;
use thiserror::Error;

pub type CouchResult<T> = Result<T, CouchDaoError>;

#[derive(Debug, Error)]
pub enum CouchDaoError {
    #[error("CouchDB backend needs `{var}` to be set")]
    MissingSetting { var: &'static str },
    #[error("could not build the CouchDB HTTP client")]
    Client {
        #[source]
        source: reqwest::Error,
    },
    /// Checking or creating the database itself failed.
    #[error("could not {operation} CouchDB database `{database}`")]
    Database {
        database: String,
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("CouchDB answered {status} while preparing database `{database}`")]
    DatabaseStatus {
        database: String,
        status: StatusCode,
    },
    /// The request for one key never got an answer.
    #[error("CouchDB request for key `{key}` failed")]
    Transport {
        key: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("CouchDB answered {status} for key `{key}`")]
    UnexpectedStatus { key: String, status: StatusCode },
    #[error("CouchDB body for key `{key}` is not the expected JSON")]
    Decode {
        key: String,
        #[source]
        source: reqwest::Error,
    },
}
