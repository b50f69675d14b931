use serde::{Deserialize, Serialize};

/// One key of the storage area, stored as its own document.
///
/// The key doubles as the document id so reads are a single GET, and the
/// CouchDB `_rev` is surfaced as the entry revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchKvDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub value: String,
}

/// Body returned by CouchDB after a successful document write.
#[derive(Debug, Deserialize)]
pub struct WriteResponse {
    pub rev: String,
}

/// Outcome of a document PUT or DELETE against CouchDB.
#[derive(Debug)]
pub enum WriteOutcome {
    /// The write was accepted and produced this revision.
    Written(String),
    /// CouchDB answered `409 Conflict` (stale or missing `_rev`).
    Conflict,
    /// The document does not exist.
    Missing,
}
