use mongodb::{
    bson::{Document, doc},
    error::{Error as MongoError, ErrorKind, WriteError, WriteFailure},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server error code reported when an insert hits an existing `_id`.
const DUPLICATE_KEY_CODE: i32 = 11000;

/// One key of the storage area. `revision` is a fresh token on every write and
/// is matched in the filter to implement conditional writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoKvDocument {
    #[serde(rename = "_id")]
    pub key: String,
    pub value: String,
    pub revision: String,
}

/// Token stamped on a write; never reused, even after the key is deleted and recreated.
pub fn new_revision() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Filter matching `key` only while it still carries `revision`.
pub fn revision_filter(key: &str, revision: &str) -> Document {
    doc! { "_id": key, "revision": revision }
}

pub fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(WriteError {
            code: DUPLICATE_KEY_CODE,
            ..
        }))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revisions_are_never_reused() {
        let first = new_revision();
        let second = new_revision();
        assert_ne!(first, second);
        assert_eq!(first.len(), 32);
    }

    #[test]
    fn conditional_filter_pins_key_and_revision() {
        let revision = new_revision();
        let filter = revision_filter("activeQuiz", &revision);

        assert_eq!(filter.get_str("_id").unwrap(), "activeQuiz");
        assert_eq!(filter.get_str("revision").unwrap(), revision);
    }
}
