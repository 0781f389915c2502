//! Cache module for folio.
//!
//! Book metadata is cached as serialized JSON text keyed by `isbn_<id>`, the
//! same way a Redis-backed store would hold it. The `CacheStore` trait is the
//! seam; `MemoryStore` is the in-process implementation used by the binary.

pub mod memory;

pub use memory::MemoryStore;

use crate::error::FolioError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Key-value store with optional per-entry TTL.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Fetch and decode a value. Entries that are not valid JSON come back as
    /// `Value::String` holding the raw text.
    async fn get(&self, key: &str) -> Result<Option<Value>, FolioError>;

    /// Store a value. `None` means the entry never expires.
    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<(), FolioError>;

    async fn del(&self, key: &str) -> Result<(), FolioError>;
}

/// Cache key for a book identifier.
pub fn isbn_key(isbn: &str) -> String {
    format!("isbn_{}", isbn)
}

/// Decode stored text, falling back to the raw string when it is not JSON.
pub(crate) fn decode_stored(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Encode a value for storage. Plain strings are stored unquoted.
pub(crate) fn encode_stored(value: &Value) -> Result<String, FolioError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Ok(serde_json::to_string(other)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_falls_back_to_raw_text() {
        assert_eq!(decode_stored(r#"{"name":"T"}"#), json!({"name": "T"}));
        assert_eq!(decode_stored("42"), json!(42));
        assert_eq!(decode_stored("not json {"), json!("not json {"));
    }

    #[test]
    fn test_encode_stores_strings_unquoted() {
        assert_eq!(encode_stored(&json!("plain")).unwrap(), "plain");
        assert_eq!(encode_stored(&json!({"a": 1})).unwrap(), r#"{"a":1}"#);
    }

    #[test]
    fn test_isbn_key() {
        assert_eq!(isbn_key("9787111213826"), "isbn_9787111213826");
    }
}
