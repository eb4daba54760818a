//! Remote document store contract.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::errors::Result;

pub const TRANSACTIONS_COLLECTION: &str = "transactions";
pub const LEDGERS_COLLECTION: &str = "ledgers";
pub const CATEGORIES_COLLECTION: &str = "categories";

/// Field map of a stored document.
pub type Fields = serde_json::Map<String, Value>;

/// Stream of full query results pushed by a live watch.
///
/// Dropping the receiver ends the watch.
pub type WatchStream = UnboundedReceiver<Vec<Document>>;

/// A document as returned by the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

/// Equality filter on a single field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        fields.get(&self.field) == Some(&self.value)
    }
}

/// Returns true when every filter matches.
pub fn matches_all(filters: &[Filter], fields: &Fields) -> bool {
    filters.iter().all(|filter| filter.matches(fields))
}

/// One write inside an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    Update {
        collection: String,
        id: String,
        fields: Fields,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl BatchOp {
    pub fn update(collection: &str, id: impl Into<String>, fields: Fields) -> Self {
        Self::Update {
            collection: collection.to_string(),
            id: id.into(),
            fields,
        }
    }

    pub fn delete(collection: &str, id: impl Into<String>) -> Self {
        Self::Delete {
            collection: collection.to_string(),
            id: id.into(),
        }
    }
}

/// Collection-oriented remote store with live queries.
///
/// Implementations must treat `update` as a partial field merge that fails
/// with [`crate::Error::NotFound`] when the document is missing, and apply a
/// batch all-or-nothing.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Creates a document with a store-assigned id and returns that id.
    async fn create(&self, collection: &str, fields: Fields) -> Result<String>;

    /// Reads every document matching all filters.
    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Document>>;

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<()>;

    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    async fn commit_batch(&self, ops: Vec<BatchOp>) -> Result<()>;

    /// Starts a live query. The current result is delivered first, then a
    /// full result after every change to the collection.
    async fn watch(&self, collection: &str, filters: Vec<Filter>) -> Result<WatchStream>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filters_match_on_exact_value() {
        let fields = json!({"ownerId": "u1", "ledgerId": "l1"})
            .as_object()
            .cloned()
            .expect("object");
        assert!(matches_all(
            &[Filter::eq("ownerId", "u1"), Filter::eq("ledgerId", "l1")],
            &fields
        ));
        assert!(!matches_all(&[Filter::eq("ledgerId", "l2")], &fields));
        assert!(!Filter::eq("missing", "x").matches(&fields));
        assert!(matches_all(&[], &fields));
    }
}
