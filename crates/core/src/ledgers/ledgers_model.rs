use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::sync::{Document, Fields, RecordId};

/// Name of the ledger created for accounts that have none.
pub const DEFAULT_LEDGER_NAME: &str = "Main Book";
pub const DEFAULT_LEDGER_ICON: &str = "book";
pub const DEFAULT_LEDGER_COLOR: &str = "#6366F1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ledger {
    pub id: RecordId,
    pub client_key: String,
    pub owner_id: String,
    pub name: String,
    pub icon: String,
    pub color: String,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_key: Option<String>,
    owner_id: String,
    name: String,
    #[serde(default)]
    icon: String,
    #[serde(default)]
    color: String,
    #[serde(default)]
    created_at: String,
}

impl Ledger {
    pub fn matches(&self, token: &str) -> bool {
        self.id.as_str() == token || self.client_key == token
    }

    pub fn to_fields(&self) -> Fields {
        let document = LedgerDocument {
            client_key: Some(self.client_key.clone()),
            owner_id: self.owner_id.clone(),
            name: self.name.clone(),
            icon: self.icon.clone(),
            color: self.color.clone(),
            created_at: self.created_at.clone(),
        };
        match serde_json::to_value(document) {
            Ok(serde_json::Value::Object(fields)) => fields,
            _ => Fields::new(),
        }
    }

    pub fn from_document(doc: &Document) -> Result<Self> {
        let decoded: LedgerDocument =
            serde_json::from_value(serde_json::Value::Object(doc.fields.clone()))
                .map_err(|e| Error::invalid_document(&doc.id, e.to_string()))?;

        Ok(Self {
            id: RecordId::Confirmed(doc.id.clone()),
            client_key: decoded.client_key.unwrap_or_else(|| doc.id.clone()),
            owner_id: decoded.owner_id,
            name: decoded.name,
            icon: decoded.icon,
            color: decoded.color,
            created_at: decoded.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_fills_missing_presentation_fields() {
        let doc = Document::new(
            "led-1",
            json!({"ownerId": "u1", "name": "Travel", "clientKey": "local-7"})
                .as_object()
                .cloned()
                .expect("object"),
        );
        let ledger = Ledger::from_document(&doc).expect("decode");
        assert_eq!(ledger.id.server_id(), Some("led-1"));
        assert_eq!(ledger.client_key, "local-7");
        assert!(ledger.icon.is_empty());
        assert!(ledger.matches("local-7"));
        assert!(ledger.matches("led-1"));
    }

    #[test]
    fn missing_owner_is_invalid() {
        let doc = Document::new(
            "led-2",
            json!({"name": "Orphan"}).as_object().cloned().expect("object"),
        );
        assert!(Ledger::from_document(&doc).is_err());
    }
}
