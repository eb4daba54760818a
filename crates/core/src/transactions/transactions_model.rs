//! Transaction records, drafts and patches, and their document encoding.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::sync::{Document, Fields, RecordId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Income,
    Expense,
}

/// A transaction held by the sync store.
///
/// `amount` is never negative; `kind` carries the sign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: RecordId,
    pub client_key: String,
    pub owner_id: String,
    pub title: String,
    pub amount: Decimal,
    pub date: String,
    pub category: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    /// `None` only for records created before ledgers existed.
    pub ledger_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Local only, never written to the remote store.
    #[serde(default)]
    pub is_syncing: bool,
}

/// Wire shape of a transaction document.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_key: Option<String>,
    owner_id: String,
    title: String,
    amount: Decimal,
    date: String,
    category: String,
    #[serde(rename = "type")]
    kind: TransactionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ledger_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    note: Option<String>,
    #[serde(default)]
    created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
}

impl Transaction {
    /// True when `token` is this record's current id or its client key.
    pub fn matches(&self, token: &str) -> bool {
        self.id.as_str() == token || self.client_key == token
    }

    pub fn signed_amount(&self) -> Decimal {
        match self.kind {
            TransactionType::Income => self.amount,
            TransactionType::Expense => -self.amount,
        }
    }

    /// Remote payload: the id and the syncing flag are stripped.
    pub fn to_fields(&self) -> Fields {
        let document = TransactionDocument {
            client_key: Some(self.client_key.clone()),
            owner_id: self.owner_id.clone(),
            title: self.title.clone(),
            amount: self.amount,
            date: self.date.clone(),
            category: self.category.clone(),
            kind: self.kind,
            ledger_id: self.ledger_id.clone(),
            note: self.note.clone(),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
        };
        match serde_json::to_value(document) {
            Ok(serde_json::Value::Object(fields)) => fields,
            _ => Fields::new(),
        }
    }

    /// Decodes a confirmed record. Documents written without a client key
    /// use their document id as the key.
    pub fn from_document(doc: &Document) -> Result<Self> {
        let decoded: TransactionDocument =
            serde_json::from_value(serde_json::Value::Object(doc.fields.clone()))
                .map_err(|e| Error::invalid_document(&doc.id, e.to_string()))?;
        if decoded.amount.is_sign_negative() && !decoded.amount.is_zero() {
            return Err(Error::invalid_document(&doc.id, "negative amount"));
        }

        Ok(Self {
            id: RecordId::Confirmed(doc.id.clone()),
            client_key: decoded.client_key.unwrap_or_else(|| doc.id.clone()),
            owner_id: decoded.owner_id,
            title: decoded.title,
            amount: decoded.amount,
            date: decoded.date,
            category: decoded.category,
            kind: decoded.kind,
            ledger_id: decoded.ledger_id,
            note: decoded.note,
            created_at: decoded.created_at,
            updated_at: decoded.updated_at,
            is_syncing: false,
        })
    }
}

/// User input for a new transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionDraft {
    pub title: String,
    pub amount: Decimal,
    pub category: String,
    pub kind: TransactionType,
    pub note: Option<String>,
    /// Display date; the creation day is used when absent.
    pub date: Option<String>,
}

impl TransactionDraft {
    pub fn new(
        title: impl Into<String>,
        amount: Decimal,
        category: impl Into<String>,
        kind: TransactionType,
    ) -> Self {
        Self {
            title: title.into(),
            amount,
            category: category.into(),
            kind,
            note: None,
            date: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }
}

/// Partial edit of a transaction. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionPatch {
    pub title: Option<String>,
    pub amount: Option<Decimal>,
    pub category: Option<String>,
    pub kind: Option<TransactionType>,
    pub note: Option<String>,
    pub date: Option<String>,
}

impl TransactionPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, tx: &mut Transaction) {
        if let Some(title) = &self.title {
            tx.title = title.clone();
        }
        if let Some(amount) = self.amount {
            tx.amount = amount;
        }
        if let Some(category) = &self.category {
            tx.category = category.clone();
        }
        if let Some(kind) = self.kind {
            tx.kind = kind;
        }
        if let Some(note) = &self.note {
            tx.note = Some(note.clone());
        }
        if let Some(date) = &self.date {
            tx.date = date.clone();
        }
    }

    /// Fields sent for a partial remote merge.
    pub fn to_fields(&self, updated_at: &str) -> Fields {
        let mut fields = Fields::new();
        if let Some(title) = &self.title {
            fields.insert("title".into(), title.clone().into());
        }
        if let Some(amount) = self.amount {
            if let Ok(value) = serde_json::to_value(amount) {
                fields.insert("amount".into(), value);
            }
        }
        if let Some(category) = &self.category {
            fields.insert("category".into(), category.clone().into());
        }
        if let Some(kind) = self.kind {
            if let Ok(value) = serde_json::to_value(kind) {
                fields.insert("type".into(), value);
            }
        }
        if let Some(note) = &self.note {
            fields.insert("note".into(), note.clone().into());
        }
        if let Some(date) = &self.date {
            fields.insert("date".into(), date.clone().into());
        }
        fields.insert("updatedAt".into(), updated_at.into());
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn sample() -> Transaction {
        Transaction {
            id: RecordId::Pending("local-abc".into()),
            client_key: "local-abc".into(),
            owner_id: "user-1".into(),
            title: "Lunch".into(),
            amount: dec!(12.5),
            date: "2026-02-03".into(),
            category: "Food".into(),
            kind: TransactionType::Expense,
            ledger_id: Some("ledger-1".into()),
            note: None,
            created_at: "2026-02-03T12:00:00.000Z".into(),
            updated_at: None,
            is_syncing: true,
        }
    }

    #[test]
    fn remote_payload_strips_local_state() {
        let fields = sample().to_fields();
        assert!(fields.get("id").is_none());
        assert!(fields.get("isSyncing").is_none());
        assert_eq!(fields.get("clientKey"), Some(&json!("local-abc")));
        assert_eq!(fields.get("type"), Some(&json!("expense")));
        assert_eq!(fields.get("ledgerId"), Some(&json!("ledger-1")));
        assert_eq!(fields.get("amount"), Some(&json!(12.5)));
    }

    #[test]
    fn legacy_document_without_client_key_uses_document_id() {
        let doc = Document::new(
            "srv-9",
            json!({
                "ownerId": "user-1",
                "title": "Salary",
                "amount": 1500,
                "date": "Mon Feb 02 2026",
                "category": "Salary",
                "type": "income",
                "createdAt": "2026-02-02T08:00:00.000Z"
            })
            .as_object()
            .cloned()
            .expect("object"),
        );
        let tx = Transaction::from_document(&doc).expect("decode");
        assert_eq!(tx.id, RecordId::Confirmed("srv-9".into()));
        assert_eq!(tx.client_key, "srv-9");
        assert_eq!(tx.ledger_id, None);
        assert_eq!(tx.amount, dec!(1500));
        assert!(!tx.is_syncing);
        assert!(tx.matches("srv-9"));
    }

    #[test]
    fn negative_amount_document_is_rejected() {
        let mut fields = sample().to_fields();
        fields.insert("amount".into(), json!(-3));
        let err = Transaction::from_document(&Document::new("x", fields)).unwrap_err();
        assert!(matches!(err, Error::InvalidDocument { .. }));
    }

    #[test]
    fn patch_touches_only_set_fields() {
        let mut tx = sample();
        let patch = TransactionPatch {
            amount: Some(dec!(20)),
            note: Some("with tip".into()),
            ..Default::default()
        };
        patch.apply(&mut tx);
        assert_eq!(tx.amount, dec!(20));
        assert_eq!(tx.note.as_deref(), Some("with tip"));
        assert_eq!(tx.title, "Lunch");

        let fields = patch.to_fields("2026-02-04T00:00:00.000Z");
        assert_eq!(fields.len(), 3);
        assert!(fields.contains_key("updatedAt"));
        assert!(!fields.contains_key("title"));
        assert!(TransactionPatch::default().is_empty());
    }

    #[test]
    fn signed_amount_follows_type() {
        let mut tx = sample();
        assert_eq!(tx.signed_amount(), dec!(-12.5));
        tx.kind = TransactionType::Income;
        assert_eq!(tx.signed_amount(), dec!(12.5));
    }
}
