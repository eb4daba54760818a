//! Per-record sync state and command outcomes.

use std::cmp::Ordering;
use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix used for client-generated record tokens.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Identity of a record as seen by the client.
///
/// A record starts `Pending` under its client token and becomes `Confirmed`
/// once the remote store assigns it a document id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "id", rename_all = "snake_case")]
pub enum RecordId {
    Pending(String),
    Confirmed(String),
}

impl RecordId {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending(id) | Self::Confirmed(id) => id,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Server-assigned id, if the record has been confirmed.
    pub fn server_id(&self) -> Option<&str> {
        match self {
            Self::Confirmed(id) => Some(id),
            Self::Pending(_) => None,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generates a fresh client key. The key doubles as the temporary record id.
pub fn new_client_key() -> String {
    format!("{}{}", LOCAL_ID_PREFIX, Uuid::new_v4().simple())
}

/// Current time as an RFC 3339 string with millisecond precision.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Orders two `createdAt` values, newest first.
///
/// Values are compared as instants when both parse as RFC 3339, otherwise
/// lexically.
pub fn newest_first(left: &str, right: &str) -> Ordering {
    let left_parsed = chrono::DateTime::parse_from_rfc3339(left).map(|dt| dt.timestamp_millis());
    let right_parsed =
        chrono::DateTime::parse_from_rfc3339(right).map(|dt| dt.timestamp_millis());

    match (left_parsed, right_parsed) {
        (Ok(l), Ok(r)) => r.cmp(&l),
        _ => right.cmp(left),
    }
}

/// Why a command was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// No authenticated identity
    NoSession,
    /// No ledger is active for the session
    NoActiveLedger,
    /// No transaction matches the given id or client key
    UnknownRecord(String),
    /// No ledger matches the given id or client key
    UnknownLedger(String),
    /// Amounts are stored unsigned; the sign lives in the transaction type
    NegativeAmount,
    /// Names must not be blank
    EmptyName,
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSession => f.write_str("no authenticated session"),
            Self::NoActiveLedger => f.write_str("no active ledger"),
            Self::UnknownRecord(id) => write!(f, "unknown transaction {}", id),
            Self::UnknownLedger(id) => write!(f, "unknown ledger {}", id),
            Self::NegativeAmount => f.write_str("amount must not be negative"),
            Self::EmptyName => f.write_str("name must not be empty"),
        }
    }
}

/// Result of a store command.
///
/// Optimistic commands only ever return `Applied` or `PreconditionFailed`;
/// remote outcomes resolve later on the record itself. Commands that await the
/// remote store (fetches, category creation, bootstrap) may report
/// `RemoteFailed`.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum CommandOutcome<T = ()> {
    Applied(T),
    PreconditionFailed(Precondition),
    RemoteFailed(String),
}

impl<T> CommandOutcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    pub fn applied(self) -> Option<T> {
        match self {
            Self::Applied(value) => Some(value),
            _ => None,
        }
    }

    pub fn precondition(&self) -> Option<&Precondition> {
        match self {
            Self::PreconditionFailed(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CommandOutcome<U> {
        match self {
            Self::Applied(value) => CommandOutcome::Applied(f(value)),
            Self::PreconditionFailed(reason) => CommandOutcome::PreconditionFailed(reason),
            Self::RemoteFailed(message) => CommandOutcome::RemoteFailed(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_keys_are_unique_and_prefixed() {
        let a = new_client_key();
        let b = new_client_key();
        assert!(a.starts_with(LOCAL_ID_PREFIX));
        assert_ne!(a, b);
    }

    #[test]
    fn newest_first_uses_instants_not_lexical_format() {
        // 01:00+01:00 is the same instant as 00:00Z, so the later one is 00:30Z.
        assert_eq!(
            newest_first("2026-01-01T01:00:00+01:00", "2026-01-01T00:30:00Z"),
            Ordering::Greater
        );
        assert_eq!(
            newest_first("2026-03-01T00:00:00.000Z", "2026-01-01T00:00:00.000Z"),
            Ordering::Less
        );
    }

    #[test]
    fn newest_first_falls_back_to_lexical() {
        assert_eq!(newest_first("b", "a"), Ordering::Less);
    }

    #[test]
    fn record_id_serializes_as_tagged_state() {
        let json = serde_json::to_string(&RecordId::Confirmed("abc".into())).expect("serialize");
        assert_eq!(json, r#"{"state":"confirmed","id":"abc"}"#);
        assert_eq!(RecordId::Pending("local-1".into()).server_id(), None);
    }

    #[test]
    fn outcome_map_preserves_failures() {
        let failed: CommandOutcome<u8> = CommandOutcome::PreconditionFailed(Precondition::NoSession);
        assert_eq!(
            failed.map(|v| v + 1).precondition(),
            Some(&Precondition::NoSession)
        );
        assert_eq!(CommandOutcome::Applied(1).map(|v| v + 1).applied(), Some(2));
    }
}
