use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::RequestHash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdempotencyStatus {
    InFlight,
    Completed,
    Failed,
}

impl IdempotencyStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, IdempotencyStatus::InFlight)
    }
}

/// バックエンドが返したレスポンス（ステータスコード + JSON ボディ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub status_code: u16,
    pub body: serde_json::Value,
}

impl StoredResponse {
    pub fn new(status_code: u16, body: serde_json::Value) -> Self {
        Self { status_code, body }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub request_hash: RequestHash,
    pub status: IdempotencyStatus,
    pub response: Option<StoredResponse>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IdempotencyRecord {
    pub fn new(key: String, request_hash: RequestHash, now: DateTime<Utc>) -> Self {
        Self {
            key,
            request_hash,
            status: IdempotencyStatus::InFlight,
            response: None,
            failure_reason: None,
            created_at: now,
            completed_at: None,
        }
    }

    /// ステータスに関係なく、作成から TTL を超えたレコードは期限切れとみなす。
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.created_at > ttl
    }

    pub(crate) fn complete(&mut self, response: StoredResponse, now: DateTime<Utc>) {
        self.status = IdempotencyStatus::Completed;
        self.response = Some(response);
        self.completed_at = Some(now);
    }

    pub(crate) fn fail(&mut self, reason: String, now: DateTime<Utc>) {
        self.status = IdempotencyStatus::Failed;
        self.failure_reason = Some(reason);
        self.completed_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::request_hash;
    use serde_json::json;

    fn record_at(now: DateTime<Utc>) -> IdempotencyRecord {
        IdempotencyRecord::new("rec-1".to_string(), request_hash(&json!({"a": 1})), now)
    }

    #[test]
    fn test_new_record_is_in_flight() {
        let record = record_at(Utc::now());
        assert_eq!(record.status, IdempotencyStatus::InFlight);
        assert!(!record.status.is_terminal());
        assert!(record.response.is_none());
        assert!(record.completed_at.is_none());
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let created = Utc::now();
        let record = record_at(created);
        let ttl = Duration::seconds(20);
        assert!(!record.is_expired(created + Duration::seconds(20), ttl));
        assert!(record.is_expired(created + Duration::seconds(21), ttl));
    }

    #[test]
    fn test_complete_sets_fields() {
        let now = Utc::now();
        let mut record = record_at(now);
        record.complete(StoredResponse::new(201, json!({"ok": true})), now);
        assert_eq!(record.status, IdempotencyStatus::Completed);
        assert_eq!(record.response.as_ref().map(|r| r.status_code), Some(201));
        assert_eq!(record.completed_at, Some(now));
    }

    #[test]
    fn test_fail_sets_reason() {
        let now = Utc::now();
        let mut record = record_at(now);
        record.fail("card declined".to_string(), now);
        assert_eq!(record.status, IdempotencyStatus::Failed);
        assert!(record.status.is_terminal());
        assert_eq!(record.failure_reason.as_deref(), Some("card declined"));
        assert!(record.response.is_none());
    }
}
