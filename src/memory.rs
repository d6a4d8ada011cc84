use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::{FailedRecordPolicy, IdempotencyConfig, DEFAULT_SHARD_COUNT};
use crate::hash::RequestHash;
use crate::notify::Signal;
use crate::store::{ClaimOutcome, ClaimTicket, IdempotencyStore, JoinState};
use crate::{IdempotencyError, IdempotencyRecord, IdempotencyStatus, StoredResponse};

struct Entry {
    record: IdempotencyRecord,
    claim_id: Uuid,
    signal: Signal,
}

type Shard = Mutex<HashMap<String, Entry>>;

/// シャード分割したインメモリストア。
/// 同一キーの操作は必ず同じシャードのロック下で行われる。
#[derive(Clone)]
pub struct InMemoryIdempotencyStore {
    shards: Arc<Vec<Shard>>,
    ttl: Duration,
    failed_record_policy: FailedRecordPolicy,
}

impl InMemoryIdempotencyStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            shards: Arc::new(new_shards(DEFAULT_SHARD_COUNT)),
            ttl,
            failed_record_policy: FailedRecordPolicy::default(),
        }
    }

    pub fn with_config(config: &IdempotencyConfig) -> Self {
        Self::new(config.ttl())
            .with_shard_count(config.shard_count)
            .with_failed_record_policy(config.failed_record_policy)
    }

    pub fn with_shard_count(mut self, shard_count: usize) -> Self {
        self.shards = Arc::new(new_shards(shard_count));
        self
    }

    pub fn with_failed_record_policy(mut self, policy: FailedRecordPolicy) -> Self {
        self.failed_record_policy = policy;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 物理的に保持しているレコード数（期限切れ含む）
    pub async fn len(&self) -> usize {
        let mut total = 0;
        for shard in self.shards.iter() {
            total += shard.lock().await.len();
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn shard_for(&self, key: &str) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    fn is_reclaimable(
        &self,
        record: &IdempotencyRecord,
        request_hash: &RequestHash,
        now: DateTime<Utc>,
    ) -> bool {
        if record.is_expired(now, self.ttl) {
            return true;
        }
        self.failed_record_policy == FailedRecordPolicy::Reclaim
            && record.status == IdempotencyStatus::Failed
            && record.request_hash == *request_hash
    }

    async fn settle<F>(
        &self,
        ticket: &ClaimTicket,
        to: IdempotencyStatus,
        transition: F,
    ) -> Result<bool, IdempotencyError>
    where
        F: FnOnce(&mut IdempotencyRecord),
    {
        let mut shard = self.shard_for(&ticket.key).lock().await;
        let Some(entry) = shard.get_mut(&ticket.key) else {
            tracing::warn!(key = %ticket.key, to = ?to, "idempotency record not found on settle");
            return Ok(false);
        };
        if entry.claim_id != ticket.claim_id {
            tracing::warn!(
                key = %ticket.key,
                to = ?to,
                "idempotency record was superseded by a newer claim; ignoring stale result"
            );
            return Ok(false);
        }
        if entry.record.status != IdempotencyStatus::InFlight {
            tracing::warn!(
                key = %ticket.key,
                from = ?entry.record.status,
                to = ?to,
                "invalid idempotency status transition"
            );
            return Ok(false);
        }

        transition(&mut entry.record);
        tracing::debug!(
            key = %ticket.key,
            status = ?entry.record.status,
            waiters = entry.signal.waiter_count(),
            "idempotency record settled"
        );
        entry.signal.settle(entry.record.clone());
        Ok(true)
    }
}

fn new_shards(count: usize) -> Vec<Shard> {
    (0..count.max(1)).map(|_| Mutex::new(HashMap::new())).collect()
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::with_config(&IdempotencyConfig::default())
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn try_claim(
        &self,
        key: &str,
        request_hash: RequestHash,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, IdempotencyError> {
        let mut shard = self.shard_for(key).lock().await;

        if let Some(entry) = shard.get(key) {
            if !self.is_reclaimable(&entry.record, &request_hash, now) {
                if entry.record.request_hash != request_hash {
                    tracing::debug!(key, "idempotency key reused with a different request body");
                    return Ok(ClaimOutcome::Conflict {
                        key: key.to_string(),
                    });
                }
                let joined = match entry.record.status {
                    IdempotencyStatus::InFlight => JoinState::InFlight(entry.signal.subscribe(key)),
                    _ => JoinState::Settled(entry.record.clone()),
                };
                tracing::debug!(key, status = ?entry.record.status, "joined existing idempotency record");
                return Ok(ClaimOutcome::Joined(joined));
            }
        }

        let claim_id = Uuid::new_v4();
        let entry = Entry {
            record: IdempotencyRecord::new(key.to_string(), request_hash, now),
            claim_id,
            signal: Signal::new(),
        };
        // 置き換えとクレームは同じロック下で行う
        if let Some(previous) = shard.insert(key.to_string(), entry) {
            if previous.record.status == IdempotencyStatus::InFlight {
                tracing::debug!(
                    key,
                    waiters = previous.signal.waiter_count(),
                    "superseding expired in-flight idempotency record"
                );
                previous.signal.supersede();
            }
        }
        tracing::debug!(key, %claim_id, "idempotency key claimed");

        Ok(ClaimOutcome::Claimed(ClaimTicket {
            key: key.to_string(),
            claim_id,
        }))
    }

    async fn complete(
        &self,
        ticket: &ClaimTicket,
        response: StoredResponse,
        now: DateTime<Utc>,
    ) -> Result<bool, IdempotencyError> {
        self.settle(ticket, IdempotencyStatus::Completed, |record| {
            record.complete(response, now)
        })
        .await
    }

    async fn fail(
        &self,
        ticket: &ClaimTicket,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<bool, IdempotencyError> {
        self.settle(ticket, IdempotencyStatus::Failed, |record| {
            record.fail(reason, now)
        })
        .await
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, IdempotencyError> {
        let mut removed = 0;
        for shard in self.shards.iter() {
            let mut map = shard.lock().await;
            let before = map.len();
            map.retain(|_, entry| {
                let expired = entry.record.is_expired(now, self.ttl);
                if expired && entry.record.status == IdempotencyStatus::InFlight {
                    entry.signal.supersede();
                }
                !expired
            });
            removed += before - map.len();
        }
        Ok(removed)
    }

    async fn get(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyError> {
        let shard = self.shard_for(key).lock().await;
        Ok(shard
            .get(key)
            .filter(|entry| !entry.record.is_expired(now, self.ttl))
            .map(|entry| entry.record.clone()))
    }
}
