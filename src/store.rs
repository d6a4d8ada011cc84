use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::hash::RequestHash;
use crate::notify::Waiter;
use crate::{IdempotencyError, IdempotencyRecord, StoredResponse};

/// `try_claim` に勝った呼び出し元だけが持つ実行権。
/// `complete` / `fail` はこのチケットの claim_id が現在のレコードと一致する場合のみ反映される。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimTicket {
    pub key: String,
    pub claim_id: Uuid,
}

#[derive(Debug)]
pub enum JoinState {
    /// 既に終端状態のレコード
    Settled(IdempotencyRecord),
    /// 処理中のレコード。完了を待つハンドルを返す。
    InFlight(Waiter),
}

#[derive(Debug)]
pub enum ClaimOutcome {
    Claimed(ClaimTicket),
    Joined(JoinState),
    Conflict { key: String },
}

#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// キーを原子的に確保するか、既存レコードに合流する
    async fn try_claim(
        &self,
        key: &str,
        request_hash: RequestHash,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, IdempotencyError>;
    /// InFlight → Completed に遷移させ、待機者に通知する（遷移しなければ false）
    async fn complete(
        &self,
        ticket: &ClaimTicket,
        response: StoredResponse,
        now: DateTime<Utc>,
    ) -> Result<bool, IdempotencyError>;
    /// InFlight → Failed に遷移させ、待機者に通知する（遷移しなければ false）
    async fn fail(
        &self,
        ticket: &ClaimTicket,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<bool, IdempotencyError>;
    /// 期限切れレコードを除去し、除去件数を返す
    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, IdempotencyError>;
    /// レコードを取得する（期限切れは None を返す）
    async fn get(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyError>;
}
