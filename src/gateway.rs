//! 冪等キーによる実行可否の判定（claim-or-join）。
//!
//! 1 つのキーにつきバックエンド処理は高々 1 回だけ実行され、同じボディで
//! 合流した呼び出し元はすべて同じ結果を受け取る。

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::backend::Backend;
use crate::clock::{Clock, SystemClock};
use crate::config::{IdempotencyConfig, InFlightPolicy};
use crate::hash::request_hash;
use crate::store::{ClaimOutcome, ClaimTicket, IdempotencyStore, JoinState};
use crate::{IdempotencyError, IdempotencyRecord, IdempotencyStatus, StoredResponse};

const PANIC_REASON: &str = "backend operation panicked";

/// 受理されたリクエストの結果
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// この呼び出しでバックエンドを実行した
    Executed(StoredResponse),
    /// 保存済みの結果を返した
    CachedHit(StoredResponse),
}

impl Outcome {
    pub fn response(&self) -> &StoredResponse {
        match self {
            Outcome::Executed(r) | Outcome::CachedHit(r) => r,
        }
    }

    pub fn into_inner(self) -> StoredResponse {
        match self {
            Outcome::Executed(r) | Outcome::CachedHit(r) => r,
        }
    }

    pub fn is_cache_hit(&self) -> bool {
        matches!(self, Outcome::CachedHit(_))
    }
}

#[derive(Clone)]
pub struct IdempotencyGateway {
    store: Arc<dyn IdempotencyStore>,
    backend: Arc<dyn Backend>,
    clock: Arc<dyn Clock>,
    wait_timeout: Duration,
    in_flight_policy: InFlightPolicy,
}

impl IdempotencyGateway {
    pub fn new(
        store: Arc<dyn IdempotencyStore>,
        backend: Arc<dyn Backend>,
        config: &IdempotencyConfig,
    ) -> Self {
        Self {
            store,
            backend,
            clock: Arc::new(SystemClock),
            wait_timeout: config.wait_timeout(),
            in_flight_policy: config.in_flight_policy,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn IdempotencyStore> {
        &self.store
    }

    /// 冪等キーとボディを受け取り、実行・合流・拒否のいずれかを行う。
    pub async fn execute(
        &self,
        idempotency_key: Option<&str>,
        body: &Value,
    ) -> Result<Outcome, IdempotencyError> {
        let key = idempotency_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(IdempotencyError::MissingKey)?;
        let hash = request_hash(body);

        match self.store.try_claim(key, hash, self.clock.now()).await? {
            ClaimOutcome::Claimed(ticket) => self.run_claimed(ticket, body.clone()).await,
            ClaimOutcome::Joined(JoinState::Settled(record)) => replay(record),
            ClaimOutcome::Joined(JoinState::InFlight(waiter)) => match self.in_flight_policy {
                InFlightPolicy::Reject => Err(IdempotencyError::InProgress {
                    key: key.to_string(),
                }),
                InFlightPolicy::Wait => {
                    let record = waiter.wait(self.wait_timeout).await?;
                    replay(record)
                }
            },
            ClaimOutcome::Conflict { key } => Err(IdempotencyError::KeyConflict { key }),
        }
    }

    // バックエンド処理は別タスクで実行する。呼び出し元が途中で離脱しても
    // 結果は必ずストアに記録される。
    async fn run_claimed(
        &self,
        ticket: ClaimTicket,
        body: Value,
    ) -> Result<Outcome, IdempotencyError> {
        let store = self.store.clone();
        let backend = self.backend.clone();
        let clock = self.clock.clone();
        let key = ticket.key.clone();

        let task = tokio::spawn(async move {
            let performed = tokio::spawn(async move { backend.perform(&body).await }).await;
            let result = match performed {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(e)) => Err(e.reason().to_string()),
                Err(e) => {
                    tracing::error!(key = %ticket.key, error = %e, "backend operation aborted");
                    Err(PANIC_REASON.to_string())
                }
            };
            record_result(store.as_ref(), &ticket, &result, clock.now()).await;
            result
        });

        match task.await {
            Ok(Ok(response)) => Ok(Outcome::Executed(response)),
            Ok(Err(reason)) => Err(IdempotencyError::Upstream {
                reason,
                replayed: false,
            }),
            Err(e) => Err(IdempotencyError::Storage(format!(
                "実行タスクが異常終了しました: key={key}: {e}"
            ))),
        }
    }
}

async fn record_result(
    store: &dyn IdempotencyStore,
    ticket: &ClaimTicket,
    result: &Result<StoredResponse, String>,
    now: chrono::DateTime<chrono::Utc>,
) {
    let recorded = match result {
        Ok(response) => store.complete(ticket, response.clone(), now).await,
        Err(reason) => store.fail(ticket, reason.clone(), now).await,
    };
    match recorded {
        Ok(true) => {}
        Ok(false) => tracing::warn!(key = %ticket.key, "backend result was not recorded"),
        Err(e) => tracing::error!(key = %ticket.key, error = %e, "failed to record backend result"),
    }
}

fn replay(record: IdempotencyRecord) -> Result<Outcome, IdempotencyError> {
    match record.status {
        IdempotencyStatus::Completed => record.response.map(Outcome::CachedHit).ok_or_else(|| {
            IdempotencyError::Storage(format!(
                "完了済みレコードにレスポンスがありません: key={}",
                record.key
            ))
        }),
        IdempotencyStatus::Failed => Err(IdempotencyError::Upstream {
            reason: record.failure_reason.unwrap_or_default(),
            replayed: true,
        }),
        IdempotencyStatus::InFlight => Err(IdempotencyError::Storage(format!(
            "処理中のレコードは再生できません: key={}",
            record.key
        ))),
    }
}
