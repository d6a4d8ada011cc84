use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::Clock;
use crate::store::IdempotencyStore;

/// これより短い間隔は切り上げる
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// 期限切れレコードを定期的に除去するタスクを起動する。
///
/// 正しさには不要で、メモリ回収のためだけに使う。停止は `JoinHandle::abort` で行う。
/// `interval` が 1 秒未満の場合は 1 秒として扱う。
pub fn spawn_sweeper(
    store: Arc<dyn IdempotencyStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(MIN_SWEEP_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 初回の tick は即時に完了する
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.sweep(clock.now()).await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "expired idempotency records swept"),
                Err(e) => tracing::warn!(error = %e, "idempotency sweep failed"),
            }
        }
    })
}
