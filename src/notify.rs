//! 処理中レコードの完了を待つ仕組み。
//!
//! レコードごとに `tokio::sync::watch` チャネルを持ち、ストアはシャードロックを
//! 保持したままステータス遷移と通知を行う。watch は最新値を保持するため、
//! 購読後に通知された完了を取りこぼすことはない。

use std::time::Duration;

use tokio::sync::watch;

use crate::{IdempotencyError, IdempotencyRecord};

#[derive(Debug, Clone)]
pub(crate) enum Settlement {
    Pending,
    Settled(IdempotencyRecord),
    Superseded,
}

/// レコードに紐づく通知送信側
#[derive(Debug)]
pub(crate) struct Signal {
    tx: watch::Sender<Settlement>,
}

impl Signal {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(Settlement::Pending);
        Self { tx }
    }

    pub(crate) fn subscribe(&self, key: &str) -> Waiter {
        Waiter {
            key: key.to_string(),
            rx: self.tx.subscribe(),
        }
    }

    pub(crate) fn settle(&self, record: IdempotencyRecord) {
        self.tx.send_replace(Settlement::Settled(record));
    }

    pub(crate) fn supersede(&self) {
        self.tx.send_replace(Settlement::Superseded);
    }

    pub(crate) fn waiter_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// 処理中レコードの完了を待つハンドル。
///
/// drop すると購読が解除されるだけで、実行者や他の待機者には影響しない。
#[derive(Debug)]
pub struct Waiter {
    key: String,
    rx: watch::Receiver<Settlement>,
}

impl Waiter {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// レコードが終端状態になるか `timeout` が経過するまで待つ。
    pub async fn wait(mut self, timeout: Duration) -> Result<IdempotencyRecord, IdempotencyError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let current = self.rx.borrow_and_update().clone();
            match current {
                Settlement::Settled(record) => return Ok(record),
                Settlement::Superseded => {
                    return Err(IdempotencyError::Superseded { key: self.key })
                }
                Settlement::Pending => {}
            }

            match tokio::time::timeout_at(deadline, self.rx.changed()).await {
                Ok(Ok(())) => continue,
                // 送信側が完了通知なしに破棄された
                Ok(Err(_)) => return Err(IdempotencyError::Superseded { key: self.key }),
                Err(_) => return Err(IdempotencyError::Timeout { key: self.key }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::request_hash;
    use crate::{IdempotencyStatus, StoredResponse};
    use chrono::Utc;
    use serde_json::json;

    fn completed_record() -> IdempotencyRecord {
        let now = Utc::now();
        let mut record =
            IdempotencyRecord::new("n-1".to_string(), request_hash(&json!({"a": 1})), now);
        record.complete(StoredResponse::new(201, json!({"message": "done"})), now);
        record
    }

    #[tokio::test]
    async fn test_settled_before_wait_is_observed() {
        let signal = Signal::new();
        let waiter = signal.subscribe("n-1");
        signal.settle(completed_record());

        let record = waiter.wait(Duration::from_millis(10)).await.unwrap();
        assert_eq!(record.status, IdempotencyStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_wakes_on_settle() {
        let signal = Signal::new();
        let waiter = signal.subscribe("n-1");
        let handle = tokio::spawn(waiter.wait(Duration::from_secs(5)));

        tokio::time::sleep(Duration::from_secs(1)).await;
        signal.settle(completed_record());

        let record = handle.await.unwrap().unwrap();
        assert_eq!(record.key, "n-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let signal = Signal::new();
        let waiter = signal.subscribe("n-1");
        let started = tokio::time::Instant::now();

        let result = waiter.wait(Duration::from_secs(5)).await;
        assert!(matches!(result, Err(IdempotencyError::Timeout { ref key }) if key == "n-1"));
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_supersede_releases_waiter() {
        let signal = Signal::new();
        let waiter = signal.subscribe("n-1");
        signal.supersede();

        let result = waiter.wait(Duration::from_secs(5)).await;
        assert!(matches!(result, Err(IdempotencyError::Superseded { .. })));
    }

    #[tokio::test]
    async fn test_dropped_signal_releases_waiter() {
        let signal = Signal::new();
        let waiter = signal.subscribe("n-1");
        drop(signal);

        let result = waiter.wait(Duration::from_secs(5)).await;
        assert!(matches!(result, Err(IdempotencyError::Superseded { .. })));
    }

    #[test]
    fn test_dropped_waiter_deregisters() {
        let signal = Signal::new();
        let first = signal.subscribe("n-1");
        let second = signal.subscribe("n-1");
        assert_eq!(signal.waiter_count(), 2);

        drop(first);
        assert_eq!(signal.waiter_count(), 1);
        assert_eq!(second.key(), "n-1");
    }
}
