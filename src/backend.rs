use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::StoredResponse;

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("リクエストが拒否されました: {0}")]
    Rejected(String),
    #[error("処理に失敗しました: {0}")]
    Failed(String),
}

impl BackendError {
    /// 記録・返却に使う失敗理由
    pub fn reason(&self) -> &str {
        match self {
            BackendError::Rejected(reason) | BackendError::Failed(reason) => reason,
        }
    }
}

/// 冪等でない（副作用を持つ）バックエンド処理
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    async fn perform(&self, body: &Value) -> Result<StoredResponse, BackendError>;
}

/// 遅延付きで決済を模擬するバックエンド。
///
/// `{"amount": 10, "currency": "USD"}` に対して
/// `201 {"message": "Charged 10 USD"}` を返す。
#[derive(Debug, Clone)]
pub struct SimulatedPaymentProcessor {
    latency: Duration,
}

impl SimulatedPaymentProcessor {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for SimulatedPaymentProcessor {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl Backend for SimulatedPaymentProcessor {
    async fn perform(&self, body: &Value) -> Result<StoredResponse, BackendError> {
        let amount = body
            .get("amount")
            .filter(|v| !v.is_null())
            .ok_or_else(|| BackendError::Rejected("amount is required".to_string()))?;
        let currency = body.get("currency").map(display_value).unwrap_or_default();

        tokio::time::sleep(self.latency).await;

        tracing::info!(amount = %amount, currency = %currency, "payment charged");
        Ok(StoredResponse::new(
            201,
            json!({ "message": format!("Charged {} {}", display_value(amount), currency) }),
        ))
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_simulated_payment_charges_after_latency() {
        let processor = SimulatedPaymentProcessor::default();
        let started = tokio::time::Instant::now();

        let response = processor
            .perform(&json!({"amount": 10, "currency": "USD"}))
            .await
            .unwrap();

        assert_eq!(response.status_code, 201);
        assert_eq!(response.body, json!({"message": "Charged 10 USD"}));
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_simulated_payment_rejects_missing_amount() {
        let processor = SimulatedPaymentProcessor::new(Duration::ZERO);
        let result = processor.perform(&json!({"currency": "USD"})).await;
        assert!(matches!(result, Err(BackendError::Rejected(_))));
    }

    #[test]
    fn test_reason_strips_error_kind() {
        let rejected = BackendError::Rejected("amount is required".to_string());
        let failed = BackendError::Failed("card declined".to_string());
        assert_eq!(rejected.reason(), "amount is required");
        assert_eq!(failed.reason(), "card declined");
        assert_ne!(rejected.to_string(), rejected.reason());
    }
}
