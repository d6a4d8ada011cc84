use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdempotencyError {
    #[error("Idempotency-Key ヘッダーは必須です")]
    MissingKey,
    #[error("冪等キーは別のリクエストボディで使用済みです: key={key}")]
    KeyConflict { key: String },
    #[error("リクエストは現在処理中です: key={key}")]
    InProgress { key: String },
    #[error("処理中リクエストの完了待ちがタイムアウトしました: key={key}")]
    Timeout { key: String },
    #[error("待機中のレコードが TTL 切れにより置き換えられました: key={key}")]
    Superseded { key: String },
    #[error("バックエンド処理に失敗しました: {reason}")]
    Upstream { reason: String, replayed: bool },
    #[error("シリアライズエラー: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("設定エラー: {0}")]
    Config(String),
    #[error("ストレージエラー: {0}")]
    Storage(String),
}

impl IdempotencyError {
    /// 同じリクエストを後で再送すれば成功し得るエラーかどうか。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Superseded { .. } | Self::InProgress { .. }
        )
    }
}
