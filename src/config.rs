use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::IdempotencyError;

/// Idempotency-Key ヘッダー名
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

pub const DEFAULT_SHARD_COUNT: usize = 16;

// chrono::Duration の範囲内に収めるための上限（10 年）
const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// 処理中のキーに重複リクエストが来たときの振る舞い
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InFlightPolicy {
    /// 完了を wait_timeout まで待つ
    #[default]
    Wait,
    /// 即座に InProgress で拒否する
    Reject,
}

impl FromStr for InFlightPolicy {
    type Err = IdempotencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wait" => Ok(Self::Wait),
            "reject" => Ok(Self::Reject),
            other => Err(IdempotencyError::Config(format!(
                "不明な in_flight_policy: {other}"
            ))),
        }
    }
}

/// Failed レコードに同じキー・同じボディで再リクエストが来たときの振る舞い
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedRecordPolicy {
    /// 失敗結果をそのまま返す（再実行しない）
    #[default]
    Replay,
    /// 新しいクレームとして再実行を許可する
    Reclaim,
}

impl FromStr for FailedRecordPolicy {
    type Err = IdempotencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replay" => Ok(Self::Replay),
            "reclaim" => Ok(Self::Reclaim),
            other => Err(IdempotencyError::Config(format!(
                "不明な failed_record_policy: {other}"
            ))),
        }
    }
}

/// 冪等性ゲートウェイの設定
#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencyConfig {
    /// レコードの有効期間（秒）
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// 処理中レコードを待つ最大時間（ミリ秒）
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    /// 期限切れレコード掃除の間隔（秒）。None の場合は掃除しない。
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
    #[serde(default)]
    pub in_flight_policy: InFlightPolicy,
    #[serde(default)]
    pub failed_record_policy: FailedRecordPolicy,
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,
    #[serde(default = "default_header_name")]
    pub header_name: String,
}

fn default_ttl_secs() -> u64 {
    86400 // 24時間
}

fn default_wait_timeout_ms() -> u64 {
    10_000
}

fn default_shard_count() -> usize {
    DEFAULT_SHARD_COUNT
}

fn default_header_name() -> String {
    IDEMPOTENCY_KEY_HEADER.to_string()
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            wait_timeout_ms: default_wait_timeout_ms(),
            sweep_interval_secs: None,
            in_flight_policy: InFlightPolicy::default(),
            failed_record_policy: FailedRecordPolicy::default(),
            shard_count: default_shard_count(),
            header_name: default_header_name(),
        }
    }
}

impl IdempotencyConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs.min(MAX_TTL_SECS) as i64)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), IdempotencyError> {
        if self.ttl_secs == 0 {
            return Err(IdempotencyError::Config(
                "ttl_secs は 1 以上を指定してください".to_string(),
            ));
        }
        if self.ttl_secs > MAX_TTL_SECS {
            return Err(IdempotencyError::Config(format!(
                "ttl_secs は {MAX_TTL_SECS} 以下を指定してください"
            )));
        }
        if self.wait_timeout_ms == 0 {
            return Err(IdempotencyError::Config(
                "wait_timeout_ms は 1 以上を指定してください".to_string(),
            ));
        }
        if self.sweep_interval_secs == Some(0) {
            return Err(IdempotencyError::Config(
                "sweep_interval_secs は 1 以上を指定してください".to_string(),
            ));
        }
        if self.shard_count == 0 {
            return Err(IdempotencyError::Config(
                "shard_count は 1 以上を指定してください".to_string(),
            ));
        }
        if self.header_name.trim().is_empty() {
            return Err(IdempotencyError::Config("header_name が空です".to_string()));
        }
        Ok(())
    }

    /// 環境変数で設定を上書きする。
    pub fn apply_env_overrides(&mut self) -> Result<(), IdempotencyError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// `lookup` が返す値で設定を上書きする。
    ///
    /// - `IDEMPOTENCY_TTL_SECS`
    /// - `IDEMPOTENCY_WAIT_TIMEOUT_MS`
    /// - `IDEMPOTENCY_SWEEP_INTERVAL_SECS`
    /// - `IDEMPOTENCY_IN_FLIGHT_POLICY`（wait / reject）
    /// - `IDEMPOTENCY_FAILED_RECORD_POLICY`（replay / reclaim）
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), IdempotencyError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("IDEMPOTENCY_TTL_SECS") {
            self.ttl_secs = parse_number("IDEMPOTENCY_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("IDEMPOTENCY_WAIT_TIMEOUT_MS") {
            self.wait_timeout_ms = parse_number("IDEMPOTENCY_WAIT_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("IDEMPOTENCY_SWEEP_INTERVAL_SECS") {
            self.sweep_interval_secs = Some(parse_number("IDEMPOTENCY_SWEEP_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = lookup("IDEMPOTENCY_IN_FLIGHT_POLICY") {
            self.in_flight_policy = v.parse()?;
        }
        if let Some(v) = lookup("IDEMPOTENCY_FAILED_RECORD_POLICY") {
            self.failed_record_policy = v.parse()?;
        }
        Ok(())
    }
}

fn parse_number(name: &str, value: &str) -> Result<u64, IdempotencyError> {
    value
        .trim()
        .parse()
        .map_err(|e| IdempotencyError::Config(format!("{name} の値が不正です: {value} ({e})")))
}

/// 決済処理シミュレーターの設定
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
}

fn default_latency_ms() -> u64 {
    2000
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            latency_ms: default_latency_ms(),
        }
    }
}

impl PaymentConfig {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    #[serde(default)]
    pub payment: PaymentConfig,
}

impl Config {
    pub fn from_yaml(content: &str) -> Result<Self, IdempotencyError> {
        serde_yaml::from_str(content).map_err(|e| IdempotencyError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, IdempotencyError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            IdempotencyError::Config(format!("{} を読み込めません: {e}", path.display()))
        })?;
        Self::from_yaml(&content)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    /// "json" または "text"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_deserialization() {
        let yaml = r#"
app:
  name: "idempotency-gateway"
  version: "0.1.0"
  environment: "staging"
  log_format: "text"
server:
  host: "127.0.0.1"
  port: 9090
idempotency:
  ttl_secs: 20
  wait_timeout_ms: 5000
  sweep_interval_secs: 60
  in_flight_policy: reject
  failed_record_policy: reclaim
  shard_count: 4
payment:
  latency_ms: 10
"#;
        let cfg = Config::from_yaml(yaml).unwrap();
        assert_eq!(cfg.app.name, "idempotency-gateway");
        assert_eq!(cfg.app.log_format, "text");
        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.idempotency.ttl(), chrono::Duration::seconds(20));
        assert_eq!(cfg.idempotency.wait_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.idempotency.sweep_interval(), Some(Duration::from_secs(60)));
        assert_eq!(cfg.idempotency.in_flight_policy, InFlightPolicy::Reject);
        assert_eq!(cfg.idempotency.failed_record_policy, FailedRecordPolicy::Reclaim);
        assert_eq!(cfg.idempotency.shard_count, 4);
        assert_eq!(cfg.idempotency.header_name, IDEMPOTENCY_KEY_HEADER);
        assert_eq!(cfg.payment.latency(), Duration::from_millis(10));
        assert!(cfg.idempotency.validate().is_ok());
    }

    #[test]
    fn test_config_minimal() {
        let yaml = r#"
app:
  name: "idempotency-gateway"
"#;
        let cfg = Config::from_yaml(yaml).unwrap();
        assert_eq!(cfg.app.environment, "dev");
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.idempotency.ttl_secs, 86400);
        assert_eq!(cfg.idempotency.wait_timeout_ms, 10_000);
        assert!(cfg.idempotency.sweep_interval().is_none());
        assert_eq!(cfg.idempotency.in_flight_policy, InFlightPolicy::Wait);
        assert_eq!(cfg.idempotency.failed_record_policy, FailedRecordPolicy::Replay);
        assert_eq!(cfg.payment.latency_ms, 2000);
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let result = Config::from_yaml("app: [");
        assert!(matches!(result, Err(IdempotencyError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut cfg = IdempotencyConfig::default();
        cfg.ttl_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = IdempotencyConfig::default();
        cfg.wait_timeout_ms = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = IdempotencyConfig::default();
        cfg.sweep_interval_secs = Some(0);
        assert!(cfg.validate().is_err());

        let mut cfg = IdempotencyConfig::default();
        cfg.shard_count = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = IdempotencyConfig::default();
        cfg.ttl_secs = MAX_TTL_SECS + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_apply_overrides() {
        let env: HashMap<&str, &str> = [
            ("IDEMPOTENCY_TTL_SECS", "30"),
            ("IDEMPOTENCY_WAIT_TIMEOUT_MS", "250"),
            ("IDEMPOTENCY_SWEEP_INTERVAL_SECS", "5"),
            ("IDEMPOTENCY_IN_FLIGHT_POLICY", "Reject"),
            ("IDEMPOTENCY_FAILED_RECORD_POLICY", "reclaim"),
        ]
        .into_iter()
        .collect();

        let mut cfg = IdempotencyConfig::default();
        cfg.apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(cfg.ttl_secs, 30);
        assert_eq!(cfg.wait_timeout_ms, 250);
        assert_eq!(cfg.sweep_interval_secs, Some(5));
        assert_eq!(cfg.in_flight_policy, InFlightPolicy::Reject);
        assert_eq!(cfg.failed_record_policy, FailedRecordPolicy::Reclaim);
    }

    #[test]
    fn test_apply_overrides_rejects_invalid_values() {
        let mut cfg = IdempotencyConfig::default();
        let result = cfg.apply_overrides(|name| {
            (name == "IDEMPOTENCY_TTL_SECS").then(|| "forever".to_string())
        });
        assert!(matches!(result, Err(IdempotencyError::Config(_))));

        let result = cfg.apply_overrides(|name| {
            (name == "IDEMPOTENCY_IN_FLIGHT_POLICY").then(|| "queue".to_string())
        });
        assert!(matches!(result, Err(IdempotencyError::Config(_))));
    }
}
