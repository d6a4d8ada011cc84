//! 構造化ログの初期化。
//!
//! `RUST_LOG` が設定されていればそれを優先し、なければ環境ごとの既定レベルを使う。

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 環境ごとの既定ログレベル
///
/// - dev: debug
/// - staging: info
/// - prod: warn
pub fn default_level(env: &str) -> &'static str {
    match env {
        "dev" => "debug",
        "staging" => "info",
        _ => "warn",
    }
}

/// init_logger は tracing-subscriber を初期化する。
/// format が "text" の場合はプレーンテキスト出力、それ以外は JSON 出力。
pub fn init_logger(env: &str, format: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level(env)));
    let registry = tracing_subscriber::registry().with(filter);

    if format == "text" {
        registry.with(fmt::layer().with_target(true)).init();
    } else {
        registry.with(fmt::layer().json().with_target(true)).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level_per_environment() {
        assert_eq!(default_level("dev"), "debug");
        assert_eq!(default_level("staging"), "info");
        assert_eq!(default_level("prod"), "warn");
        assert_eq!(default_level("unknown"), "warn");
    }
}
