//! リクエストボディの正規化とハッシュ計算。
//!
//! オブジェクトのキー順序や `10` / `10.0` のような数値表現の違いに左右されず、
//! 意味的に同じボディは必ず同じハッシュになる。

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

/// 正規化済みリクエストボディの SHA-256 ダイジェスト
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct RequestHash([u8; 32]);

impl RequestHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for RequestHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.to_hex())
    }
}

impl fmt::Debug for RequestHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestHash({})", self.to_hex())
    }
}

impl From<RequestHash> for String {
    fn from(hash: RequestHash) -> Self {
        hash.to_hex()
    }
}

impl TryFrom<String> for RequestHash {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let bytes = hex::decode(&value).map_err(|e| format!("不正なハッシュ文字列: {e}"))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| "ハッシュ長が 32 バイトではありません".to_string())?;
        Ok(Self(bytes))
    }
}

/// ボディを正規化した文字列表現を返す。
pub fn canonicalize(body: &Value) -> String {
    let mut out = String::new();
    write_canonical(body, &mut out);
    out
}

/// ボディを正規化して SHA-256 を計算する。
pub fn request_hash(body: &Value) -> RequestHash {
    let digest = Sha256::digest(canonicalize(body).as_bytes());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    RequestHash(bytes)
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&canonical_number(n)),
        Value::String(s) => out.push_str(&quote(s)),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&quote(key));
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
    }
}

// 2^53 未満の整数値の浮動小数は整数として表記する
const MAX_EXACT_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

fn canonical_number(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < MAX_EXACT_FLOAT_INT => (f as i64).to_string(),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

fn quote(s: &str) -> String {
    Value::from(s).to_string()
}
