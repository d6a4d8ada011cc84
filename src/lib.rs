//! k1s0-idempotency-gateway: 冪等キーによる重複実行防止ライブラリ。
//!
//! 冪等でないバックエンド処理（決済など）の前段に置き、同じキーの処理を高々 1 回に制限する。
//! 同時に届いた重複リクエストは処理中の結果を待ち、別ボディでのキー再利用は拒否する。

pub mod backend;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod hash;
pub mod layer;
pub mod logger;
pub mod memory;
pub mod notify;
pub mod record;
pub mod store;
pub mod sweeper;

pub use backend::{Backend, BackendError, SimulatedPaymentProcessor};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    Config, FailedRecordPolicy, IdempotencyConfig, InFlightPolicy, PaymentConfig,
    IDEMPOTENCY_KEY_HEADER,
};
pub use error::IdempotencyError;
pub use gateway::{IdempotencyGateway, Outcome};
pub use hash::{canonicalize, request_hash, RequestHash};
pub use layer::{process_payment, router, GatewayState, CACHE_HIT_HEADER};
pub use memory::InMemoryIdempotencyStore;
pub use notify::Waiter;
pub use record::{IdempotencyRecord, IdempotencyStatus, StoredResponse};
pub use store::{ClaimOutcome, ClaimTicket, IdempotencyStore, JoinState};
pub use sweeper::spawn_sweeper;

#[cfg(feature = "mock")]
pub use backend::MockBackend;
#[cfg(feature = "mock")]
pub use store::MockIdempotencyStore;
