use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use serde_json::Value;

use crate::gateway::{IdempotencyGateway, Outcome};
use crate::IdempotencyError;

/// 保存済み結果を返したことを示すヘッダー
pub const CACHE_HIT_HEADER: &str = "x-cache-hit";

/// axum handler State に渡すゲートウェイ + ヘッダー名
#[derive(Clone)]
pub struct GatewayState {
    pub gateway: IdempotencyGateway,
    pub header_name: String,
}

impl GatewayState {
    pub fn new(gateway: IdempotencyGateway, header_name: impl Into<String>) -> Self {
        Self {
            gateway,
            header_name: header_name.into(),
        }
    }
}

/// `POST /process-payment` を提供するルーター
///
/// ```ignore
/// let gateway = IdempotencyGateway::new(store, backend, &config);
/// let app = router(GatewayState::new(gateway, IDEMPOTENCY_KEY_HEADER));
/// axum::serve(listener, app).await?;
/// ```
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/process-payment", post(process_payment))
        .with_state(state)
}

pub async fn process_payment(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    let idempotency_key = headers
        .get(&state.header_name)
        .and_then(|v| v.to_str().ok());

    match state.gateway.execute(idempotency_key, &payload).await {
        Ok(outcome) => outcome.into_response(),
        Err(e) => e.into_response(),
    }
}

impl IntoResponse for Outcome {
    fn into_response(self) -> Response {
        let cache_hit = self.is_cache_hit();
        let response = self.into_inner();
        let status = StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::OK);
        if cache_hit {
            (status, [(CACHE_HIT_HEADER, "true")], Json(response.body)).into_response()
        } else {
            (status, Json(response.body)).into_response()
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    request_id: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

impl IntoResponse for IdempotencyError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            IdempotencyError::MissingKey => {
                (StatusCode::BAD_REQUEST, "SYS_IDEMPOTENCY_KEY_REQUIRED")
            }
            IdempotencyError::KeyConflict { .. } => {
                (StatusCode::CONFLICT, "SYS_IDEMPOTENCY_KEY_CONFLICT")
            }
            IdempotencyError::InProgress { .. } => {
                (StatusCode::CONFLICT, "SYS_IDEMPOTENCY_IN_PROGRESS")
            }
            // 調停系はすべて 409 とし、コードで区別する
            IdempotencyError::Timeout { .. } => {
                (StatusCode::CONFLICT, "SYS_IDEMPOTENCY_WAIT_TIMEOUT")
            }
            IdempotencyError::Superseded { .. } => {
                (StatusCode::CONFLICT, "SYS_IDEMPOTENCY_SUPERSEDED")
            }
            IdempotencyError::Upstream { .. } => {
                (StatusCode::BAD_GATEWAY, "SYS_IDEMPOTENCY_UPSTREAM_FAILED")
            }
            IdempotencyError::Serialization(_)
            | IdempotencyError::Config(_)
            | IdempotencyError::Storage(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SYS_IDEMPOTENCY_INTERNAL_ERROR",
            ),
        };

        if status.is_server_error() && status != StatusCode::BAD_GATEWAY {
            tracing::error!(error = %self, "idempotency gateway internal error");
        }

        let replayed = matches!(self, IdempotencyError::Upstream { replayed: true, .. });
        let body = Json(ErrorResponse {
            error: ErrorBody {
                code,
                message: self.to_string(),
                request_id: uuid::Uuid::new_v4().to_string(),
            },
        });
        if replayed {
            (status, [(CACHE_HIT_HEADER, "true")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}
