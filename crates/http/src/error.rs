//! Maps [`CoreError`] to an HTTP response. `Internal` never reaches the
//! body: it's logged with a correlation id and the caller gets a generic
//! 500, the same split `CoreError::is_safe_to_expose` draws at the core
//! boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ledger_core::CoreError;
use serde_json::json;

pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;

        if !err.is_safe_to_expose() {
            let correlation_id = uuid::Uuid::new_v4();
            tracing::error!(%correlation_id, error = %err, "internal error");
            let body = Json(json!({
                "code": "internal",
                "message": "internal error",
                "correlation_id": correlation_id.to_string(),
            }));
            return (StatusCode::INTERNAL_SERVER_ERROR, body).into_response();
        }

        let status = match &err {
            CoreError::Unauthenticated => StatusCode::UNAUTHORIZED,
            CoreError::NotAMember | CoreError::InsufficientPermissions { .. } => StatusCode::FORBIDDEN,
            CoreError::NotFound | CoreError::CardNotFound => StatusCode::NOT_FOUND,
            CoreError::InvalidTransition { .. }
            | CoreError::InvalidOptions
            | CoreError::InvalidFallback
            | CoreError::InvalidOption
            | CoreError::NotClaimable(_)
            | CoreError::NotYourClaim
            | CoreError::SecretInPayload
            | CoreError::ProjectExists
            | CoreError::DuplicateMember
            | CoreError::CannotRemoveLastOwner => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::Internal(_) => unreachable!("handled above"),
        };

        let mut body = json!({ "code": err.code(), "message": err.to_string() });
        if let CoreError::InvalidTransition { from, to } = &err {
            body["from"] = json!(from);
            body["to"] = json!(to);
        }
        if let CoreError::InsufficientPermissions { required, .. } = &err {
            body["required"] = json!(required);
        }
        if let CoreError::NotClaimable(state) = &err {
            body["state"] = json!(state);
        }

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
