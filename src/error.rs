//! Error types and HTTP error response handling.
//!
//! [`LedgerError`] is the taxonomy produced by the ledger store and the
//! transfer engine. [`AppError`] wraps it at the HTTP boundary and decides
//! which status code and JSON body a client sees.

use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// PostgreSQL SQLSTATE codes that signal a transient, retryable conflict.
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const LOCK_NOT_AVAILABLE: &str = "55P03";
/// A value left the range of its NUMERIC column.
const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";

/// Errors raised by the ledger store and the transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Malformed request: equal accounts, non-positive amount, bad page.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A referenced record does not exist. Carries the record kind.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Transient isolation failure under contention. The whole operation
    /// can be retried from scratch.
    #[error("transient conflict: {0}")]
    Conflict(String),

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// An integrity constraint rejected the write, including a balance that
    /// would leave the representable range.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// The atomic unit outlived its deadline and was rolled back.
    #[error("deadline of {0:?} exceeded")]
    Timeout(Duration),

    /// Any other store failure, passed through unchanged.
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl LedgerError {
    /// True for errors where re-running the whole transfer may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Conflict(_))
    }
}

/// Classify a sqlx error into the ledger taxonomy.
///
/// Foreign-key violations are reported as `Constraint` here; insert paths
/// that know the violated key refers to an account remap them to `NotFound`.
impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => LedgerError::NotFound("record"),
            sqlx::Error::Database(db_err) => {
                let transient = matches!(
                    db_err.code().as_deref(),
                    Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED | LOCK_NOT_AVAILABLE)
                );
                if transient {
                    LedgerError::Conflict(db_err.message().to_string())
                } else if db_err.is_foreign_key_violation()
                    || db_err.is_unique_violation()
                    || db_err.is_check_violation()
                    || db_err.code().as_deref() == Some(NUMERIC_VALUE_OUT_OF_RANGE)
                {
                    LedgerError::Constraint(db_err.message().to_string())
                } else {
                    LedgerError::Database(sqlx::Error::Database(db_err))
                }
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => LedgerError::Unavailable(err.to_string()),
            _ => LedgerError::Database(err),
        }
    }
}

/// Application-wide error type returned by HTTP handlers.
///
/// # Error Categories
///
/// - **Authentication Errors**: Invalid or missing API keys
/// - **Authorization Errors**: Caller does not own the account it acts on
/// - **Validation Errors**: Invalid request data, currency mismatch
/// - **Ledger Errors**: Anything raised by the store or transfer engine
/// - **Database Errors**: Raw sqlx errors outside the ledger (auth, health)
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// API key is missing, invalid, or inactive.
    ///
    /// Returns HTTP 401 Unauthorized.
    #[error("Invalid API key")]
    InvalidApiKey,

    /// The caller may not act on the referenced account.
    ///
    /// Returns HTTP 403 Forbidden.
    #[error("{0}")]
    Forbidden(String),

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request.
    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Database operation failed outside the ledger store.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    /// HTTP status and machine-readable code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::InvalidApiKey => (StatusCode::UNAUTHORIZED, "invalid_api_key"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            AppError::InvalidRequest(_) | AppError::Ledger(LedgerError::InvalidArgument(_)) => {
                (StatusCode::BAD_REQUEST, "invalid_request")
            }
            AppError::Ledger(LedgerError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Ledger(LedgerError::Constraint(_)) => {
                (StatusCode::CONFLICT, "constraint_violation")
            }
            AppError::Ledger(LedgerError::Conflict(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "transient_conflict")
            }
            AppError::Ledger(LedgerError::Unavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
            }
            AppError::Ledger(LedgerError::Timeout(_)) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            AppError::Ledger(LedgerError::Database(_)) | AppError::Database(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        }
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// Server-side failures are logged and their details are hidden from the
/// client.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = if status.is_server_error() {
            tracing::error!(error = %self, code, "request failed");
            match code {
                "transient_conflict" => "Concurrent update conflict, retry the request".to_string(),
                "unavailable" => "Service temporarily unavailable".to_string(),
                "timeout" => "The operation timed out".to_string(),
                _ => "An internal error occurred".to_string(),
            }
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(AppError::InvalidApiKey, StatusCode::UNAUTHORIZED)]
    #[case(AppError::Forbidden("nope".into()), StatusCode::FORBIDDEN)]
    #[case(AppError::InvalidRequest("bad".into()), StatusCode::BAD_REQUEST)]
    #[case(LedgerError::InvalidArgument("bad".into()).into(), StatusCode::BAD_REQUEST)]
    #[case(LedgerError::NotFound("account").into(), StatusCode::NOT_FOUND)]
    #[case(LedgerError::Constraint("fk".into()).into(), StatusCode::CONFLICT)]
    #[case(LedgerError::Conflict("40001".into()).into(), StatusCode::SERVICE_UNAVAILABLE)]
    #[case(LedgerError::Unavailable("down".into()).into(), StatusCode::SERVICE_UNAVAILABLE)]
    #[case(LedgerError::Timeout(Duration::from_secs(1)).into(), StatusCode::GATEWAY_TIMEOUT)]
    #[case(AppError::Database(sqlx::Error::WorkerCrashed), StatusCode::INTERNAL_SERVER_ERROR)]
    fn maps_errors_to_status(#[case] err: AppError, #[case] expected: StatusCode) {
        assert_eq!(err.into_response().status(), expected);
    }

    #[test]
    fn classifies_sqlx_errors() {
        assert!(matches!(
            LedgerError::from(sqlx::Error::RowNotFound),
            LedgerError::NotFound(_)
        ));
        assert!(matches!(
            LedgerError::from(sqlx::Error::PoolTimedOut),
            LedgerError::Unavailable(_)
        ));
        assert!(matches!(
            LedgerError::from(sqlx::Error::ColumnNotFound("balance".into())),
            LedgerError::Database(_)
        ));
    }

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(LedgerError::Conflict("x".into()).is_retryable());
        assert!(!LedgerError::NotFound("account").is_retryable());
        assert!(!LedgerError::Unavailable("x".into()).is_retryable());
    }

    #[tokio::test]
    async fn server_errors_hide_details() {
        let response = AppError::Ledger(LedgerError::Unavailable("10.0.0.5 refused".into()))
            .into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(body["error"]["code"], "unavailable");
        assert!(!body["error"]["message"].as_str().unwrap().contains("10.0.0.5"));
    }
}
