//! Transfer HTTP handlers.
//!
//! - POST /api/v1/transfers - Move money between two accounts
//! - GET /api/v1/transfers/{id} - Get transfer details

use axum::{
    Extension, Json,
    extract::{Path, State},
};

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::transfer::{TransactionResult, Transfer, TransferRequest},
    routes::AppState,
};

/// Transfer money between accounts.
///
/// # Request Body
///
/// ```json
/// {
///   "from_account_id": 1,
///   "to_account_id": 2,
///   "amount": "25.00",
///   "currency": "USD"
/// }
/// ```
///
/// # Response (200)
///
/// The transfer record, both entries, and both accounts as they stand
/// after the transfer committed.
///
/// # Errors
///
/// - 400: equal accounts, non-positive amount, currency mismatch
/// - 403: source account belongs to someone else
/// - 404: either account does not exist
/// - 503: transient conflict persisted through every retry
pub async fn create_transfer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<TransferRequest>,
) -> Result<Json<TransactionResult>, AppError> {
    let result = state.accounts.transfer(&auth.owner, request).await?;
    Ok(Json(result))
}

/// Get transfer by ID.
///
/// Returns 404 unless the transfer touches an account owned by the caller.
pub async fn get_transfer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(transfer_id): Path<i64>,
) -> Result<Json<Transfer>, AppError> {
    let transfer = state.accounts.get_transfer(&auth.owner, transfer_id).await?;
    Ok(Json(transfer))
}
