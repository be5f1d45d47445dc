//! Account management HTTP handlers.
//!
//! This module implements the account-related API endpoints:
//! - POST /api/v1/accounts - Open a new account
//! - GET /api/v1/accounts - List the caller's accounts
//! - GET /api/v1/accounts/{id} - Get account by ID
//! - DELETE /api/v1/accounts/{id} - Delete an account without history
//! - GET /api/v1/accounts/{id}/entries - List an account's entries
//! - GET /api/v1/accounts/{id}/transfers - List an account's transfers

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        account::{Account, CreateAccountRequest},
        entry::Entry,
        page::Page,
        transfer::Transfer,
    },
    routes::AppState,
};

/// Open a new account for the authenticated owner.
///
/// # Request Body
///
/// ```json
/// {
///   "currency": "USD"
/// }
/// ```
///
/// # Response
///
/// - **Success (201 Created)**: Returns the created account, balance 0
/// - **Error (400)**: Unsupported currency
/// - **Error (409)**: Owner already holds an account in this currency
pub async fn create_account(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<Account>), AppError> {
    let account = state.accounts.create_account(&auth.owner, request).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// Get a specific account by ID.
///
/// Returns 404 if the account doesn't exist OR belongs to a different
/// owner, so other owners' accounts cannot be enumerated.
pub async fn get_account(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(account_id): Path<i64>,
) -> Result<Json<Account>, AppError> {
    let account = state.accounts.get_account(&auth.owner, account_id).await?;
    Ok(Json(account))
}

/// List the authenticated owner's accounts, ordered by id.
///
/// # Query Parameters
///
/// - `limit` (1-100, default 10)
/// - `offset` (default 0)
pub async fn list_accounts(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Account>>, AppError> {
    let accounts = state.accounts.list_accounts(&auth.owner, page).await?;
    Ok(Json(accounts))
}

/// Delete an account.
///
/// # Response
///
/// - **Success (204 No Content)**
/// - **Error (404)**: Account not found or not owned by caller
/// - **Error (409)**: Account is referenced by entries or transfers
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(account_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.accounts.delete_account(&auth.owner, account_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_entries(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(account_id): Path<i64>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Entry>>, AppError> {
    let entries = state
        .accounts
        .list_entries(&auth.owner, account_id, page)
        .await?;
    Ok(Json(entries))
}

pub async fn list_transfers(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(account_id): Path<i64>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Transfer>>, AppError> {
    let transfers = state
        .accounts
        .list_transfers(&auth.owner, account_id, page)
        .await?;
    Ok(Json(transfers))
}
