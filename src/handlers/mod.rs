//! HTTP request handlers (route handlers).
//!
//! Handlers unpack the request, pass the authenticated owner explicitly
//! into the account service, and serialize the result as JSON.

/// Account management endpoints
pub mod accounts;
/// Service health endpoint
pub mod health;
/// Transfer endpoints
pub mod transfers;
