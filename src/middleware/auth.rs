//! API key authentication middleware.
//!
//! This middleware intercepts every protected request to:
//! 1. Extract the API key from the Authorization header
//! 2. Hash it and verify it exists in the database
//! 3. Inject the owner identity into the request
//! 4. Reject unauthorized requests with HTTP 401

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};

use crate::{error::AppError, routes::AppState};

/// Authentication context attached to authenticated requests.
///
/// Handlers extract it with `Extension<AuthContext>` and pass `owner`
/// explicitly into the account service.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Identity that owns the accounts this request may act on
    pub owner: String,
}

/// Extract the token from an `Authorization: Bearer <key>` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .filter(|key| !key.is_empty())
        .ok_or(AppError::InvalidApiKey)
}

/// Hex-encoded SHA-256 of a plaintext API key, as stored in `api_keys`.
pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// API key authentication middleware function.
///
/// # Flow
///
/// 1. Extract `Authorization: Bearer <key>` header from request
/// 2. Hash the `<key>` using SHA-256
/// 3. Query database for matching hash where `is_active = true`
/// 4. If found: inject `AuthContext` into request, call next handler
/// 5. If not found: return 401 Unauthorized error
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key_hash = hash_api_key(bearer_token(request.headers())?);

    // inactive keys stay in the table but no longer authenticate
    let owner = sqlx::query_scalar::<_, String>(
        "SELECT owner FROM api_keys WHERE key_hash = $1 AND is_active = true",
    )
    .bind(&key_hash)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::InvalidApiKey)?;

    tracing::debug!(%owner, "request authenticated");

    request.extensions_mut().insert(AuthContext { owner });

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn extracts_bearer_token() {
        assert_eq!(bearer_token(&headers("Bearer abc123")).unwrap(), "abc123");
    }

    #[test]
    fn rejects_other_schemes_and_empty_keys() {
        assert!(bearer_token(&headers("Basic abc123")).is_err());
        assert!(bearer_token(&headers("Bearer ")).is_err());
        assert!(bearer_token(&HeaderMap::new()).is_err());
    }

    #[test]
    fn hashes_keys_as_hex_sha256() {
        assert_eq!(
            hash_api_key("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
