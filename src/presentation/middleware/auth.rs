//! Authentication Middleware
//!
//! JWT validation for protected routes and the WebSocket upgrade.

use std::time::Duration;

use axum::{
    extract::{FromRequestParts, Query, Request},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::shared::error::AppError;
use crate::startup::AppState;

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at time (Unix timestamp)
    #[serde(default)]
    pub iat: i64,
}

/// Authenticated user extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Validate `token` and return the user it was issued to.
pub fn verify_token(secret: &str, token: &str) -> Result<AuthUser, AppError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            AppError::Unauthorized("Token expired".into())
        }
        _ => AppError::Unauthorized("Invalid token".into()),
    })?;

    if token_data.claims.sub.is_empty() {
        return Err(AppError::Unauthorized("Invalid token claims".into()));
    }

    Ok(AuthUser {
        user_id: token_data.claims.sub,
    })
}

/// Sign a token for `user_id` valid for `ttl`.
pub fn issue_token(secret: &str, user_id: &str, ttl: Duration) -> Result<String, AppError> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: now + ttl.as_secs() as i64,
        iat: now,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("token signing failed: {}", e)))
}

/// Authentication middleware that validates JWT tokens
///
/// Rejects with 401 before the handler runs; handlers behind it can take
/// [`AuthUser`] without verifying again.
pub async fn auth_middleware(user: AuthUser, mut request: Request, next: Next) -> Response {
    // Insert authenticated user into request extensions
    request.extensions_mut().insert(user);

    next.run(request).await
}

/// Extracts the caller from a prior `auth_middleware`, the `Authorization`
/// header, or a `token` query parameter (browsers cannot set headers on a
/// WebSocket upgrade).
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let secret = &state.settings.jwt.secret;

        if let Ok(TypedHeader(Authorization(bearer))) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state).await
        {
            return verify_token(secret, bearer.token());
        }

        match Query::<TokenQuery>::try_from_uri(&parts.uri) {
            Ok(Query(TokenQuery { token: Some(token) })) => verify_token(secret, &token),
            _ => Err(AppError::Unauthorized("Missing authorization token".into())),
        }
    }
}
