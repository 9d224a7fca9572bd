//! Bearer token authentication middleware.
//!
//! This middleware intercepts every request to:
//! 1. Extract the access token from the Authorization header
//! 2. Verify its signature and expiry against `SECRET_KEY`
//! 3. Load the token's user from `auth_user`
//! 4. Inject authentication context into the request
//! 5. Reject everything else with one generic HTTP 401
//!
//! `OPTIONS` requests are passed through untouched so CORS preflights work.

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{config::Config, error::AppError, models::user::User, state::AppState};

/// Only tokens of this type may call the API. Refresh tokens are rejected.
const ACCESS_TOKEN_TYPE: &str = "access";

/// Claims carried by tokens issued by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub token_type: String,
    pub exp: u64,
    pub iat: u64,
    pub jti: String,
    pub user_id: i64,

    #[serde(default)]
    pub iss: Option<String>,
}

/// Authentication context attached to authenticated requests.
///
/// Handlers extract it with `Extension<AuthContext>`.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
}

/// Authentication middleware function.
///
/// Every failure (no header, bad signature, expired, wrong token type,
/// unknown user, database error) produces the same 401 response. The cause
/// is only logged.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    match authenticate(&state, request.headers()).await {
        Ok(context) => {
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!("Rejected request to {}: {}", request.uri().path(), e);
            unauthorized_response(&state.config)
        }
    }
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AuthContext, AppError> {
    let token = bearer_token(headers).ok_or(AppError::Unauthorized)?;
    let claims = decode_access_token(token, &state.config.secret_key)?;
    let user = state
        .users
        .find_by_id(claims.user_id)
        .await?
        .ok_or(AppError::Unauthorized)?;

    Ok(AuthContext { user })
}

/// Token from `Authorization: Bearer <token>`. A bare token is accepted too.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();

    (!token.is_empty()).then_some(token)
}

/// Verify an HS512 access token and return its claims.
pub fn decode_access_token(token: &str, secret: &str) -> Result<Claims, AppError> {
    let mut validation = Validation::new(Algorithm::HS512);
    validation.validate_aud = false;

    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| {
        tracing::debug!("Token rejected: {}", e);
        AppError::Unauthorized
    })?
    .claims;

    if claims.token_type != ACCESS_TOKEN_TYPE {
        return Err(AppError::Unauthorized);
    }

    Ok(claims)
}

/// The 401 returned for every authentication failure.
///
/// It is built here instead of by the CORS layer so browsers can read it.
pub fn unauthorized_response(config: &Config) -> Response {
    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "detail": "Unauthorized" })),
    )
        .into_response();

    let headers = response.headers_mut();
    if let Ok(origins) = HeaderValue::from_str(&config.allowed_origins.join(",")) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origins);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );

    response
}

/// Signed token as issued by the identity provider.
#[cfg(test)]
pub(crate) fn test_token(token_type: &str, user_id: i64, expires_in: i64, secret: &str) -> String {
    use jsonwebtoken::{EncodingKey, Header, encode};

    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        token_type: token_type.to_string(),
        exp: (now + expires_in) as u64,
        iat: now as u64,
        jti: "6f1c2a".to_string(),
        user_id,
        iss: Some("identity".to_string()),
    };

    encode(
        &Header::new(Algorithm::HS512),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}
