//! Current user endpoint.

use axum::{Extension, Json};

use crate::{middleware::auth::AuthContext, models::user::User};

/// Return the user resolved from the bearer token.
///
/// # Endpoint
///
/// `GET /api/v1/users/me`
pub async fn me(Extension(auth): Extension<AuthContext>) -> Json<User> {
    Json(auth.user)
}
