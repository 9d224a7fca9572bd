//! API check endpoint.

/// API check handler.
///
/// Authenticated like every other route. Beyond the token check it touches
/// no dependency.
///
/// # Response (200 OK)
///
/// ```text
/// Success!
/// ```
pub async fn api_check() -> &'static str {
    "Success!"
}
