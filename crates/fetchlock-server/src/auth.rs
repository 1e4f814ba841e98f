//! HTTP Basic credentials.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use fetchlock_core::app::Credentials;
use fetchlock_core::domain::AuthError;

/// Reads `Authorization: Basic <base64(user:password)>`.
pub fn basic_credentials(headers: &HeaderMap) -> Result<Credentials, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingCredentials)?
        .to_str()
        .map_err(|_| AuthError::MalformedCredentials("header is not ASCII".to_string()))?;

    let encoded = value
        .strip_prefix("Basic ")
        .ok_or_else(|| AuthError::MalformedCredentials("scheme is not Basic".to_string()))?;

    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|e| AuthError::MalformedCredentials(format!("invalid base64: {e}")))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| AuthError::MalformedCredentials("credentials are not UTF-8".to_string()))?;

    let (user_id, password) = decoded
        .split_once(':')
        .ok_or_else(|| AuthError::MalformedCredentials("missing ':' separator".to_string()))?;
    Ok(Credentials::new(user_id, password))
}
