use axum::http::{header::AUTHORIZATION, HeaderMap};

use super::{AuthError, JwtCredentialVerifier, Principal};

/// Token lookup for a WebSocket upgrade.
///
/// Browsers cannot attach headers to a WebSocket handshake, so the `token`
/// query parameter comes first. Non-browser clients may send a regular
/// `Authorization: Bearer` header instead.
pub fn extract_token<'a>(
    query_token: Option<&'a str>,
    headers: &'a HeaderMap,
) -> Result<&'a str, AuthError> {
    if let Some(token) = query_token.map(str::trim).filter(|token| !token.is_empty()) {
        return Ok(token);
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
        .ok_or(AuthError::MissingToken)
}

/// Extract and verify in one step.
pub fn authenticate(
    verifier: &JwtCredentialVerifier,
    query_token: Option<&str>,
    headers: &HeaderMap,
) -> Result<Principal, AuthError> {
    let token = extract_token(query_token, headers)?;
    verifier.verify(token)
}

fn extract_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    Some(token)
}
