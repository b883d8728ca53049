//! Connection authentication gate
//!
//! Validates inbound upgrade requests against the shared API key before the
//! WebSocket is established. The check is a pure function: callers decide
//! what a rejection looks like on the wire.

/// Validate presented credentials against the configured secret.
///
/// With no secret configured the gate is open and every request passes
/// (callers log a standing warning at startup, not per connection).
/// Otherwise a request passes if the `Authorization` header carries a
/// `Bearer` token equal to the secret (scheme keyword case-insensitive,
/// token case-sensitive), or the `api_key` query parameter equals the
/// secret exactly. Either match suffices; malformed headers fail closed.
pub fn validate(
    secret: Option<&str>,
    auth_header: Option<&str>,
    api_key_param: Option<&str>,
) -> bool {
    let Some(secret) = secret else {
        return true;
    };

    if let Some(token) = auth_header.and_then(bearer_token) {
        if token == secret {
            return true;
        }
    }

    api_key_param == Some(secret)
}

/// Extract the token from a `Bearer <token>` header value.
///
/// The scheme keyword matches case-insensitively and must be followed by at
/// least one whitespace character; the remainder is the token, byte-exact
/// (no trailing trim, so `"Bearer key "` does not match secret `"key"`).
fn bearer_token(header: &str) -> Option<&str> {
    const SCHEME: &str = "bearer";

    let scheme = header.get(..SCHEME.len())?;
    if !scheme.eq_ignore_ascii_case(SCHEME) {
        return None;
    }
    let rest = &header[SCHEME.len()..];
    if !rest.starts_with(|c: char| c.is_whitespace()) {
        return None;
    }

    let token = rest.trim_start();
    if token.is_empty() {
        return None;
    }
    Some(token)
}
