//! Credential checks shared by the HTTP middleware and the upgrade path.
//!
//! A request must carry valid HTTP Basic credentials *and* the static
//! `X-APP-TOKEN`. The check is a pure function of the headers so the raw
//! upgrade handler can run it without going through axum.

use axum::http::{header, HeaderMap, StatusCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::config::AuthConfig;

/// Header carrying the static application token.
pub const APP_TOKEN_HEADER: &str = "x-app-token";

/// Realm advertised in `WWW-Authenticate` challenges.
pub const REALM: &str = "TunnelPanda";

/// Outcome of a credential check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Allow,
    Deny {
        status: StatusCode,
        reason: &'static str,
    },
}

impl AuthDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthDecision::Allow)
    }

    /// Whether the response should carry a Basic challenge.
    pub fn wants_challenge(&self) -> bool {
        matches!(self, AuthDecision::Deny { status, .. } if *status == StatusCode::UNAUTHORIZED)
    }
}

/// Check Basic credentials and the app token against `config`.
pub fn check_credentials(headers: &HeaderMap, config: &AuthConfig) -> AuthDecision {
    let basic_ok = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_basic)
        .map(|(user, pass)| {
            constant_time_eq(user.as_bytes(), config.user.as_bytes())
                && constant_time_eq(pass.as_bytes(), config.pass.as_bytes())
        })
        .unwrap_or(false);

    if !basic_ok {
        return AuthDecision::Deny {
            status: StatusCode::UNAUTHORIZED,
            reason: "Authentication required.",
        };
    }

    let token_ok = headers
        .get(APP_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|token| !token.is_empty() && constant_time_eq(token.as_bytes(), config.app_token.as_bytes()))
        .unwrap_or(false);

    if !token_ok {
        return AuthDecision::Deny {
            status: StatusCode::FORBIDDEN,
            reason: "Invalid or missing X-APP-TOKEN",
        };
    }

    AuthDecision::Allow
}

/// Decode an `Authorization: Basic ...` value into user and password.
pub fn parse_basic(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Build an `Authorization` header value for the given credentials.
pub fn basic_header_value(user: &str, pass: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", user, pass)))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
