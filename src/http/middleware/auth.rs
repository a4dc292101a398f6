//! Credential check for plain HTTP requests.

use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::AuthConfig;
use crate::security::auth::{check_credentials, AuthDecision, REALM};

pub async fn auth_middleware(
    State(auth): State<Arc<ArcSwap<AuthConfig>>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let decision = check_credentials(request.headers(), &auth.load());
    match decision {
        AuthDecision::Allow => next.run(request).await,
        AuthDecision::Deny { status, reason } => {
            tracing::warn!(
                path = %request.uri().path(),
                status = status.as_u16(),
                reason,
                "Request denied"
            );
            if decision.wants_challenge() {
                let challenge = format!("Basic realm=\"{}\"", REALM);
                (status, [(header::WWW_AUTHENTICATE, challenge)], reason).into_response()
            } else {
                (status, reason).into_response()
            }
        }
    }
}
