use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::api::ApiError;

pub const ADMIN_PASSWORD_HEADER: &str = "admin-password";

/// Shared-secret check guarding destructive endpoints.
pub struct AdminAuth {
    password: String,
}

impl AdminAuth {
    /// Returns `None` for an empty secret, which would otherwise match a blank header.
    pub fn new(password: impl Into<String>) -> Option<Self> {
        let password = password.into();
        if password.is_empty() {
            return None;
        }
        Some(Self { password })
    }

    pub fn verify(&self, supplied: Option<&str>) -> bool {
        match supplied {
            Some(candidate) => bool::from(candidate.as_bytes().ct_eq(self.password.as_bytes())),
            None => false,
        }
    }
}

pub async fn require_admin(
    State(auth): State<Arc<AdminAuth>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let supplied = headers
        .get(ADMIN_PASSWORD_HEADER)
        .and_then(|h| h.to_str().ok());

    if auth.verify(supplied) {
        next.run(request).await
    } else {
        tracing::warn!(
            method = %request.method(),
            path = %request.uri().path(),
            "rejected admin request with missing or wrong credential"
        );
        ApiError::Forbidden.into_response()
    }
}
