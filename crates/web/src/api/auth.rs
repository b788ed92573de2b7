//! Admin authentication middleware.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::api::status::AppError;
use crate::AppState;

/// Actor recorded in the audit log for admin requests. Inserted by
/// [`require_admin`]; handlers never read identity from the request body.
#[derive(Debug, Clone)]
pub struct AdminIdentity(pub String);

impl AdminIdentity {
    pub fn actor(&self) -> &str {
        &self.0
    }
}

/// Require `Authorization: Bearer <admin token>` on admin routes.
///
/// With no admin token configured every request passes as `anonymous`.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = match state.admin_token.as_deref() {
        None => AdminIdentity("anonymous".into()),
        Some(expected) => {
            let token = req
                .headers()
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|h| h.strip_prefix("Bearer "))
                .ok_or_else(|| {
                    AppError::Unauthorized("missing or invalid Authorization header".into())
                })?;

            if !bool::from(token.as_bytes().ct_eq(expected.as_bytes())) {
                warn!(path = %req.uri().path(), "rejected admin request with bad token");
                return Err(AppError::Unauthorized("invalid admin token".into()));
            }
            AdminIdentity("admin".into())
        }
    };

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
