use axum::extract::{FromRequest, FromRequestParts};

use crate::error::AppError;

/// Account and session endpoints (`/csrf`, `/auth/*`).
pub mod auth;

/// Compound registry endpoints (`/compounds/*`), plus the write helpers shared with admin.
pub mod compounds;

/// Moderation endpoints mounted under `/admin`.
pub mod admin;

/// ApiJson
///
/// `axum::Json` with its rejection mapped into `AppError`, so malformed bodies render as the
/// usual `{"error": ...}` JSON instead of axum's plain-text rejection.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// ApiPath
///
/// `axum::extract::Path` with its rejection mapped into `AppError`: an id that does not parse
/// names no resource, so it renders as a JSON 404.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct ApiPath<T>(pub T);

/// health
///
/// [Public Route] Liveness probe for load balancers and monitoring.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = String))
)]
pub async fn health() -> &'static str {
    "ok"
}
