use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Admin Router Module
///
/// Moderation endpoints, nested under `/admin`. The router is layered with
/// `admin_middleware`: unauthenticated callers get 401 and non-admins 403 before any
/// payload is parsed.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // --- Users ---
        // GET /admin/users?q=&limit=&offset=
        .route("/users", get(handlers::admin::list_users))
        // POST /admin/users/{id}/active  {"is_active": bool}
        // Refuses self-deactivation and deactivating the last active admin.
        .route("/users/{id}/active", post(handlers::admin::set_user_active))
        // POST /admin/users/{id}/admin  {"is_admin": bool}
        // Refuses demoting the last active admin.
        .route("/users/{id}/admin", post(handlers::admin::set_user_admin))
        // --- Compounds (ownership bypassed) ---
        .route("/compounds", get(handlers::admin::list_compounds))
        .route(
            "/compounds/{id}/update",
            post(handlers::admin::update_compound),
        )
        .route(
            "/compounds/{id}/delete",
            post(handlers::admin::delete_compound),
        )
}
