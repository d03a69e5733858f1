use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Authenticated Router Module
///
/// Routes for any logged-in user. The router is layered with `auth_middleware`, so
/// anonymous requests are answered with 401 before the body is read. Owner-only writes
/// are checked inside the compound handlers.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // --- Account ---
        .route("/auth/profile", post(handlers::auth::update_profile))
        // POST /auth/password
        // Keeps the current session alive and invalidates the user's other sessions.
        .route("/auth/password", post(handlers::auth::change_password))
        // --- Compounds ---
        // GET /compounds/private
        // Every compound, public or not, for any logged-in user.
        .route(
            "/compounds/private",
            get(handlers::compounds::list_all_compounds),
        )
        // POST /compounds (JSON or multipart with a `structure_file` part)
        .route("/compounds", post(handlers::compounds::create_compound))
        .route(
            "/compounds/{id}/update",
            post(handlers::compounds::update_compound),
        )
        .route(
            "/compounds/{id}/delete",
            post(handlers::compounds::delete_compound),
        )
}
