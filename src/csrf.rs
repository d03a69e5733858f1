use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{
    config::AppConfig,
    cookies::{CookieSpec, cookie_value, set_cookie},
    error::AppError,
    session::generate_token,
};

/// Cookie lifetime of the CSRF token (one year).
const CSRF_COOKIE_MAX_AGE_SECS: i64 = 60 * 60 * 24 * 365;

fn is_unsafe(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Compares in constant time for equal-length inputs.
fn tokens_match(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a
            .bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

/// Returns the current CSRF token carried by the request's cookie, if any.
pub fn current_token(headers: &HeaderMap, config: &AppConfig) -> Option<String> {
    cookie_value(headers, &config.csrf_cookie_name)
}

/// Appends a CSRF cookie holding `token`. The cookie is readable by scripts so the
/// frontend can echo it back in the CSRF header.
pub fn set_csrf_cookie(response_headers: &mut HeaderMap, config: &AppConfig, token: &str) {
    set_cookie(
        response_headers,
        CookieSpec {
            name: &config.csrf_cookie_name,
            value: token,
            max_age_secs: CSRF_COOKIE_MAX_AGE_SECS,
            http_only: false,
            secure: config.session_cookie_secure,
            same_site: config.session_cookie_same_site,
        },
    );
}

/// Issues a fresh CSRF token, invalidating the one the client held.
pub fn rotate_csrf(response_headers: &mut HeaderMap, config: &AppConfig) -> String {
    let token = generate_token();
    set_csrf_cookie(response_headers, config, &token);
    token
}

/// csrf_middleware
///
/// Double-submit check: every state-changing request must echo the CSRF cookie value in
/// the CSRF header. Runs before authentication and before any body is read.
pub async fn csrf_middleware(
    State(config): State<AppConfig>,
    request: Request,
    next: Next,
) -> Response {
    if is_unsafe(request.method()) {
        let cookie = current_token(request.headers(), &config);
        let header = request
            .headers()
            .get(config.csrf_header_name.as_str())
            .and_then(|v| v.to_str().ok());

        let verified = match (cookie.as_deref(), header) {
            (Some(cookie), Some(header)) => tokens_match(cookie, header.trim()),
            _ => false,
        };
        if !verified {
            tracing::warn!(
                method = %request.method(),
                uri = %request.uri(),
                "csrf verification failed"
            );
            return AppError::Forbidden("CSRF verification failed".to_string()).into_response();
        }
    }

    next.run(request).await
}
