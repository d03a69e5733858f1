use axum::http::{HeaderMap, HeaderValue, header};

use crate::config::SameSite;

/// Returns the value of cookie `name` from the request's `Cookie` headers.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
        .filter(|v| !v.is_empty())
}

/// Attributes of a `Set-Cookie` header.
#[derive(Debug, Clone)]
pub struct CookieSpec<'a> {
    pub name: &'a str,
    pub value: &'a str,
    pub max_age_secs: i64,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
}

impl CookieSpec<'_> {
    pub fn to_header_value(&self) -> Option<HeaderValue> {
        let mut cookie = format!(
            "{}={}; Path=/; Max-Age={}; SameSite={}",
            self.name,
            self.value,
            self.max_age_secs.max(0),
            self.same_site.as_str()
        );
        if self.max_age_secs <= 0 {
            cookie.push_str("; Expires=Thu, 01 Jan 1970 00:00:00 GMT");
        }
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        // Browsers drop SameSite=None cookies that are not Secure.
        if self.secure || self.same_site == SameSite::None {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).ok()
    }
}

/// Appends a `Set-Cookie` header built from `spec`.
pub fn set_cookie(headers: &mut HeaderMap, spec: CookieSpec<'_>) {
    match spec.to_header_value() {
        Some(value) => {
            headers.append(header::SET_COOKIE, value);
        }
        None => tracing::warn!(cookie = spec.name, "cookie value is not a valid header"),
    }
}
