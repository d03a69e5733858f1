use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, request::Parts},
};

use crate::{
    config::AppConfig,
    cookies::{CookieSpec, cookie_value, set_cookie},
    error::{AppError, AppResult},
    models::User,
    repository::RepositoryState,
    session::{
        Session, SessionState, generate_token, hash_token, session_auth_hash, verify_auth_hash,
    },
};

/// CurrentUser
///
/// The resolved identity of an authenticated request: the user row as it is now, plus the
/// hash of the session token that authenticated it (needed to rotate or drop the session).
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub token_hash: String,
}

/// resolve_session
///
/// Looks up the session named by the request's session cookie. A session only
/// authenticates when it has not expired, its user still exists and is active, and its
/// auth hash still matches the user's current password hash.
///
/// Returns `Ok(None)` for every "not logged in" outcome; only store failures are errors.
pub async fn resolve_session(
    headers: &HeaderMap,
    repo: &RepositoryState,
    sessions: &SessionState,
    config: &AppConfig,
) -> AppResult<Option<CurrentUser>> {
    let Some(token) = cookie_value(headers, &config.session_cookie_name) else {
        return Ok(None);
    };
    let token_hash = hash_token(&token);

    let Some(session) = sessions.get(&token_hash).await? else {
        return Ok(None);
    };
    if session.is_expired() {
        sessions.delete(&token_hash).await?;
        return Ok(None);
    }

    let Some(user) = repo.get_user(session.user_id).await? else {
        return Ok(None);
    };
    if !user.is_active {
        return Ok(None);
    }
    if !verify_auth_hash(&config.session_secret, &user.password_hash, &session.auth_hash) {
        tracing::debug!(user_id = user.id, "session invalidated by password change");
        return Ok(None);
    }

    Ok(Some(CurrentUser { user, token_hash }))
}

/// CurrentUser Extractor Implementation
///
/// Makes `CurrentUser` usable as a handler argument. Dependencies (repository, session store,
/// config) are pulled from the application state through `FromRef`.
///
/// Rejection: `AppError::Auth` (401) when no valid session is attached.
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    SessionState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let sessions = SessionState::from_ref(state);
        let config = AppConfig::from_ref(state);

        resolve_session(&parts.headers, &repo, &sessions, &config)
            .await?
            .ok_or_else(AppError::unauthenticated)
    }
}

/// MaybeUser
///
/// Optional identity for endpoints that serve both anonymous and logged-in callers.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<CurrentUser>);

impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    SessionState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let sessions = SessionState::from_ref(state);
        let config = AppConfig::from_ref(state);

        let current = resolve_session(&parts.headers, &repo, &sessions, &config).await?;
        Ok(MaybeUser(current))
    }
}

/// AdminUser
///
/// An authenticated caller holding admin rights (`is_staff` or role `admin`).
///
/// Rejection: 403 for any caller without admin rights, anonymous callers included.
#[derive(Debug, Clone)]
pub struct AdminUser(pub CurrentUser);

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    SessionState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let sessions = SessionState::from_ref(state);
        let config = AppConfig::from_ref(state);

        let Some(current) = resolve_session(&parts.headers, &repo, &sessions, &config).await?
        else {
            tracing::warn!("admin access refused: no session");
            return Err(AppError::forbidden());
        };
        if !current.user.is_admin() {
            tracing::warn!(user_id = current.user.id, "admin access refused");
            return Err(AppError::forbidden());
        }
        Ok(AdminUser(current))
    }
}

/// start_session
///
/// Issues a fresh session for `user`, bound to its current password hash, and appends the
/// session cookie to `response_headers`.
pub async fn start_session(
    sessions: &SessionState,
    config: &AppConfig,
    user: &User,
    response_headers: &mut HeaderMap,
) -> AppResult<()> {
    let token = generate_token();
    let auth_hash = session_auth_hash(&config.session_secret, &user.password_hash);
    sessions
        .create(Session::new(&token, user.id, auth_hash, config.session_ttl_secs))
        .await?;

    set_cookie(
        response_headers,
        CookieSpec {
            name: &config.session_cookie_name,
            value: &token,
            max_age_secs: config.session_ttl_secs,
            http_only: true,
            secure: config.session_cookie_secure,
            same_site: config.session_cookie_same_site,
        },
    );
    Ok(())
}

/// Drops the server-side session named by the request's cookie, if any.
pub async fn discard_request_session(
    sessions: &SessionState,
    config: &AppConfig,
    request_headers: &HeaderMap,
) -> AppResult<()> {
    if let Some(token) = cookie_value(request_headers, &config.session_cookie_name) {
        sessions.delete(&hash_token(&token)).await?;
    }
    Ok(())
}

/// Appends an expired session cookie so the browser forgets it.
pub fn clear_session_cookie(config: &AppConfig, response_headers: &mut HeaderMap) {
    set_cookie(
        response_headers,
        CookieSpec {
            name: &config.session_cookie_name,
            value: "",
            max_age_secs: 0,
            http_only: true,
            secure: config.session_cookie_secure,
            same_site: config.session_cookie_same_site,
        },
    );
}

/// Re-binds the caller's session to `user`'s (new) password hash so it survives a
/// password change while every other session of the user stops authenticating.
pub async fn refresh_session_auth_hash(
    sessions: &SessionState,
    config: &AppConfig,
    token_hash: &str,
    user: &User,
) -> AppResult<()> {
    let auth_hash = session_auth_hash(&config.session_secret, &user.password_hash);
    sessions.update_auth_hash(token_hash, &auth_hash).await
}
