use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use crate::{
    AppState,
    auth::{
        CurrentUser, MaybeUser, clear_session_cookie, discard_request_session,
        refresh_session_auth_hash, start_session,
    },
    config::AppConfig,
    csrf,
    error::{AppError, AppResult},
    handlers::ApiJson,
    models::{
        ChangePasswordRequest, CsrfResponse, LoginRequest, MeResponse, MessageResponse, NewUser,
        RegisterRequest, Role, UpdateProfileRequest, UserEnvelope, UserSummary,
    },
    password::{MIN_PASSWORD_LEN, hash_password, verify_password},
};

fn trimmed(value: Option<String>) -> String {
    value.map(|v| v.trim().to_string()).unwrap_or_default()
}

fn normalize_email(value: Option<String>) -> String {
    trimmed(value).to_lowercase()
}

/// csrf_token
///
/// [Public Route] Bootstraps the CSRF cookie. An existing token is kept; otherwise a new one
/// is issued. The value is also returned in the body for clients that cannot read cookies.
#[utoipa::path(
    get,
    path = "/csrf",
    responses((status = 200, description = "CSRF token issued", body = CsrfResponse))
)]
pub async fn csrf_token(
    State(config): State<AppConfig>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let mut response_headers = HeaderMap::new();
    let token = match csrf::current_token(&headers, &config) {
        Some(token) => {
            csrf::set_csrf_cookie(&mut response_headers, &config, &token);
            token
        }
        None => csrf::rotate_csrf(&mut response_headers, &config),
    };
    (response_headers, Json(CsrfResponse { csrf_token: token }))
}

/// register
///
/// [Public Route] Creates a `guest` account. The caller must log in afterwards.
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = MessageResponse),
        (status = 400, description = "Missing field or email already registered")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> AppResult<impl IntoResponse> {
    let full_name = trimmed(payload.full_name);
    let email = normalize_email(payload.email);
    let password = payload.password.unwrap_or_default();

    if full_name.is_empty() || email.is_empty() || password.trim().is_empty() {
        return Err(AppError::validation("All fields are required"));
    }
    if state.repo.find_user_by_email(&email).await?.is_some() {
        return Err(AppError::Conflict("Email already exists".to_string()));
    }

    let user = state
        .repo
        .create_user(NewUser {
            email,
            full_name,
            password_hash: hash_password(&password)?,
            role: Role::Guest,
            is_staff: false,
            is_active: true,
        })
        .await?;
    tracing::info!(user_id = user.id, "account registered");

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new(
            "Account created successfully. Please log in.",
        )),
    ))
}

/// login
///
/// [Public Route] Verifies the credentials and opens a new session. Any session carried by
/// the request is discarded first, and the CSRF token is rotated. A `guest` logging in for
/// the first time becomes `connected`.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = UserEnvelope),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    let email = normalize_email(payload.email);
    let password = payload.password.unwrap_or_default();
    let invalid = || AppError::Auth("Invalid credentials".to_string());

    let user = state
        .repo
        .find_user_by_email(&email)
        .await?
        .ok_or_else(invalid)?;
    if !user.is_active || !verify_password(&password, &user.password_hash) {
        tracing::warn!(user_id = user.id, "login refused");
        return Err(invalid());
    }

    let role = match user.role {
        Role::Guest => Role::Connected,
        other => other,
    };
    let user = state.repo.record_login(user.id, role).await?;

    let mut response_headers = HeaderMap::new();
    discard_request_session(&state.sessions, &state.config, &headers).await?;
    start_session(&state.sessions, &state.config, &user, &mut response_headers).await?;
    csrf::rotate_csrf(&mut response_headers, &state.config);
    tracing::info!(user_id = user.id, role = user.role.as_str(), "user logged in");

    Ok((
        response_headers,
        Json(UserEnvelope {
            message: "Login successful".to_string(),
            user: UserSummary::from(&user),
        }),
    ))
}

/// logout
///
/// [Public Route] Ends the current session if there is one. Always succeeds.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 200, description = "Logged out", body = MessageResponse))
)]
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    discard_request_session(&state.sessions, &state.config, &headers).await?;

    let mut response_headers = HeaderMap::new();
    clear_session_cookie(&state.config, &mut response_headers);
    csrf::rotate_csrf(&mut response_headers, &state.config);

    Ok((
        response_headers,
        Json(MessageResponse::new("Logout successful")),
    ))
}

/// me
///
/// [Public Route] Reports whether the caller holds a valid session.
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Authenticated", body = MeResponse),
        (status = 401, description = "Anonymous", body = MeResponse)
    )
)]
pub async fn me(MaybeUser(current): MaybeUser) -> Response {
    match current {
        Some(current) => Json(MeResponse {
            authenticated: true,
            user: Some(UserSummary::from(&current.user)),
        })
        .into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(MeResponse {
                authenticated: false,
                user: None,
            }),
        )
            .into_response(),
    }
}

/// update_profile
///
/// [Authenticated Route] Renames the caller and optionally changes their email.
#[utoipa::path(
    post,
    path = "/auth/profile",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = UserEnvelope),
        (status = 400, description = "Missing name or email already in use")
    )
)]
pub async fn update_profile(
    CurrentUser { user, .. }: CurrentUser,
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<UpdateProfileRequest>,
) -> AppResult<Json<UserEnvelope>> {
    let full_name = trimmed(payload.full_name);
    let email = normalize_email(payload.email);

    if full_name.is_empty() {
        return Err(AppError::validation("Full name is required"));
    }

    let new_email = if !email.is_empty() && email != user.email {
        if state.repo.email_in_use(&email, Some(user.id)).await? {
            return Err(AppError::Conflict("Email already in use".to_string()));
        }
        Some(email.as_str())
    } else {
        None
    };

    let updated = state
        .repo
        .update_profile(user.id, &full_name, new_email)
        .await?;

    Ok(Json(UserEnvelope {
        message: "Profile updated".to_string(),
        user: UserSummary::from(&updated),
    }))
}

/// change_password
///
/// [Authenticated Route] Replaces the caller's password. The current session is re-bound to
/// the new password hash and stays valid; the user's other sessions stop authenticating.
#[utoipa::path(
    post,
    path = "/auth/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 400, description = "New password too short"),
        (status = 401, description = "Current password is incorrect")
    )
)]
pub async fn change_password(
    CurrentUser { user, token_hash }: CurrentUser,
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<ChangePasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    let current_password = payload.current_password.unwrap_or_default();
    let new_password = payload.new_password.unwrap_or_default();

    if new_password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "New password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if !verify_password(&current_password, &user.password_hash) {
        return Err(AppError::Auth("Current password is incorrect".to_string()));
    }

    let updated = state
        .repo
        .set_password_hash(user.id, &hash_password(&new_password)?)
        .await?;
    refresh_session_auth_hash(&state.sessions, &state.config, &token_hash, &updated).await?;
    tracing::info!(user_id = user.id, "password changed");

    Ok(Json(MessageResponse::new("Password updated")))
}
