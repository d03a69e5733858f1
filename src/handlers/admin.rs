use axum::{
    Json,
    extract::{Query, State},
};

use crate::{
    AppState,
    auth::AdminUser,
    error::{AppError, AppResult},
    forms::{CompoundForm, json_to_field, parse_bool},
    handlers::{
        ApiJson, ApiPath,
        compounds::{
            apply_compound_update, compound_response, list_compounds_page, load_compound,
            remove_compound,
        },
    },
    models::{
        AdminUserEnvelope, AdminUserView, CompoundEnvelope, CompoundQuery, CompoundResponse,
        ListParams, MessageResponse, Page, Paginated, Role, SetActiveRequest, SetAdminRequest,
        User,
    },
};

async fn load_user(state: &AppState, id: i64) -> AppResult<User> {
    state
        .repo
        .get_user(id)
        .await?
        .ok_or_else(AppError::not_found)
}

/// Reads a boolean-ish flag from a JSON payload field; a missing key is an invalid payload.
fn required_flag(value: Option<serde_json::Value>) -> AppResult<bool> {
    let value = value.ok_or_else(AppError::invalid_payload)?;
    Ok(parse_bool(Some(&json_to_field(&value)), false))
}

fn updated(user: User) -> Json<AdminUserEnvelope> {
    Json(AdminUserEnvelope {
        message: "Updated".to_string(),
        user: AdminUserView::from(user),
    })
}

/// list_users
///
/// [Admin Route] Lists accounts, staff first then by email, searchable by email or name.
#[utoipa::path(
    get,
    path = "/admin/users",
    params(ListParams),
    responses(
        (status = 200, description = "Page of users"),
        (status = 403, description = "No admin session")
    )
)]
pub async fn list_users(
    _admin: AdminUser,
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> AppResult<Json<Paginated<AdminUserView>>> {
    let page = params.page(Page::USER_DEFAULT_LIMIT);
    let users = state.repo.list_users(params.search_term(), page).await?;
    Ok(Json(users.map(AdminUserView::from)))
}

/// set_user_active
///
/// [Admin Route] Activates or deactivates an account. An admin cannot deactivate themself,
/// and the last active admin cannot be deactivated.
#[utoipa::path(
    post,
    path = "/admin/users/{id}/active",
    params(("id" = i64, Path, description = "User ID")),
    request_body = SetActiveRequest,
    responses(
        (status = 200, description = "Updated", body = AdminUserEnvelope),
        (status = 400, description = "Invalid payload or guard refusal"),
        (status = 404, description = "Unknown user")
    )
)]
pub async fn set_user_active(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    payload: Result<ApiJson<SetActiveRequest>, AppError>,
) -> AppResult<Json<AdminUserEnvelope>> {
    let target = load_user(&state, id).await?;
    let ApiJson(payload) = payload.map_err(|_| AppError::invalid_payload())?;
    let is_active = required_flag(payload.is_active)?;

    if !is_active {
        if target.id == admin.user.id {
            return Err(AppError::validation("You cannot deactivate your own account."));
        }
        if target.is_admin() && state.repo.count_other_active_admins(target.id).await? == 0 {
            tracing::warn!(target_id = target.id, "refused to deactivate the last admin");
            return Err(AppError::validation(
                "Cannot deactivate the last active administrator.",
            ));
        }
    }

    let user = state.repo.set_user_active(target.id, is_active).await?;
    tracing::info!(
        admin_id = admin.user.id,
        target_id = user.id,
        is_active,
        "account activation changed"
    );
    Ok(updated(user))
}

/// set_user_admin
///
/// [Admin Route] Promotes (staff + `admin` role) or demotes an account. Demotion is refused
/// when no other active admin would remain.
#[utoipa::path(
    post,
    path = "/admin/users/{id}/admin",
    params(("id" = i64, Path, description = "User ID")),
    request_body = SetAdminRequest,
    responses(
        (status = 200, description = "Updated", body = AdminUserEnvelope),
        (status = 400, description = "Invalid payload or guard refusal"),
        (status = 404, description = "Unknown user")
    )
)]
pub async fn set_user_admin(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    payload: Result<ApiJson<SetAdminRequest>, AppError>,
) -> AppResult<Json<AdminUserEnvelope>> {
    let target = load_user(&state, id).await?;
    let ApiJson(payload) = payload.map_err(|_| AppError::invalid_payload())?;
    let make_admin = required_flag(payload.is_admin)?;

    let user = if make_admin {
        state
            .repo
            .set_user_admin(target.id, true, Role::Admin)
            .await?
    } else {
        if state.repo.count_other_active_admins(target.id).await? == 0 {
            tracing::warn!(target_id = target.id, "refused to demote the last admin");
            return Err(AppError::validation("Cannot demote the last administrator."));
        }
        let role = match target.role {
            Role::Admin => Role::Connected,
            other => other,
        };
        state.repo.set_user_admin(target.id, false, role).await?
    };

    tracing::info!(
        admin_id = admin.user.id,
        target_id = user.id,
        is_admin = make_admin,
        "admin rights changed"
    );
    Ok(updated(user))
}

/// list_compounds
///
/// [Admin Route] Lists every compound.
#[utoipa::path(
    get,
    path = "/admin/compounds",
    params(ListParams),
    responses(
        (status = 200, description = "Page of compounds"),
        (status = 403, description = "Not an admin")
    )
)]
pub async fn list_compounds(
    _admin: AdminUser,
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> AppResult<Json<Paginated<CompoundResponse>>> {
    let page = list_compounds_page(&state, CompoundQuery::all(), &params).await?;
    Ok(Json(page))
}

/// update_compound
///
/// [Admin Route] Same partial update as the owner endpoint, without the ownership check.
#[utoipa::path(
    post,
    path = "/admin/compounds/{id}/update",
    params(("id" = i64, Path, description = "Compound ID")),
    request_body(content = serde_json::Value, description = "Fields to change (JSON or multipart/form-data)"),
    responses(
        (status = 200, description = "Updated", body = CompoundEnvelope),
        (status = 403, description = "Not an admin"),
        (status = 404, description = "Not found")
    )
)]
pub async fn update_compound(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    form: Result<CompoundForm, AppError>,
) -> AppResult<Json<CompoundEnvelope>> {
    let compound = load_compound(&state, id).await?;
    let saved = apply_compound_update(&state, compound, form?).await?;
    tracing::info!(admin_id = admin.user.id, compound_id = id, "compound moderated");

    Ok(Json(CompoundEnvelope {
        message: Some("Updated".to_string()),
        compound: compound_response(&state.storage, saved),
    }))
}

/// delete_compound
///
/// [Admin Route] Deletes any compound and releases its file.
#[utoipa::path(
    post,
    path = "/admin/compounds/{id}/delete",
    params(("id" = i64, Path, description = "Compound ID")),
    responses(
        (status = 200, description = "Deleted", body = MessageResponse),
        (status = 403, description = "Not an admin"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_compound(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> AppResult<Json<MessageResponse>> {
    let compound = load_compound(&state, id).await?;
    remove_compound(&state, compound).await?;
    tracing::info!(admin_id = admin.user.id, compound_id = id, "compound removed by admin");
    Ok(Json(MessageResponse::new("Deleted")))
}
