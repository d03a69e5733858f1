use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    AppState,
    auth::{CurrentUser, MaybeUser},
    error::{AppError, AppResult},
    forms::{CompoundForm, UploadedFile},
    handlers::ApiPath,
    models::{
        Compound, CompoundEnvelope, CompoundQuery, CompoundResponse, ListParams, MessageResponse,
        Page, Paginated,
    },
    storage::{StorageState, structure_file_key},
};

// --- Shared helpers (also used by the admin handlers) ---

/// Serializes a compound, resolving its storage key to an absolute URL.
pub fn compound_response(storage: &StorageState, compound: Compound) -> CompoundResponse {
    let url = compound
        .structure_file
        .as_deref()
        .map(|key| storage.public_url(key));
    CompoundResponse::new(compound, url)
}

/// Stores an uploaded structure file under a fresh key and returns that key.
async fn store_upload(storage: &StorageState, file: &UploadedFile) -> AppResult<String> {
    let key = structure_file_key(&file.file_name);
    storage
        .put_object(&key, &file.content_type, file.bytes.to_vec())
        .await?;
    Ok(key)
}

/// Releases a stored object. A failure is logged and leaves an orphan object behind.
async fn release_object(storage: &StorageState, key: &str) {
    if let Err(e) = storage.delete_object(key).await {
        tracing::warn!(error = %e, key, "failed to release structure file");
    }
}

pub async fn list_compounds_page(
    state: &AppState,
    query: CompoundQuery,
    params: &ListParams,
) -> AppResult<Paginated<CompoundResponse>> {
    let page = params.page(Page::COMPOUND_DEFAULT_LIMIT);
    let compounds = state
        .repo
        .list_compounds(&query.search(params.search_term()), page)
        .await?;
    Ok(compounds.map(|c| compound_response(&state.storage, c)))
}

/// apply_compound_update
///
/// Applies `form` to `compound` and persists it. A new file replaces the old one; otherwise a
/// truthy `remove_structure_file` detaches it. The replaced object is only released once the
/// row is saved, and a freshly uploaded object is released again if the save fails.
pub async fn apply_compound_update(
    state: &AppState,
    compound: Compound,
    form: CompoundForm,
) -> AppResult<Compound> {
    let mut updated = compound.clone();
    form.apply_to(&mut updated)?;

    let mut uploaded = None;
    let mut released = None;
    if let Some(file) = &form.structure_file {
        let key = store_upload(&state.storage, file).await?;
        updated.structure_file = Some(key.clone());
        uploaded = Some(key);
        released = compound.structure_file;
    } else if form.wants_file_removal() && compound.structure_file.is_some() {
        updated.structure_file = None;
        released = compound.structure_file;
    }

    let saved = match state.repo.update_compound(&updated).await {
        Ok(saved) => saved,
        Err(e) => {
            if let Some(key) = uploaded {
                release_object(&state.storage, &key).await;
            }
            return Err(e);
        }
    };

    if let Some(key) = released {
        release_object(&state.storage, &key).await;
    }
    Ok(saved)
}

/// Releases the attached file, then deletes the record.
pub async fn remove_compound(state: &AppState, compound: Compound) -> AppResult<()> {
    if let Some(key) = &compound.structure_file {
        release_object(&state.storage, key).await;
    }
    if !state.repo.delete_compound(compound.id).await? {
        return Err(AppError::not_found());
    }
    Ok(())
}

pub(crate) async fn load_compound(state: &AppState, id: i64) -> AppResult<Compound> {
    state
        .repo
        .get_compound(id)
        .await?
        .ok_or_else(AppError::not_found)
}

/// Owner-only guard for the non-admin write endpoints.
fn ensure_owner(current: &CurrentUser, compound: &Compound) -> AppResult<()> {
    if compound.owner_id != current.user.id {
        tracing::warn!(
            user_id = current.user.id,
            compound_id = compound.id,
            "write refused: not the owner"
        );
        return Err(AppError::forbidden());
    }
    Ok(())
}

// --- Handlers ---

/// list_public_compounds
///
/// [Public Route] Lists public compounds, name-ordered, with `?q=&limit=&offset=`.
#[utoipa::path(
    get,
    path = "/compounds/public",
    params(ListParams),
    responses((status = 200, description = "Page of public compounds"))
)]
pub async fn list_public_compounds(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> AppResult<Json<Paginated<CompoundResponse>>> {
    let page = list_compounds_page(&state, CompoundQuery::public(), &params).await?;
    Ok(Json(page))
}

/// list_all_compounds
///
/// [Authenticated Route] Lists every compound, public or not, regardless of owner.
#[utoipa::path(
    get,
    path = "/compounds/private",
    params(ListParams),
    responses(
        (status = 200, description = "Page of compounds"),
        (status = 401, description = "Not logged in")
    )
)]
pub async fn list_all_compounds(
    _current: CurrentUser,
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> AppResult<Json<Paginated<CompoundResponse>>> {
    let page = list_compounds_page(&state, CompoundQuery::all(), &params).await?;
    Ok(Json(page))
}

/// get_compound
///
/// [Public Route] Compound detail. Private compounds are hidden (404) from anonymous callers.
#[utoipa::path(
    get,
    path = "/compounds/{id}",
    params(("id" = i64, Path, description = "Compound ID")),
    responses(
        (status = 200, description = "Found", body = CompoundEnvelope),
        (status = 404, description = "Missing, or private and caller anonymous")
    )
)]
pub async fn get_compound(
    MaybeUser(current): MaybeUser,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> AppResult<Json<CompoundEnvelope>> {
    let compound = load_compound(&state, id).await?;
    if current.is_none() && !compound.is_public {
        return Err(AppError::not_found());
    }

    Ok(Json(CompoundEnvelope {
        message: None,
        compound: compound_response(&state.storage, compound),
    }))
}

/// create_compound
///
/// [Authenticated Route] Creates a compound owned by the caller. Accepts JSON or
/// `multipart/form-data` with an optional `structure_file` part.
#[utoipa::path(
    post,
    path = "/compounds",
    request_body(content = serde_json::Value, description = "Compound fields (JSON or multipart/form-data)"),
    responses(
        (status = 201, description = "Created", body = CompoundEnvelope),
        (status = 400, description = "Validation failed")
    )
)]
pub async fn create_compound(
    CurrentUser { user, .. }: CurrentUser,
    State(state): State<AppState>,
    form: CompoundForm,
) -> AppResult<impl IntoResponse> {
    let draft = form.validate_new()?;

    let structure_file = match &form.structure_file {
        Some(file) => Some(store_upload(&state.storage, file).await?),
        None => None,
    };

    let created = match state
        .repo
        .create_compound(draft.into_new(user.id, structure_file.clone()))
        .await
    {
        Ok(created) => created,
        Err(e) => {
            if let Some(key) = &structure_file {
                release_object(&state.storage, key).await;
            }
            return Err(e);
        }
    };
    tracing::info!(compound_id = created.id, owner_id = user.id, "compound created");

    Ok((
        StatusCode::CREATED,
        Json(CompoundEnvelope {
            message: Some("Created".to_string()),
            compound: compound_response(&state.storage, created),
        }),
    ))
}

/// update_compound
///
/// [Authenticated Route] Partial update by the owner. Absent fields are left untouched.
/// Ownership is checked before the body is parsed.
#[utoipa::path(
    post,
    path = "/compounds/{id}/update",
    params(("id" = i64, Path, description = "Compound ID")),
    request_body(content = serde_json::Value, description = "Fields to change (JSON or multipart/form-data)"),
    responses(
        (status = 200, description = "Updated", body = CompoundEnvelope),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Not found")
    )
)]
pub async fn update_compound(
    current: CurrentUser,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    form: Result<CompoundForm, AppError>,
) -> AppResult<Json<CompoundEnvelope>> {
    let compound = load_compound(&state, id).await?;
    ensure_owner(&current, &compound)?;

    let saved = apply_compound_update(&state, compound, form?).await?;
    Ok(Json(CompoundEnvelope {
        message: Some("Updated".to_string()),
        compound: compound_response(&state.storage, saved),
    }))
}

/// delete_compound
///
/// [Authenticated Route] Deletes the caller's compound and releases its file.
#[utoipa::path(
    post,
    path = "/compounds/{id}/delete",
    params(("id" = i64, Path, description = "Compound ID")),
    responses(
        (status = 200, description = "Deleted", body = MessageResponse),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Not found")
    )
)]
pub async fn delete_compound(
    current: CurrentUser,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> AppResult<Json<MessageResponse>> {
    let compound = load_compound(&state, id).await?;
    ensure_owner(&current, &compound)?;

    remove_compound(&state, compound).await?;
    tracing::info!(compound_id = id, user_id = current.user.id, "compound deleted");
    Ok(Json(MessageResponse::new("Deleted")))
}
