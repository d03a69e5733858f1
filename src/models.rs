use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;

// --- Core Application Schemas (Mapped to Database) ---

/// Role
///
/// Coarse authorization tier. Stored as lower-case text in `users.role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    #[default]
    Guest,
    Connected,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::Connected => "connected",
            Role::Admin => "admin",
        }
    }
}

/// Raised when the `role` column holds a value outside the known tiers.
#[derive(Debug, thiserror::Error)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(pub String);

impl TryFrom<String> for Role {
    type Error = UnknownRole;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "guest" => Ok(Role::Guest),
            "connected" => Ok(Role::Connected),
            "admin" => Ok(Role::Admin),
            _ => Err(UnknownRole(value)),
        }
    }
}

/// User
///
/// Canonical account record from the `users` table. The password hash never leaves the
/// server: responses are built from `UserSummary` or `AdminUserView`.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    // Login key, stored lower-cased.
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub is_active: bool,
    // Historical admin flag, grants the same rights as `Role::Admin`.
    pub is_staff: bool,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    /// Staff users and `admin` role holders both pass admin checks.
    pub fn is_admin(&self) -> bool {
        self.is_staff || self.role == Role::Admin
    }
}

/// Insert payload for the `users` table.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub role: Role,
    pub is_staff: bool,
    pub is_active: bool,
}

/// Compound
///
/// A chemical compound record from the `compounds` table, joined with the owner's email.
#[derive(Debug, Clone, FromRow, Default)]
pub struct Compound {
    pub id: i64,
    pub name: String,
    pub formula: String,
    // Opaque SMILES notation, never parsed.
    pub smiles: String,
    pub molecular_weight: Option<f64>,
    // Storage key of the attached structure file.
    pub structure_file: Option<String>,
    pub description: String,
    pub is_public: bool,
    // Set at creation, never reassigned.
    pub owner_id: i64,
    // Loaded via a JOIN on `users`.
    #[sqlx(default)]
    pub owner_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for the `compounds` table.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCompound {
    pub name: String,
    pub formula: String,
    pub smiles: String,
    pub molecular_weight: Option<f64>,
    pub description: String,
    pub is_public: bool,
    pub structure_file: Option<String>,
    pub owner_id: i64,
}

// --- Query Types ---

/// Offset/limit window, already clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub const MAX_LIMIT: i64 = 100;
    pub const COMPOUND_DEFAULT_LIMIT: i64 = 20;
    pub const USER_DEFAULT_LIMIT: i64 = 50;

    /// Clamps `limit` to `[1, 100]` and `offset` to `>= 0`.
    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit: limit.clamp(1, Self::MAX_LIMIT),
            offset: offset.max(0),
        }
    }
}

/// Typed filter for compound listings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompoundQuery {
    pub public_only: bool,
    // Case-insensitive substring over name, formula, smiles and description.
    pub search: Option<String>,
}

impl CompoundQuery {
    pub fn public() -> Self {
        Self {
            public_only: true,
            search: None,
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    /// Blank terms are ignored.
    pub fn search(mut self, term: Option<&str>) -> Self {
        self.search = term
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        self
    }
}

/// A page of results plus the total count of the filtered set.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct Paginated<T> {
    pub total: i64,
    pub offset: i64,
    pub limit: i64,
    pub results: Vec<T>,
}

impl<T> Paginated<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            total: self.total,
            offset: self.offset,
            limit: self.limit,
            results: self.results.into_iter().map(f).collect(),
        }
    }
}

/// ListParams
///
/// Query string accepted by every listing endpoint (`?q=&limit=&offset=`).
/// Kept as raw strings: an unparseable `limit` or `offset` resets both to their defaults.
#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListParams {
    /// Search term.
    pub q: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl ListParams {
    pub fn page(&self, default_limit: i64) -> Page {
        let limit = self.limit.as_deref().map(|v| v.trim().parse::<i64>());
        let offset = self.offset.as_deref().map(|v| v.trim().parse::<i64>());
        match (limit, offset) {
            (Some(Err(_)), _) | (_, Some(Err(_))) => Page::new(default_limit, 0),
            (limit, offset) => Page::new(
                limit.and_then(Result::ok).unwrap_or(default_limit),
                offset.and_then(Result::ok).unwrap_or(0),
            ),
        }
    }

    pub fn search_term(&self) -> Option<&str> {
        self.q.as_deref()
    }
}

// --- Request Payloads (Input Schemas) ---
//
// Every field is optional at the serde level so that a missing field surfaces as a
// validation error with a readable message instead of a deserialization failure.

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RegisterRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateProfileRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ChangePasswordRequest {
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

/// Keeps a present `null` as `Some(Value::Null)`; only a missing key becomes `None`.
fn present_value<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

/// Body of `POST /admin/users/{id}/active`. The flag accepts booleans or boolean-ish strings.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct SetActiveRequest {
    #[serde(default, deserialize_with = "present_value")]
    #[schema(value_type = Option<bool>)]
    pub is_active: Option<serde_json::Value>,
}

/// Body of `POST /admin/users/{id}/admin`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct SetAdminRequest {
    #[serde(default, deserialize_with = "present_value")]
    #[schema(value_type = Option<bool>)]
    pub is_admin: Option<serde_json::Value>,
}

// --- Response Schemas (Output) ---

/// UserSummary
///
/// Public view of the caller's account returned by login, `me` and profile updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UserSummary {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub is_staff: bool,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            role: user.role,
            is_staff: user.is_staff,
        }
    }
}

/// AdminUserView
///
/// Row of the admin user listing, also returned by the activation/promotion endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AdminUserView {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub is_staff: bool,
    pub is_active: bool,
    #[ts(type = "string")]
    pub date_joined: DateTime<Utc>,
    #[ts(type = "string | null")]
    pub last_login: Option<DateTime<Utc>>,
}

impl From<User> for AdminUserView {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            role: user.role,
            is_staff: user.is_staff,
            is_active: user.is_active,
            date_joined: user.date_joined,
            last_login: user.last_login,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct OwnerRef {
    pub id: i64,
    pub email: Option<String>,
}

/// CompoundResponse
///
/// Serialized compound. `structure_file_url` is absolute, or null when no file is attached.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CompoundResponse {
    pub id: i64,
    pub name: String,
    pub formula: String,
    pub smiles: String,
    pub molecular_weight: Option<f64>,
    pub description: String,
    pub is_public: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
    pub owner: OwnerRef,
    pub structure_file_url: Option<String>,
}

impl CompoundResponse {
    pub fn new(compound: Compound, structure_file_url: Option<String>) -> Self {
        Self {
            id: compound.id,
            name: compound.name,
            formula: compound.formula,
            smiles: compound.smiles,
            molecular_weight: compound.molecular_weight,
            description: compound.description,
            is_public: compound.is_public,
            created_at: compound.created_at,
            updated_at: compound.updated_at,
            owner: OwnerRef {
                id: compound.owner_id,
                email: compound.owner_email,
            },
            structure_file_url,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Envelope for endpoints that return the affected compound.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CompoundEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub compound: CompoundResponse,
}

/// Envelope for endpoints that return the caller's account.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UserEnvelope {
    pub message: String,
    pub user: UserSummary,
}

/// Envelope for admin endpoints that return the affected account.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AdminUserEnvelope {
    pub message: String,
    pub user: AdminUserView,
}

/// Response of `GET /auth/me`. `user` is omitted for anonymous callers.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct MeResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CsrfResponse {
    #[serde(rename = "csrfToken")]
    pub csrf_token: String,
}
