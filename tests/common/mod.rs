#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use chem_registry::{
    AppState, create_router,
    auth::CurrentUser,
    config::AppConfig,
    error::{AppError, AppResult},
    models::{Compound, CompoundQuery, NewCompound, NewUser, Page, Paginated, Role, User},
    password::hash_password,
    repository::{Repository, RepositoryState},
    session::{MemorySessionStore, SessionState},
    storage::{MockStorageService, StorageState},
};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tower::ServiceExt;

pub const PASSWORD: &str = "password123";

/// Argon2 is slow in debug builds, so seeded users share one precomputed hash.
pub fn password_hash() -> String {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| hash_password(PASSWORD).expect("hashing should succeed"))
        .clone()
}

// --- IN-MEMORY REPOSITORY ---

#[derive(Default)]
struct Store {
    users: Vec<User>,
    compounds: Vec<Compound>,
    next_user_id: i64,
    next_compound_id: i64,
}

/// Repository backed by plain vectors. Mirrors the Postgres implementation's ordering,
/// filtering and uniqueness rules closely enough for handler and router tests.
#[derive(Default)]
pub struct MemoryRepository {
    store: Mutex<Store>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compound_count(&self) -> usize {
        self.store.lock().unwrap().compounds.len()
    }

    pub fn user(&self, id: i64) -> Option<User> {
        self.store
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| u.id == id)
            .cloned()
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn with_owner_email(store: &Store, mut compound: Compound) -> Compound {
    compound.owner_email = store
        .users
        .iter()
        .find(|u| u.id == compound.owner_id)
        .map(|u| u.email.clone());
    compound
}

fn paginate<T>(items: Vec<T>, page: Page) -> Paginated<T> {
    let total = items.len() as i64;
    let results = items
        .into_iter()
        .skip(page.offset as usize)
        .take(page.limit as usize)
        .collect();
    Paginated {
        total,
        offset: page.offset,
        limit: page.limit,
        results,
    }
}

fn update_user(store: &mut Store, id: i64, f: impl FnOnce(&mut User)) -> AppResult<User> {
    let user = store
        .users
        .iter_mut()
        .find(|u| u.id == id)
        .ok_or_else(AppError::not_found)?;
    f(user);
    Ok(user.clone())
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        let mut store = self.store.lock().unwrap();
        if store.users.iter().any(|u| u.email == user.email) {
            return Err(AppError::Conflict("Email already exists".to_string()));
        }
        store.next_user_id += 1;
        let created = User {
            id: store.next_user_id,
            email: user.email,
            full_name: user.full_name,
            password_hash: user.password_hash,
            is_active: user.is_active,
            is_staff: user.is_staff,
            role: user.role,
            date_joined: Utc::now(),
            last_login: None,
        };
        store.users.push(created.clone());
        Ok(created)
    }

    async fn get_user(&self, id: i64) -> AppResult<Option<User>> {
        Ok(self.user(id))
    }

    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let store = self.store.lock().unwrap();
        Ok(store.users.iter().find(|u| u.email == email).cloned())
    }

    async fn email_in_use(&self, email: &str, exclude_id: Option<i64>) -> AppResult<bool> {
        let store = self.store.lock().unwrap();
        Ok(store
            .users
            .iter()
            .any(|u| u.email == email && Some(u.id) != exclude_id))
    }

    async fn record_login(&self, id: i64, role: Role) -> AppResult<User> {
        let mut store = self.store.lock().unwrap();
        update_user(&mut store, id, |u| {
            u.role = role;
            u.last_login = Some(Utc::now());
        })
    }

    async fn update_profile(
        &self,
        id: i64,
        full_name: &str,
        email: Option<&str>,
    ) -> AppResult<User> {
        let mut store = self.store.lock().unwrap();
        if let Some(email) = email {
            if store.users.iter().any(|u| u.email == email && u.id != id) {
                return Err(AppError::Conflict("Email already in use".to_string()));
            }
        }
        update_user(&mut store, id, |u| {
            u.full_name = full_name.to_string();
            if let Some(email) = email {
                u.email = email.to_string();
            }
        })
    }

    async fn set_password_hash(&self, id: i64, password_hash: &str) -> AppResult<User> {
        let mut store = self.store.lock().unwrap();
        update_user(&mut store, id, |u| u.password_hash = password_hash.to_string())
    }

    async fn list_users(&self, search: Option<&str>, page: Page) -> AppResult<Paginated<User>> {
        let store = self.store.lock().unwrap();
        let term = search.map(str::trim).filter(|t| !t.is_empty());
        let mut users: Vec<User> = store
            .users
            .iter()
            .filter(|u| {
                term.is_none_or(|t| contains_ci(&u.email, t) || contains_ci(&u.full_name, t))
            })
            .cloned()
            .collect();
        users.sort_by(|a, b| b.is_staff.cmp(&a.is_staff).then(a.email.cmp(&b.email)));
        Ok(paginate(users, page))
    }

    async fn count_other_active_admins(&self, exclude_id: i64) -> AppResult<i64> {
        let store = self.store.lock().unwrap();
        Ok(store
            .users
            .iter()
            .filter(|u| u.id != exclude_id && u.is_active && u.is_admin())
            .count() as i64)
    }

    async fn set_user_active(&self, id: i64, is_active: bool) -> AppResult<User> {
        let mut store = self.store.lock().unwrap();
        update_user(&mut store, id, |u| u.is_active = is_active)
    }

    async fn set_user_admin(&self, id: i64, is_staff: bool, role: Role) -> AppResult<User> {
        let mut store = self.store.lock().unwrap();
        update_user(&mut store, id, |u| {
            u.is_staff = is_staff;
            u.role = role;
        })
    }

    async fn list_compounds(
        &self,
        query: &CompoundQuery,
        page: Page,
    ) -> AppResult<Paginated<Compound>> {
        let store = self.store.lock().unwrap();
        let mut compounds: Vec<Compound> = store
            .compounds
            .iter()
            .filter(|c| !query.public_only || c.is_public)
            .filter(|c| {
                query.search.as_deref().is_none_or(|t| {
                    contains_ci(&c.name, t)
                        || contains_ci(&c.formula, t)
                        || contains_ci(&c.smiles, t)
                        || contains_ci(&c.description, t)
                })
            })
            .cloned()
            .map(|c| with_owner_email(&store, c))
            .collect();
        compounds.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(paginate(compounds, page))
    }

    async fn get_compound(&self, id: i64) -> AppResult<Option<Compound>> {
        let store = self.store.lock().unwrap();
        Ok(store
            .compounds
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .map(|c| with_owner_email(&store, c)))
    }

    async fn create_compound(&self, compound: NewCompound) -> AppResult<Compound> {
        let mut store = self.store.lock().unwrap();
        store.next_compound_id += 1;
        let now = Utc::now();
        let created = Compound {
            id: store.next_compound_id,
            name: compound.name,
            formula: compound.formula,
            smiles: compound.smiles,
            molecular_weight: compound.molecular_weight,
            structure_file: compound.structure_file,
            description: compound.description,
            is_public: compound.is_public,
            owner_id: compound.owner_id,
            owner_email: None,
            created_at: now,
            updated_at: now,
        };
        store.compounds.push(created.clone());
        Ok(with_owner_email(&store, created))
    }

    async fn update_compound(&self, compound: &Compound) -> AppResult<Compound> {
        let mut store = self.store.lock().unwrap();
        let stored = store
            .compounds
            .iter_mut()
            .find(|c| c.id == compound.id)
            .ok_or_else(AppError::not_found)?;
        stored.name = compound.name.clone();
        stored.formula = compound.formula.clone();
        stored.smiles = compound.smiles.clone();
        stored.molecular_weight = compound.molecular_weight;
        stored.structure_file = compound.structure_file.clone();
        stored.description = compound.description.clone();
        stored.is_public = compound.is_public;
        stored.updated_at = Utc::now();
        let updated = stored.clone();
        Ok(with_owner_email(&store, updated))
    }

    async fn delete_compound(&self, id: i64) -> AppResult<bool> {
        let mut store = self.store.lock().unwrap();
        let before = store.compounds.len();
        store.compounds.retain(|c| c.id != id);
        Ok(store.compounds.len() < before)
    }
}

// --- STATE SCAFFOLDING ---

/// Handles to the in-memory services behind a test `AppState`.
pub struct TestContext {
    pub state: AppState,
    pub repo: Arc<MemoryRepository>,
    pub storage: MockStorageService,
    pub sessions: Arc<MemorySessionStore>,
}

pub fn test_context() -> TestContext {
    test_context_with_storage(MockStorageService::new())
}

pub fn test_context_with_storage(storage: MockStorageService) -> TestContext {
    let repo = Arc::new(MemoryRepository::new());
    let sessions = Arc::new(MemorySessionStore::new());
    let state = AppState {
        repo: repo.clone() as RepositoryState,
        storage: Arc::new(storage.clone()) as StorageState,
        sessions: sessions.clone() as SessionState,
        config: AppConfig::default(),
    };
    TestContext {
        state,
        repo,
        storage,
        sessions,
    }
}

impl TestContext {
    /// Inserts an active user whose password is `PASSWORD`.
    pub async fn seed_user(&self, email: &str, role: Role, is_staff: bool) -> User {
        self.repo
            .create_user(NewUser {
                email: email.to_string(),
                full_name: format!("User {}", email),
                password_hash: password_hash(),
                role,
                is_staff,
                is_active: true,
            })
            .await
            .expect("seeding a user should succeed")
    }

    pub async fn seed_admin(&self, email: &str) -> User {
        self.seed_user(email, Role::Admin, true).await
    }

    pub async fn seed_compound(&self, owner: &User, name: &str, is_public: bool) -> Compound {
        self.repo
            .create_compound(NewCompound {
                name: name.to_string(),
                formula: "C".to_string(),
                smiles: "C".to_string(),
                molecular_weight: None,
                description: String::new(),
                is_public,
                structure_file: None,
                owner_id: owner.id,
            })
            .await
            .expect("seeding a compound should succeed")
    }

    pub fn client(&self) -> TestClient {
        TestClient::new(create_router(self.state.clone()))
    }
}

/// Request-scoped principal for calling handlers directly.
pub fn current(user: &User) -> CurrentUser {
    CurrentUser {
        user: user.clone(),
        token_hash: format!("test-session-{}", user.id),
    }
}

pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

// --- ROUTER CLIENT ---

/// Drives the full router through `oneshot`, keeping a cookie jar like a browser and
/// echoing the CSRF cookie in the `X-CSRFToken` header on state-changing requests.
pub struct TestClient {
    router: Router,
    pub cookies: HashMap<String, String>,
    pub send_csrf: bool,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

pub const MULTIPART_BOUNDARY: &str = "chem-test-boundary";

impl TestClient {
    pub fn new(router: Router) -> Self {
        Self {
            router,
            cookies: HashMap::new(),
            send_csrf: true,
        }
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    fn store_cookies(&mut self, response: &axum::response::Response) {
        for value in response.headers().get_all(header::SET_COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            let (pair, attrs) = raw.split_once(';').unwrap_or((raw, ""));
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            if value.is_empty() || attrs.contains("Max-Age=0") {
                self.cookies.remove(name);
            } else {
                self.cookies.insert(name.to_string(), value.to_string());
            }
        }
    }

    async fn send(
        &mut self,
        method: Method,
        uri: &str,
        content_type: Option<String>,
        body: Body,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method.clone()).uri(uri);
        if !self.cookies.is_empty() {
            let jar = self
                .cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(header::COOKIE, jar);
        }
        if self.send_csrf && method != Method::GET {
            if let Some(token) = self.cookies.get("csrftoken") {
                builder = builder.header("X-CSRFToken", token.clone());
            }
        }
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }

        let request = builder.body(body).expect("request should build");
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        self.store_cookies(&response);
        let status = response.status();
        TestResponse {
            status,
            body: body_json(response).await,
        }
    }

    pub async fn get(&mut self, uri: &str) -> TestResponse {
        self.send(Method::GET, uri, None, Body::empty()).await
    }

    pub async fn post_json(&mut self, uri: &str, body: Value) -> TestResponse {
        self.send(
            Method::POST,
            uri,
            Some("application/json".to_string()),
            Body::from(body.to_string()),
        )
        .await
    }

    /// Sends `fields` plus an optional `(file_name, bytes)` structure file as multipart.
    pub async fn post_multipart(
        &mut self,
        uri: &str,
        fields: &[(&str, &str)],
        file: Option<(&str, &[u8])>,
    ) -> TestResponse {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some((file_name, bytes)) = file {
            body.extend_from_slice(
                format!(
                    "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"structure_file\"; filename=\"{file_name}\"\r\nContent-Type: chemical/x-mdl-molfile\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}--\r\n").as_bytes());

        self.send(
            Method::POST,
            uri,
            Some(format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}")),
            Body::from(body),
        )
        .await
    }

    /// Fetches a CSRF cookie, registers and logs in. Returns the login response.
    pub async fn register_and_login(&mut self, full_name: &str, email: &str) -> TestResponse {
        self.get("/csrf").await;
        let registered = self
            .post_json(
                "/auth/register",
                serde_json::json!({"full_name": full_name, "email": email, "password": PASSWORD}),
            )
            .await;
        assert_eq!(registered.status, StatusCode::CREATED, "{:?}", registered.body);
        self.login(email, PASSWORD).await
    }

    pub async fn login(&mut self, email: &str, password: &str) -> TestResponse {
        if self.cookie("csrftoken").is_none() {
            self.get("/csrf").await;
        }
        self.post_json(
            "/auth/login",
            serde_json::json!({"email": email, "password": password}),
        )
        .await
    }
}
