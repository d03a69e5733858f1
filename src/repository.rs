use crate::error::{AppError, AppResult};
use crate::models::{Compound, CompoundQuery, NewCompound, NewUser, Page, Paginated, Role, User};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, query_builder::QueryBuilder};
use std::sync::Arc;

/// Repository Trait
///
/// Abstract contract for all persistence operations. Handlers talk to this trait only, so the
/// storage engine (Postgres in production, an in-memory map in tests) can be swapped without
/// touching business logic.
///
/// **Send + Sync + async_trait** are required to share the trait object (`Arc<dyn Repository>`)
/// across Axum's asynchronous task boundaries.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    /// Fails with `Conflict` when the email is already registered.
    async fn create_user(&self, user: NewUser) -> AppResult<User>;
    async fn get_user(&self, id: i64) -> AppResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>>;
    /// True if another user (any user when `exclude_id` is `None`) owns `email`.
    async fn email_in_use(&self, email: &str, exclude_id: Option<i64>) -> AppResult<bool>;
    /// Stamps `last_login` and stores the (possibly upgraded) role.
    async fn record_login(&self, id: i64, role: Role) -> AppResult<User>;
    /// Updates the name, and the email when given.
    async fn update_profile(&self, id: i64, full_name: &str, email: Option<&str>)
    -> AppResult<User>;
    async fn set_password_hash(&self, id: i64, password_hash: &str) -> AppResult<User>;

    // --- User Moderation ---
    /// Ordered by staff flag (staff first) then email. Searches email and full name.
    async fn list_users(&self, search: Option<&str>, page: Page) -> AppResult<Paginated<User>>;
    /// Active users other than `exclude_id` that are staff or hold the admin role.
    async fn count_other_active_admins(&self, exclude_id: i64) -> AppResult<i64>;
    async fn set_user_active(&self, id: i64, is_active: bool) -> AppResult<User>;
    async fn set_user_admin(&self, id: i64, is_staff: bool, role: Role) -> AppResult<User>;

    // --- Compounds ---
    /// Filtered, name-ordered page plus the total count of the filtered set.
    async fn list_compounds(
        &self,
        query: &CompoundQuery,
        page: Page,
    ) -> AppResult<Paginated<Compound>>;
    async fn get_compound(&self, id: i64) -> AppResult<Option<Compound>>;
    async fn create_compound(&self, compound: NewCompound) -> AppResult<Compound>;
    /// Persists every mutable field of `compound`. The owner is never rewritten.
    async fn update_compound(&self, compound: &Compound) -> AppResult<Compound>;
    /// Returns false when no row matched.
    async fn delete_compound(&self, id: i64) -> AppResult<bool>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by PostgreSQL.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str =
    "id, email, full_name, password_hash, is_active, is_staff, role, date_joined, last_login";

const COMPOUND_COLUMNS: &str = "c.id, c.name, c.formula, c.smiles, c.molecular_weight, \
     c.structure_file, c.description, c.is_public, c.owner_id, u.email AS owner_email, \
     c.created_at, c.updated_at";

/// like_pattern
///
/// Wraps a search term for `ILIKE`, escaping the wildcard characters it may contain so the
/// match stays a plain substring match.
pub fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Maps a unique-constraint violation to `Conflict(message)`.
fn conflict_on_unique(message: &'static str) -> impl Fn(sqlx::Error) -> AppError {
    move |e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(message.to_string())
        }
        _ => AppError::Database(e),
    }
}

fn push_compound_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &CompoundQuery) {
    builder.push(" WHERE TRUE");
    if query.public_only {
        builder.push(" AND c.is_public = TRUE");
    }
    if let Some(term) = &query.search {
        // Case-insensitive search across name, formula, smiles and description.
        let pattern = like_pattern(term);
        builder.push(" AND (c.name ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR c.formula ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR c.smiles ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR c.description ILIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }
}

fn push_user_filters(builder: &mut QueryBuilder<'_, Postgres>, search: Option<&str>) {
    builder.push(" WHERE TRUE");
    if let Some(term) = search.map(str::trim).filter(|t| !t.is_empty()) {
        let pattern = like_pattern(term);
        builder.push(" AND (email ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR full_name ILIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    /// create_user
    ///
    /// The unique index on `email` is the source of truth for duplicates; a violation maps to
    /// `Conflict` even when two registrations race past the handler's pre-check.
    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        let sql = format!(
            "INSERT INTO users (email, full_name, password_hash, role, is_staff, is_active, date_joined) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW()) RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(&user.email)
            .bind(&user.full_name)
            .bind(&user.password_hash)
            .bind(user.role.as_str())
            .bind(user.is_staff)
            .bind(user.is_active)
            .fetch_one(&self.pool)
            .await
            .map_err(conflict_on_unique("Email already exists"))
    }

    async fn get_user(&self, id: i64) -> AppResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn email_in_use(&self, email: &str, exclude_id: Option<i64>) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM users WHERE email = $1 AND ($2::BIGINT IS NULL OR id <> $2))",
        )
        .bind(email)
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn record_login(&self, id: i64, role: Role) -> AppResult<User> {
        let sql = format!(
            "UPDATE users SET last_login = NOW(), role = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(role.as_str())
            .fetch_one(&self.pool)
            .await?)
    }

    /// update_profile
    ///
    /// `COALESCE` keeps the current email when none is supplied.
    async fn update_profile(
        &self,
        id: i64,
        full_name: &str,
        email: Option<&str>,
    ) -> AppResult<User> {
        let sql = format!(
            "UPDATE users SET full_name = $2, email = COALESCE($3, email) WHERE id = $1 \
             RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(full_name)
            .bind(email)
            .fetch_one(&self.pool)
            .await
            .map_err(conflict_on_unique("Email already in use"))
    }

    async fn set_password_hash(&self, id: i64, password_hash: &str) -> AppResult<User> {
        let sql =
            format!("UPDATE users SET password_hash = $2 WHERE id = $1 RETURNING {USER_COLUMNS}");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(password_hash)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn list_users(&self, search: Option<&str>, page: Page) -> AppResult<Paginated<User>> {
        let mut count: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM users");
        push_user_filters(&mut count, search);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {USER_COLUMNS} FROM users"));
        push_user_filters(&mut select, search);
        select.push(" ORDER BY is_staff DESC, email ASC LIMIT ");
        select.push_bind(page.limit);
        select.push(" OFFSET ");
        select.push_bind(page.offset);
        let results = select
            .build_query_as::<User>()
            .fetch_all(&self.pool)
            .await?;

        Ok(Paginated {
            total,
            offset: page.offset,
            limit: page.limit,
            results,
        })
    }

    async fn count_other_active_admins(&self, exclude_id: i64) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM users \
             WHERE (is_staff = TRUE OR role = 'admin') AND is_active = TRUE AND id <> $1",
        )
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn set_user_active(&self, id: i64, is_active: bool) -> AppResult<User> {
        let sql =
            format!("UPDATE users SET is_active = $2 WHERE id = $1 RETURNING {USER_COLUMNS}");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(is_active)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn set_user_admin(&self, id: i64, is_staff: bool, role: Role) -> AppResult<User> {
        let sql = format!(
            "UPDATE users SET is_staff = $2, role = $3 WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(is_staff)
            .bind(role.as_str())
            .fetch_one(&self.pool)
            .await?)
    }

    /// list_compounds
    ///
    /// Builds the count and page queries from the same filter so `total` always describes
    /// the filtered set, independent of the window.
    async fn list_compounds(
        &self,
        query: &CompoundQuery,
        page: Page,
    ) -> AppResult<Paginated<Compound>> {
        let mut count: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM compounds c");
        push_compound_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {COMPOUND_COLUMNS} FROM compounds c JOIN users u ON u.id = c.owner_id"
        ));
        push_compound_filters(&mut select, query);
        select.push(" ORDER BY c.name ASC, c.id ASC LIMIT ");
        select.push_bind(page.limit);
        select.push(" OFFSET ");
        select.push_bind(page.offset);
        let results = select
            .build_query_as::<Compound>()
            .fetch_all(&self.pool)
            .await?;

        Ok(Paginated {
            total,
            offset: page.offset,
            limit: page.limit,
            results,
        })
    }

    async fn get_compound(&self, id: i64) -> AppResult<Option<Compound>> {
        let sql = format!(
            "SELECT {COMPOUND_COLUMNS} FROM compounds c JOIN users u ON u.id = c.owner_id \
             WHERE c.id = $1"
        );
        Ok(sqlx::query_as::<_, Compound>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// create_compound
    ///
    /// Uses a CTE to insert and join the owner's email in one round-trip.
    async fn create_compound(&self, compound: NewCompound) -> AppResult<Compound> {
        let sql = format!(
            r#"
            WITH c AS (
                INSERT INTO compounds
                    (name, formula, smiles, molecular_weight, structure_file, description,
                     is_public, owner_id, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW())
                RETURNING *
            )
            SELECT {COMPOUND_COLUMNS} FROM c JOIN users u ON u.id = c.owner_id
            "#
        );
        Ok(sqlx::query_as::<_, Compound>(&sql)
            .bind(&compound.name)
            .bind(&compound.formula)
            .bind(&compound.smiles)
            .bind(compound.molecular_weight)
            .bind(&compound.structure_file)
            .bind(&compound.description)
            .bind(compound.is_public)
            .bind(compound.owner_id)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn update_compound(&self, compound: &Compound) -> AppResult<Compound> {
        let sql = format!(
            r#"
            WITH c AS (
                UPDATE compounds
                SET name = $2,
                    formula = $3,
                    smiles = $4,
                    molecular_weight = $5,
                    structure_file = $6,
                    description = $7,
                    is_public = $8,
                    updated_at = NOW()
                WHERE id = $1
                RETURNING *
            )
            SELECT {COMPOUND_COLUMNS} FROM c JOIN users u ON u.id = c.owner_id
            "#
        );
        let updated = sqlx::query_as::<_, Compound>(&sql)
            .bind(compound.id)
            .bind(&compound.name)
            .bind(&compound.formula)
            .bind(&compound.smiles)
            .bind(compound.molecular_weight)
            .bind(&compound.structure_file)
            .bind(&compound.description)
            .bind(compound.is_public)
            .fetch_optional(&self.pool)
            .await?;
        // The row can vanish between the handler's lookup and this write.
        updated.ok_or_else(AppError::not_found)
    }

    async fn delete_compound(&self, id: i64) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM compounds WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
