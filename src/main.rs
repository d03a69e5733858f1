use chem_registry::{
    AppState,
    config::{AppConfig, BootstrapAdmin, Env},
    create_router,
    error::AppResult,
    models::{NewUser, Role},
    password::hash_password,
    repository::{PostgresRepository, Repository, RepositoryState},
    session::{PostgresSessionStore, SessionState, SessionStore},
    storage::{S3StorageClient, StorageService, StorageState},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// seed_bootstrap_admin
///
/// Creates the configured administrator when no account uses its email yet, so a fresh
/// deployment has a first member of the admin set.
async fn seed_bootstrap_admin(repo: &RepositoryState, admin: &BootstrapAdmin) -> AppResult<()> {
    if repo.find_user_by_email(&admin.email).await?.is_some() {
        tracing::debug!(email = %admin.email, "bootstrap admin already present");
        return Ok(());
    }

    let user = repo
        .create_user(NewUser {
            email: admin.email.clone(),
            full_name: admin.full_name.clone(),
            password_hash: hash_password(&admin.password)?,
            role: Role::Admin,
            is_staff: true,
            is_active: true,
        })
        .await?;
    tracing::info!(user_id = user.id, email = %user.email, "bootstrap admin created");
    Ok(())
}

/// main
///
/// Initializes configuration, logging, the database (with migrations), the session store and
/// object storage, then serves the HTTP API.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail-fast on missing production secrets)
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging: RUST_LOG wins, otherwise crate-level debug.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "chem_registry=debug,tower_http=info,axum=info".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 3. Database + migrations
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.db_url)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("FATAL: Failed to run database migrations.");

    let repo = Arc::new(PostgresRepository::new(pool.clone())) as RepositoryState;
    let sessions = Arc::new(PostgresSessionStore::new(pool)) as SessionState;

    match sessions.purge_expired().await {
        Ok(purged) => tracing::info!(purged, "expired sessions purged"),
        Err(e) => tracing::warn!(error = %e, "could not purge expired sessions"),
    }

    if let Some(admin) = &config.bootstrap_admin {
        if let Err(e) = seed_bootstrap_admin(&repo, admin).await {
            tracing::error!(error = %e, "bootstrap admin creation failed");
        }
    }

    // 4. Object storage (S3/MinIO)
    let s3_client = S3StorageClient::new(
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_key,
        &config.s3_secret,
        &config.s3_bucket,
        &config.media_base_url,
    )
    .await;

    // LOCAL-ONLY: provision the MinIO bucket.
    if config.env == Env::Local {
        s3_client.ensure_bucket_exists().await;
    }

    let storage = Arc::new(s3_client) as StorageState;

    // 5. Unified State Assembly
    let bind_addr = config.bind_addr.clone();
    let app_state = AppState {
        repo,
        storage,
        sessions,
        config,
    };

    // 6. Router and Server Startup
    let app = create_router(app_state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("FATAL: cannot bind {}: {}", bind_addr, e));

    tracing::info!("Listening on {}", bind_addr);
    tracing::info!("API Documentation (Swagger UI) available at: http://{}/swagger-ui", bind_addr);

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server terminated");
    }
}
