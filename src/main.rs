//! Aula Server
//!
//! A self-hosted e-learning progress server with multi-device sync, conflict
//! resolution and role-based access control.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aula_server::auth::{ClaimsService, Role, TokenVerifier};
use aula_server::config::Config;
use aula_server::db::{self, NewUser, UserRepository};
use aula_server::routes;
use aula_server::state::AppState;
use aula_server::tasks;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check(State(_state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aula_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting Aula Server v{}", env!("CARGO_PKG_VERSION"));

    // Initialize database
    let db_pool = db::create_pool(&config.database.url)
        .await
        .expect("Failed to initialize database");
    tracing::info!("Database initialized at {}", config.database.url);

    // Seed the first admin account on an empty deployment
    if let Some(token) = config.auth.bootstrap_token.clone() {
        if let Err(e) = bootstrap_admin(&db_pool, &token).await {
            tracing::warn!("Bootstrap admin setup failed: {}", e);
        }
    }

    // Create application state
    let verifier = Arc::new(TokenVerifier::new(db_pool.clone()));
    let app_state = AppState::new(config.clone(), db_pool, verifier);

    // Start the scheduled claims sweep
    let sweep = tasks::spawn_claims_sweep(app_state.clone());

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/health", get(health_check))
        .nest("/api/v1/sync", routes::sync::router())
        .nest("/api/v1/devices", routes::devices::router())
        .nest("/api/v1/users", routes::users::router())
        .nest("/api/v1/claims", routes::users::claims_router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state);

    // Start server with graceful shutdown
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Aula Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    sweep.abort();
    tracing::info!("Server shutdown complete");
}

/// Create the first admin account while the users table is still empty
///
/// The provided token becomes that admin's access token, so a fresh install
/// can call the API without any out-of-band setup.
async fn bootstrap_admin(pool: &SqlitePool, token: &str) -> aula_server::error::Result<()> {
    let users = UserRepository::new(pool);
    if users.count().await? > 0 {
        return Ok(());
    }

    users
        .create(&NewUser {
            id: "admin".to_string(),
            email: "admin@aula.local".to_string(),
            display_name: Some("Administrator".to_string()),
            role: Role::Admin,
            university_id: None,
            department_id: None,
        })
        .await?;
    users.register_token("admin", token).await?;
    ClaimsService::new(pool).refresh("admin", "system").await?;

    tracing::info!("Bootstrap admin account created");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}

#[cfg(test)]
mod tests {
    use aula_server::auth::hash_token;

    use super::*;

    #[tokio::test]
    async fn test_bootstrap_seeds_one_admin_with_the_given_token() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}/bootstrap.db", dir.path().display());
        let pool = db::create_pool(&url).await.unwrap();

        bootstrap_admin(&pool, "install-token").await.unwrap();

        let users = UserRepository::new(&pool);
        let admin = users.get("admin").await.unwrap().unwrap();
        assert_eq!(admin.role, Role::Admin);
        assert_eq!(admin.claims.unwrap().role, Role::Admin);

        let (stored,): (String,) =
            sqlx::query_as("SELECT token_hash FROM access_tokens WHERE user_id = 'admin'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(stored, hash_token("install-token"));
    }

    #[tokio::test]
    async fn test_bootstrap_is_a_noop_once_users_exist() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}/bootstrap.db", dir.path().display());
        let pool = db::create_pool(&url).await.unwrap();

        bootstrap_admin(&pool, "first-token").await.unwrap();
        bootstrap_admin(&pool, "second-token").await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM access_tokens")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
