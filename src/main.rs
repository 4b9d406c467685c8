use std::sync::Arc;

use anyhow::Context;
use axum::{extract::Extension, middleware, routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use wellfield_api::database::manager::DatabaseManager;
use wellfield_api::handlers;
use wellfield_api::middleware::{jwt_auth_middleware, tenant_scope_middleware};
use wellfield_api::tenant::{
    IsolationStrategy, MemoryIsolationStrategy, RlsIsolationStrategy, TenantContextService,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    let config = wellfield_api::config::config();
    tracing::info!("Starting Wellfield API in {:?} mode", config.environment);

    // RLS-backed isolation in deployments with a configured database role;
    // in-process isolation otherwise.
    let strategy: Arc<dyn IsolationStrategy> = if config.rls.enabled {
        let pool = DatabaseManager::pool()
            .await
            .context("RLS isolation requires a reachable database")?;
        Arc::new(RlsIsolationStrategy::new(pool))
    } else {
        Arc::new(MemoryIsolationStrategy::new())
    };
    let service = TenantContextService::new(strategy);

    let app = app(service);

    // Allow tests or deployments to override port via env
    let port = std::env::var("WELLFIELD_API_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(3000);

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Wellfield API listening on http://{}", bind_addr);

    axum::serve(listener, app).await.context("server")?;
    Ok(())
}

fn app(service: TenantContextService) -> Router {
    Router::new()
        // Public
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        // Protected: JWT auth first, then the tenant enforcement point
        .merge(protected_routes())
        // Global middleware
        .layer(Extension(service))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn protected_routes() -> Router {
    Router::new()
        .route("/api/auth/whoami", get(handlers::whoami))
        .route("/api/tenant/validate", get(handlers::tenant_validate))
        .route("/api/tenant/health", get(handlers::tenant_health))
        .layer(middleware::from_fn(tenant_scope_middleware))
        .layer(middleware::from_fn(jwt_auth_middleware))
}
