use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::info;

use crate::config;
use crate::tenant::strategy::rls::SESSION_VARS;

/// Errors from DatabaseManager
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Shared connection pool for the platform database.
///
/// All tenants share one database; isolation is enforced per session via the
/// RLS strategy. Every connection is scrubbed of tenant session state before
/// it re-enters the pool, so a later caller can never inherit a stale scope.
pub struct DatabaseManager;

static POOL: OnceCell<PgPool> = OnceCell::const_new();

impl DatabaseManager {
    /// Get the shared pool, connecting lazily on first use.
    pub async fn pool() -> Result<PgPool, DatabaseError> {
        POOL.get_or_try_init(Self::connect).await.cloned()
    }

    async fn connect() -> Result<PgPool, DatabaseError> {
        let url = std::env::var("DATABASE_URL")
            .map_err(|_| DatabaseError::ConfigMissing("DATABASE_URL"))?;
        let db = &config::config().database;

        let pool = PgPoolOptions::new()
            .max_connections(db.max_connections)
            .acquire_timeout(Duration::from_secs(db.connection_timeout_secs))
            .after_release(|conn, _meta| {
                Box::pin(async move {
                    // Scrub tenant session state before the connection goes
                    // back to the shared pool.
                    sqlx::query("RESET ROLE").execute(&mut *conn).await?;
                    for key in SESSION_VARS {
                        sqlx::query("SELECT set_config($1, '', false)")
                            .bind(key)
                            .execute(&mut *conn)
                            .await?;
                    }
                    Ok(true)
                })
            })
            .connect(&url)
            .await?;

        info!(
            max_connections = db.max_connections,
            "created shared database pool"
        );
        Ok(pool)
    }

    /// Pings the pool to ensure connectivity
    pub async fn health_check() -> Result<(), DatabaseError> {
        let pool = Self::pool().await?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(())
    }
}
