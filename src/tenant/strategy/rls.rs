use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tokio::sync::Mutex;
use tracing::warn;

use crate::config;
use crate::tenant::context::TenantContext;
use crate::tenant::error::TenantAccessError;
use crate::tenant::policy;

use super::IsolationStrategy;

/// Session variables mirrored onto the database. Row-level-security policies
/// filter on `current_setting('app.current_organization_id')`.
pub const ORGANIZATION_ID_VAR: &str = "app.current_organization_id";
pub const USER_ID_VAR: &str = "app.current_user_id";
pub const USER_ROLE_VAR: &str = "app.current_user_role";

pub const SESSION_VARS: [&str; 3] = [ORGANIZATION_ID_VAR, USER_ID_VAR, USER_ROLE_VAR];

/// Row-level-security isolation strategy.
///
/// Installing a context acquires a connection from the shared pool, switches
/// it to the restricted database role (which activates the RLS policies) and
/// stamps the three tenant session variables. The connection is held until
/// the context is cleared so every query scoped by this strategy runs on a
/// session that carries the right identity. The in-memory cache is a
/// convenience; the database session is the source of truth, and the cache
/// is never kept after an error on the connection used to set it.
pub struct RlsIsolationStrategy {
    pool: PgPool,
    restricted_role: String,
    unrestricted_role: String,
    session: Mutex<Session>,
}

/// The held connection and the cache share a lifetime: both are populated by
/// a successful install and both are dropped together on clear, on install
/// failure, and on unwind. `current_tenant_context` still prefers the live
/// session variables over the cache whenever a connection is held.
#[derive(Default)]
struct Session {
    conn: Option<PoolConnection<Postgres>>,
    cached: Option<TenantContext>,
}

impl RlsIsolationStrategy {
    /// Build against the configured role names.
    pub fn new(pool: PgPool) -> Self {
        let rls = &config::config().rls;
        Self::with_roles(pool, &rls.restricted_role, &rls.unrestricted_role)
    }

    pub fn with_roles(pool: PgPool, restricted_role: &str, unrestricted_role: &str) -> Self {
        Self {
            pool,
            restricted_role: restricted_role.to_string(),
            unrestricted_role: unrestricted_role.to_string(),
            session: Mutex::new(Session::default()),
        }
    }

    /// `SET ROLE` cannot take a bind parameter, so the role name is
    /// validated against a strict identifier charset and quoted.
    fn role_statement(role: &str) -> Result<String, TenantAccessError> {
        if !is_valid_role_name(role) {
            return Err(TenantAccessError::strategy_sync(
                None,
                sqlx::Error::Configuration(
                    format!("invalid database role name: {role}").into(),
                ),
            ));
        }
        Ok(format!("SET ROLE {}", quote_identifier(role)))
    }

    async fn install(
        conn: &mut PoolConnection<Postgres>,
        set_role: &str,
        ctx: &TenantContext,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(set_role).execute(&mut **conn).await?;
        for (key, value) in [
            (ORGANIZATION_ID_VAR, ctx.organization_id()),
            (USER_ID_VAR, ctx.user_id()),
            (USER_ROLE_VAR, ctx.user_role()),
        ] {
            sqlx::query("SELECT set_config($1, $2, false)")
                .bind(key)
                .bind(value)
                .execute(&mut **conn)
                .await?;
        }
        Ok(())
    }

    /// Reconstruct the installed context from the session variables on the
    /// held connection. Returns `None` when any variable is unset or the
    /// read fails.
    async fn read_back(conn: &mut PoolConnection<Postgres>) -> Option<TenantContext> {
        let mut values = Vec::with_capacity(SESSION_VARS.len());
        for key in SESSION_VARS {
            let read = sqlx::query_scalar::<_, Option<String>>(
                "SELECT current_setting($1, true)",
            )
            .bind(key)
            .fetch_one(&mut **conn)
            .await;

            match read {
                Ok(Some(value)) if !value.is_empty() => values.push(value),
                Ok(_) => return None,
                Err(e) => {
                    warn!(variable = key, error = %e, "failed to read back tenant session variable");
                    return None;
                }
            }
        }

        let [org, user, role] = <[String; 3]>::try_from(values).ok()?;
        Some(TenantContext::new(org, user, role))
    }
}

#[async_trait]
impl IsolationStrategy for RlsIsolationStrategy {
    async fn set_tenant_context(&self, ctx: &TenantContext) -> Result<(), TenantAccessError> {
        policy::validate_tenant_context(ctx)?;
        let set_role = Self::role_statement(&self.restricted_role)?;

        let mut session = self.session.lock().await;
        let mut conn = match session.conn.take() {
            Some(conn) => conn,
            None => self
                .pool
                .acquire()
                .await
                .map_err(|e| TenantAccessError::strategy_sync(Some(ctx), e))?,
        };

        match Self::install(&mut conn, &set_role, ctx).await {
            Ok(()) => {
                session.conn = Some(conn);
                session.cached = Some(ctx.clone());
                Ok(())
            }
            Err(e) => {
                // The session state is suspect; release the connection so the
                // pool's release hook scrubs it, and leave the cache unset.
                session.cached = None;
                drop(conn);
                Err(TenantAccessError::strategy_sync(Some(ctx), e))
            }
        }
    }

    async fn clear_tenant_context(&self) -> Result<(), TenantAccessError> {
        let set_role = Self::role_statement(&self.unrestricted_role)?;

        let mut session = self.session.lock().await;
        session.cached = None;
        let Some(mut conn) = session.conn.take() else {
            return Ok(());
        };

        let result = async {
            sqlx::query(&set_role).execute(&mut *conn).await?;
            for key in SESSION_VARS {
                sqlx::query("SELECT set_config($1, '', false)")
                    .bind(key)
                    .execute(&mut *conn)
                    .await?;
            }
            Ok::<_, sqlx::Error>(())
        }
        .await;

        // Either way the connection goes back to the pool, where the release
        // hook resets role and session variables again.
        drop(conn);
        result.map_err(|e| TenantAccessError::strategy_sync(None, e))
    }

    async fn current_tenant_context(&self) -> Option<TenantContext> {
        let mut session = self.session.lock().await;
        if let Some(cached) = &session.cached {
            return Some(cached.clone());
        }
        // The cache and the connection normally travel together, so this
        // read-back only fires if that pairing is ever broken.
        let conn = session.conn.as_mut()?;
        Self::read_back(conn).await
    }

    async fn validate_tenant_context(&self, expected: &TenantContext) -> bool {
        // Consistency check against the live session variables, not the
        // cache; a drifted session must not validate.
        let mut session = self.session.lock().await;
        let Some(conn) = session.conn.as_mut() else {
            return false;
        };
        match Self::read_back(conn).await {
            Some(current) => current == *expected,
            None => false,
        }
    }

    async fn validate_rls_configuration(&self) -> bool {
        let role_count: i64 = match sqlx::query_scalar(
            "SELECT COUNT(*) FROM pg_roles WHERE rolname = $1",
        )
        .bind(&self.restricted_role)
        .fetch_one(&self.pool)
        .await
        {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "could not query pg_roles during RLS health check");
                return false;
            }
        };
        if role_count == 0 {
            warn!(role = %self.restricted_role, "restricted database role does not exist");
            return false;
        }

        // Policies follow the migrations' tenant_isolation_<table> naming.
        let policy_count: i64 = match sqlx::query_scalar(
            "SELECT COUNT(*) FROM pg_policies WHERE policyname LIKE 'tenant_isolation%'",
        )
        .fetch_one(&self.pool)
        .await
        {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "could not query pg_policies during RLS health check");
                return false;
            }
        };
        if policy_count == 0 {
            warn!("no tenant isolation policies are registered");
            return false;
        }

        true
    }

    fn invalidate(&self) {
        match self.session.try_lock() {
            Ok(mut session) => {
                session.cached = None;
                // Dropping the connection returns it to the pool, where the
                // release hook resets role and session variables.
                session.conn = None;
            }
            Err(_) => {
                warn!("tenant session lock was held during unwind; session not discarded");
            }
        }
    }
}

/// Quote a SQL identifier to prevent injection.
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Role names come from configuration, not request input, but are still held
/// to a strict charset before being spliced into a `SET ROLE` statement.
fn is_valid_role_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
