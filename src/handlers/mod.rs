use axum::{
    extract::{Extension, Query},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::database::manager::DatabaseManager;
use crate::error::ApiError;
use crate::tenant::{propagator, TenantAccessError, TenantContextService};

/// GET / - service banner
pub async fn root() -> Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    Json(json!({
        "success": true,
        "data": {
            "name": "Wellfield API",
            "version": version,
            "description": "Multi-tenant oil & gas data platform backend",
            "endpoints": {
                "home": "/ (public)",
                "health": "/health (public)",
                "whoami": "/api/auth/whoami (protected)",
                "tenant_validate": "/api/tenant/validate (protected)",
                "tenant_health": "/api/tenant/health (protected)",
            }
        }
    }))
}

/// GET /health - liveness plus database connectivity
pub async fn health() -> (axum::http::StatusCode, Json<Value>) {
    let now = chrono::Utc::now();

    match DatabaseManager::health_check().await {
        Ok(_) => (
            axum::http::StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok"
                }
            })),
        ),
        Err(e) => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "success": false,
                "error": "database unavailable",
                "data": {
                    "status": "degraded",
                    "timestamp": now,
                    "database_error": e.to_string()
                }
            })),
        ),
    }
}

/// GET /api/auth/whoami - the tenant context active for this request
pub async fn whoami() -> Result<Json<Value>, ApiError> {
    let ctx = propagator::get_context().ok_or_else(TenantAccessError::missing_context)?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "organization_id": ctx.organization_id(),
            "user_id": ctx.user_id(),
            "user_role": ctx.user_role(),
            "permissions": ctx.permissions(),
        }
    })))
}

#[derive(Debug, Deserialize)]
pub struct ValidateParams {
    pub organization_id: String,
    pub permission: Option<String>,
}

/// GET /api/tenant/validate - may the active context reach the requested
/// organization, optionally with a specific permission?
pub async fn tenant_validate(
    Extension(service): Extension<TenantContextService>,
    Query(params): Query<ValidateParams>,
) -> Result<Json<Value>, ApiError> {
    service
        .validate_access(&params.organization_id, params.permission.as_deref())
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "organization_id": params.organization_id,
            "permission": params.permission,
            "allowed": true
        }
    })))
}

/// GET /api/tenant/health - is the datastore's row-level enforcement layer
/// configured? Diagnostic only; detection failures report false.
pub async fn tenant_health(
    Extension(service): Extension<TenantContextService>,
) -> Json<Value> {
    let configured = service.rls_configured().await;

    Json(json!({
        "success": true,
        "data": {
            "rls_configured": configured
        }
    }))
}
