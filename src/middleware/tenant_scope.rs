use axum::{extract::Request, middleware::Next, response::Response};
use tracing::debug;

use crate::error::ApiError;
use crate::tenant::{policy, propagator, TenantContext};

use super::auth::AuthPrincipal;

/// Enforcement point: derive a [`TenantContext`] from the authenticated
/// principal and install it for the lifetime of the request.
///
/// This gate is intentionally dumb — every real decision lives in the access
/// policy. Anonymous callers are denied outright; no context is ever
/// installed for them. Downstream handlers read the active context through
/// the propagator, and the scope unwinds on every exit path, so nothing
/// leaks into concurrently handled requests.
pub async fn tenant_scope_middleware(
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = request
        .extensions()
        .get::<AuthPrincipal>()
        .cloned()
        .ok_or_else(|| ApiError::unauthorized("Authentication required before tenant scoping"))?;

    let ctx = TenantContext::new(
        principal.organization_id,
        principal.user_id,
        principal.role,
    );
    policy::validate_tenant_context(&ctx)?;

    debug!(
        organization_id = ctx.organization_id(),
        user_id = ctx.user_id(),
        "tenant scope established for request"
    );

    Ok(propagator::run_in_context(ctx, next.run(request)).await)
}
