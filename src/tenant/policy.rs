//! Pure tenant-access rules, free of I/O.
//!
//! Centralizing these as pure functions keeps the same authorization
//! decision regardless of which enforcement surface (middleware, use case,
//! repository helper) asks, and makes the rules exhaustively testable.

use super::context::TenantContext;
use super::error::TenantAccessError;

/// Role names recognized by the platform.
pub mod roles {
    pub const OWNER: &str = "owner";
    pub const MANAGER: &str = "manager";
    pub const PUMPER: &str = "pumper";
    pub const VIEWER: &str = "viewer";
    pub const ADMIN: &str = "admin";
    pub const SUPER_ADMIN: &str = "super_admin";
}

/// Actions checked against the role matrix.
pub mod actions {
    pub const READ: &str = "read";
    pub const WRITE: &str = "write";
    pub const DELETE: &str = "delete";
    pub const ADMIN: &str = "admin";
    pub const WRITE_PRODUCTION: &str = "write_production";
}

/// Validate that a context carries all three required identity fields,
/// reporting the first absent one in fixed priority order.
pub fn validate_tenant_context(ctx: &TenantContext) -> Result<(), TenantAccessError> {
    if ctx.organization_id().is_empty() {
        return Err(TenantAccessError::missing_field("organization_id"));
    }
    if ctx.user_id().is_empty() {
        return Err(TenantAccessError::missing_field("user_id"));
    }
    if ctx.user_role().is_empty() {
        return Err(TenantAccessError::missing_field("user_role"));
    }
    Ok(())
}

/// Fail unless the context is scoped to exactly the requested organization.
pub fn validate_tenant_access(
    ctx: &TenantContext,
    requested_organization_id: &str,
) -> Result<(), TenantAccessError> {
    if ctx.organization_id() == requested_organization_id {
        Ok(())
    } else {
        Err(TenantAccessError::organization_mismatch(
            ctx.organization_id(),
            requested_organization_id,
        ))
    }
}

/// Elevated roles may reach across organization boundaries.
pub fn can_access_multiple_organizations(ctx: &TenantContext) -> bool {
    matches!(ctx.user_role(), roles::ADMIN | roles::SUPER_ADMIN)
}

/// Resolve the organization id actually used for a query, accounting for
/// possible elevated cross-tenant access.
pub fn effective_organization_id(
    ctx: &TenantContext,
    requested_organization_id: Option<&str>,
) -> Result<String, TenantAccessError> {
    if let Some(requested) = requested_organization_id.filter(|r| !r.is_empty()) {
        if can_access_multiple_organizations(ctx) {
            return Ok(requested.to_string());
        }
    }
    if ctx.organization_id().is_empty() {
        return Err(TenantAccessError::missing_field("organization_id"));
    }
    Ok(ctx.organization_id().to_string())
}

/// Role → allowed-actions matrix with deny-by-default.
///
/// When `resource_organization_id` names a different organization than the
/// context, the answer is exactly [`can_access_multiple_organizations`]:
/// cross-tenant actions require an elevated role regardless of the matrix.
pub fn can_perform_action(
    ctx: &TenantContext,
    action: &str,
    resource_organization_id: Option<&str>,
) -> bool {
    if !ctx.is_complete() {
        return false;
    }
    if let Some(resource_org) = resource_organization_id {
        if resource_org != ctx.organization_id() {
            return can_access_multiple_organizations(ctx);
        }
    }
    allowed_actions(ctx.user_role()).contains(&action)
}

fn allowed_actions(role: &str) -> &'static [&'static str] {
    match role {
        roles::OWNER => &[actions::READ, actions::WRITE, actions::DELETE, actions::ADMIN],
        roles::MANAGER => &[actions::READ, actions::WRITE],
        roles::PUMPER => &[actions::READ, actions::WRITE_PRODUCTION],
        roles::VIEWER => &[actions::READ],
        _ => &[],
    }
}

pub fn is_same_tenant(a: &TenantContext, b: &TenantContext) -> bool {
    a.organization_id() == b.organization_id()
}

/// SQL scoping predicate for application-level row filtering. The clause is
/// a fixed fragment; the organization id is carried as a bind value and must
/// never be interpolated into query text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantFilter {
    pub clause: &'static str,
    pub organization_id: String,
}

pub fn tenant_filter(organization_id: &str) -> Result<TenantFilter, TenantAccessError> {
    if organization_id.is_empty() {
        return Err(TenantAccessError::missing_field("organization_id"));
    }
    Ok(TenantFilter {
        clause: "organization_id = $1",
        organization_id: organization_id.to_string(),
    })
}
