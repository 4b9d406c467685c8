use std::sync::Arc;

use tracing::{info, warn};

use super::context::TenantContext;
use super::error::TenantAccessError;
use super::policy;
use super::propagator;
use super::strategy::IsolationStrategy;

/// Application-facing orchestration over the tenant-isolation core:
/// validate via the access policy, install via the propagator, mirror via
/// the isolation strategy.
#[derive(Clone)]
pub struct TenantContextService {
    strategy: Arc<dyn IsolationStrategy>,
}

impl TenantContextService {
    pub fn new(strategy: Arc<dyn IsolationStrategy>) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> &Arc<dyn IsolationStrategy> {
        &self.strategy
    }

    /// Validate `ctx`, install it for the current unit of work, and mirror
    /// it onto the isolation strategy. Overwriting an active context from a
    /// different organization is legal (elevated flows do this) but logged.
    pub async fn set_context(&self, ctx: TenantContext) -> Result<(), TenantAccessError> {
        policy::validate_tenant_context(&ctx)?;

        if let Some(active) = propagator::get_context() {
            if !policy::is_same_tenant(&active, &ctx) {
                warn!(
                    previous_organization_id = active.organization_id(),
                    organization_id = ctx.organization_id(),
                    user_id = ctx.user_id(),
                    "replacing active tenant context with a different organization"
                );
            }
        }

        propagator::set_context(ctx.clone())?;
        self.strategy.set_tenant_context(&ctx).await?;

        info!(
            organization_id = ctx.organization_id(),
            user_id = ctx.user_id(),
            user_role = ctx.user_role(),
            "tenant context installed"
        );
        Ok(())
    }

    /// Tear down both the propagated and the mirrored context. Never raises
    /// when there is nothing to clear.
    pub async fn clear_context(&self) -> Result<(), TenantAccessError> {
        propagator::clear_context();
        self.strategy.clear_tenant_context().await
    }

    /// Check that the active context may reach `requested_organization_id`,
    /// and optionally that it may perform a specific action there.
    pub async fn validate_access(
        &self,
        requested_organization_id: &str,
        permission: Option<&str>,
    ) -> Result<(), TenantAccessError> {
        let ctx = propagator::get_context().ok_or_else(TenantAccessError::missing_context)?;

        policy::validate_tenant_access(&ctx, requested_organization_id)?;

        if let Some(permission) = permission {
            if !policy::can_perform_action(&ctx, permission, Some(requested_organization_id)) {
                warn!(
                    organization_id = ctx.organization_id(),
                    user_id = ctx.user_id(),
                    permission,
                    "action denied by role matrix"
                );
                return Err(TenantAccessError::insufficient_permissions(
                    ctx.user_id(),
                    ctx.organization_id(),
                    permission,
                ));
            }
        }

        Ok(())
    }

    /// Diagnostic: is the datastore's row-level enforcement layer in place?
    pub async fn rls_configured(&self) -> bool {
        self.strategy.validate_rls_configuration().await
    }
}
