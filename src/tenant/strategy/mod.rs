//! Isolation strategies: synchronize the in-process [`TenantContext`] onto
//! an enforcement surface.
//!
//! The strategy pattern decouples application-level scoping from the
//! datastore's own row-level enforcement: [`MemoryIsolationStrategy`] keeps
//! everything in-process, [`RlsIsolationStrategy`] additionally switches the
//! database session onto the restricted role so row-level-security policies
//! activate.

pub mod memory;
pub mod rls;

use std::future::Future;

use async_trait::async_trait;

use super::context::TenantContext;
use super::error::TenantAccessError;

pub use memory::MemoryIsolationStrategy;
pub use rls::RlsIsolationStrategy;

#[async_trait]
pub trait IsolationStrategy: Send + Sync {
    /// Synchronize `ctx` onto the enforcement surface. On failure the
    /// strategy's cache is left unset and the error carries the identity
    /// being installed for diagnostics.
    async fn set_tenant_context(&self, ctx: &TenantContext) -> Result<(), TenantAccessError>;

    /// Tear the enforcement surface back down to its unscoped state. Safe to
    /// call when no context was previously set.
    async fn clear_tenant_context(&self) -> Result<(), TenantAccessError>;

    /// Best-effort view of the currently installed context: the in-memory
    /// cache when present, otherwise reconstructed from the enforcement
    /// surface. Read failures are swallowed and reported as `None`.
    async fn current_tenant_context(&self) -> Option<TenantContext>;

    /// Consistency check, not an enforcement gate: does the installed
    /// context match `expected` by identity equality?
    async fn validate_tenant_context(&self, expected: &TenantContext) -> bool {
        match self.current_tenant_context().await {
            Some(current) => current == *expected,
            None => false,
        }
    }

    /// Diagnostic health check of the strategy's enforcement surface.
    /// Returns false (never raises) on any detection failure.
    async fn validate_rls_configuration(&self) -> bool;

    /// Synchronously discard any cached context and any held database
    /// session, skipping the async teardown. Invoked when a scoped
    /// operation unwinds (panic or task cancellation) and the restore can
    /// no longer run: the surface ends up unscoped rather than wrongly
    /// scoped, and a released connection is scrubbed by the pool's release
    /// hook before anyone can reuse it.
    fn invalidate(&self);
}

/// Run `operation` with `ctx` installed, then restore whatever context was
/// cached before the call, or clear if none was. The restore runs on every
/// exit path: straight-line code handles success and failure, and a drop
/// guard covers unwinding (a panicking operation or a cancelled task) by
/// discarding the scoped session outright. Either way no later caller can
/// observe the scoped context, which is what prevents context bleed between
/// sequential operations sharing one connection.
pub async fn execute_in_tenant_context<S, F, Fut, T>(
    strategy: &S,
    ctx: &TenantContext,
    operation: F,
) -> Result<T, TenantAccessError>
where
    S: IsolationStrategy + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, TenantAccessError>>,
{
    let previous = strategy.current_tenant_context().await;
    strategy.set_tenant_context(ctx).await?;

    let mut guard = UnwindGuard {
        strategy,
        armed: true,
    };

    let result = operation().await;

    let restored = match previous {
        Some(prev) => strategy.set_tenant_context(&prev).await,
        None => strategy.clear_tenant_context().await,
    };
    // The async teardown ran; the unwind path is no longer needed.
    guard.armed = false;

    if let Err(restore_err) = restored {
        tracing::error!(
            organization_id = ctx.organization_id(),
            error = %restore_err,
            "failed to restore prior tenant context after scoped operation"
        );
        // A successful operation whose scope could not be torn down is not
        // safe to report as success.
        if result.is_ok() {
            return Err(restore_err);
        }
    }

    result
}

/// Covers the exit paths the straight-line restore cannot: if the enclosing
/// future is dropped mid-operation (task cancellation) or the operation
/// panics, the guard tears the scoped session down synchronously via
/// [`IsolationStrategy::invalidate`].
struct UnwindGuard<'a, S: IsolationStrategy + ?Sized> {
    strategy: &'a S,
    armed: bool,
}

impl<S: IsolationStrategy + ?Sized> Drop for UnwindGuard<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("scoped tenant operation unwound; discarding its session state");
            self.strategy.invalidate();
        }
    }
}
