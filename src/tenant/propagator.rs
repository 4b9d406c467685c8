//! Task-scoped propagation of the active [`TenantContext`].
//!
//! Each logical unit of work (a request, a background job) gets its own
//! private slot via `tokio::task_local!`, so concurrently-running units
//! never observe each other's value even when they hop worker threads while
//! suspended. A plain process-global slot is exactly the cross-tenant-leak
//! anti-pattern this module exists to avoid, so `set_context` outside any
//! unit-of-work scope is an error rather than a global write.

use std::cell::RefCell;
use std::future::Future;

use super::context::TenantContext;
use super::error::TenantAccessError;
use super::policy::roles;

tokio::task_local! {
    static ACTIVE_CONTEXT: RefCell<Option<TenantContext>>;
}

/// Open an empty context slot for one unit of work and run `fut` inside it.
/// The request pipeline wraps every inbound request in a scope; background
/// jobs and tests do the same around their own futures.
pub async fn scope<F>(fut: F) -> F::Output
where
    F: Future,
{
    ACTIVE_CONTEXT.scope(RefCell::new(None), fut).await
}

/// Run `fut` with `ctx` active. The installed value cannot leak outside this
/// call: the slot nests as a stack, so whatever was active before becomes
/// observable again once `fut` completes, errors, or panics.
pub async fn run_in_context<F>(ctx: TenantContext, fut: F) -> F::Output
where
    F: Future,
{
    ACTIVE_CONTEXT.scope(RefCell::new(Some(ctx)), fut).await
}

/// Install `ctx` as active for the remainder of the current unit of work,
/// overwriting any previously active value in this scope.
pub fn set_context(ctx: TenantContext) -> Result<(), TenantAccessError> {
    ACTIVE_CONTEXT
        .try_with(|slot| {
            *slot.borrow_mut() = Some(ctx);
        })
        .map_err(|_| {
            tracing::warn!("set_context called outside any unit-of-work scope");
            TenantAccessError::missing_context()
        })
}

/// The active context for the current unit of work, if any.
pub fn get_context() -> Option<TenantContext> {
    ACTIVE_CONTEXT
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten()
}

/// Remove the active value. Safe to call when nothing is installed or when
/// no scope is open.
pub fn clear_context() {
    let _ = ACTIVE_CONTEXT.try_with(|slot| slot.borrow_mut().take());
}

fn require_field(
    value: Option<String>,
) -> Result<String, TenantAccessError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(TenantAccessError::missing_context()),
    }
}

pub fn organization_id() -> Result<String, TenantAccessError> {
    require_field(get_context().map(|c| c.organization_id().to_string()))
}

pub fn user_id() -> Result<String, TenantAccessError> {
    require_field(get_context().map(|c| c.user_id().to_string()))
}

pub fn user_role() -> Result<String, TenantAccessError> {
    require_field(get_context().map(|c| c.user_role().to_string()))
}

pub fn has_role(role: &str) -> bool {
    get_context().map(|c| c.user_role() == role).unwrap_or(false)
}

pub fn is_owner() -> bool {
    has_role(roles::OWNER)
}

pub fn is_manager() -> bool {
    has_role(roles::MANAGER)
}

pub fn is_pumper() -> bool {
    has_role(roles::PUMPER)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(org: &str) -> TenantContext {
        TenantContext::new(org, "user-1", "manager")
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        scope(async {
            assert_eq!(get_context(), None);
            set_context(ctx("org-1")).unwrap();
            assert_eq!(get_context().unwrap(), ctx("org-1"));

            // Overwrite within the same scope.
            set_context(ctx("org-2")).unwrap();
            assert_eq!(get_context().unwrap().organization_id(), "org-2");

            clear_context();
            assert_eq!(get_context(), None);
        })
        .await;
    }

    #[tokio::test]
    async fn set_outside_any_scope_is_rejected() {
        let err = set_context(ctx("org-1")).unwrap_err();
        assert!(matches!(err, TenantAccessError::MissingContext));
        assert_eq!(get_context(), None);
    }

    #[tokio::test]
    async fn nested_scopes_restore_the_outer_value() {
        run_in_context(ctx("outer"), async {
            assert_eq!(get_context().unwrap().organization_id(), "outer");

            run_in_context(ctx("inner"), async {
                assert_eq!(get_context().unwrap().organization_id(), "inner");
            })
            .await;

            assert_eq!(get_context().unwrap().organization_id(), "outer");
        })
        .await;
    }

    #[tokio::test]
    async fn restore_law_holds_through_errors() {
        run_in_context(ctx("outer"), async {
            let result: Result<(), &str> = run_in_context(ctx("inner"), async {
                assert_eq!(get_context().unwrap().organization_id(), "inner");
                Err("operation failed")
            })
            .await;

            assert!(result.is_err());
            assert_eq!(get_context().unwrap().organization_id(), "outer");
        })
        .await;
    }

    #[tokio::test]
    async fn inner_mutation_does_not_leak_outward() {
        run_in_context(ctx("outer"), async {
            run_in_context(ctx("inner"), async {
                set_context(ctx("mutated")).unwrap();
                clear_context();
            })
            .await;

            assert_eq!(get_context().unwrap().organization_id(), "outer");
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_units_never_observe_each_other() {
        let mut handles = Vec::new();
        for i in 0..32 {
            handles.push(tokio::spawn(run_in_context(
                ctx(&format!("org-{i}")),
                async move {
                    // Yield repeatedly so tasks interleave and migrate
                    // across worker threads while suspended.
                    for _ in 0..50 {
                        tokio::task::yield_now().await;
                        assert_eq!(
                            get_context().unwrap().organization_id(),
                            format!("org-{i}"),
                        );
                    }
                },
            )));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn accessors_fail_without_an_active_context() {
        scope(async {
            assert!(organization_id().is_err());
            assert!(user_id().is_err());
            assert!(user_role().is_err());
            assert!(!has_role("manager"));

            set_context(TenantContext::new("org-1", "user-1", "pumper")).unwrap();
            assert_eq!(organization_id().unwrap(), "org-1");
            assert_eq!(user_id().unwrap(), "user-1");
            assert_eq!(user_role().unwrap(), "pumper");
            assert!(is_pumper());
            assert!(!is_owner());
            assert!(!is_manager());
        })
        .await;
    }
}
