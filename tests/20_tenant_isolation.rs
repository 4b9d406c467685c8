//! End-to-end exercises of the tenant-isolation core over the in-memory
//! strategy: the set/validate/clear orchestration, restore discipline, and
//! isolation between concurrently-running units of work.

use std::sync::Arc;

use anyhow::Result;

use wellfield_api::tenant::strategy::execute_in_tenant_context;
use wellfield_api::tenant::{
    policy, propagator, IsolationStrategy, MemoryIsolationStrategy, TenantAccessError,
    TenantContext, TenantContextService,
};

fn service() -> TenantContextService {
    TenantContextService::new(Arc::new(MemoryIsolationStrategy::new()))
}

fn ctx(org: &str, user: &str, role: &str) -> TenantContext {
    TenantContext::new(org, user, role)
}

#[tokio::test]
async fn request_lifecycle_set_validate_clear() -> Result<()> {
    let service = service();

    propagator::scope(async {
        service
            .set_context(ctx("org-123", "user-1", "manager"))
            .await?;

        // Downstream code reads the active context through the propagator.
        assert_eq!(propagator::organization_id()?, "org-123");
        assert!(propagator::is_manager());

        // Manager may write but not delete within its own organization.
        service.validate_access("org-123", Some("write")).await?;
        let err = service
            .validate_access("org-123", Some("delete"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TenantAccessError::InsufficientPermissions { .. }
        ));

        // Cross-organization access is a mismatch, not a permission problem.
        let err = service.validate_access("org-999", None).await.unwrap_err();
        assert!(matches!(
            err,
            TenantAccessError::OrganizationMismatch { .. }
        ));

        service.clear_context().await?;
        assert!(propagator::get_context().is_none());
        assert!(service.strategy().current_tenant_context().await.is_none());

        Ok::<_, anyhow::Error>(())
    })
    .await
}

#[tokio::test]
async fn strategy_round_trip_and_clear() -> Result<()> {
    let strategy = MemoryIsolationStrategy::new();
    let installed = ctx("org-1", "user-1", "owner");

    strategy.set_tenant_context(&installed).await?;
    assert_eq!(
        strategy.current_tenant_context().await.as_ref(),
        Some(&installed)
    );
    assert!(strategy.validate_tenant_context(&installed).await);

    strategy.clear_tenant_context().await?;
    assert!(strategy.current_tenant_context().await.is_none());
    assert!(!strategy.validate_tenant_context(&installed).await);
    Ok(())
}

#[tokio::test]
async fn scoped_execution_restores_prior_context_after_failure() -> Result<()> {
    let strategy = MemoryIsolationStrategy::new();
    let before = ctx("org-before", "user-1", "owner");
    strategy.set_tenant_context(&before).await?;

    let result: Result<(), TenantAccessError> =
        execute_in_tenant_context(&strategy, &ctx("org-scoped", "user-2", "pumper"), || async {
            Err(TenantAccessError::resource_access_denied(
                "user-2",
                "org-scoped",
                "well-7",
                "well",
            ))
        })
        .await;

    assert!(result.is_err());
    assert_eq!(strategy.current_tenant_context().await.as_ref(), Some(&before));
    Ok(())
}

#[tokio::test]
async fn elevated_roles_resolve_a_foreign_effective_organization() {
    let admin = ctx("org-123", "user-1", "admin");
    let viewer = ctx("org-123", "user-2", "viewer");

    assert_eq!(
        policy::effective_organization_id(&admin, Some("org-999")).unwrap(),
        "org-999"
    );
    assert_eq!(
        policy::effective_organization_id(&viewer, Some("org-999")).unwrap(),
        "org-123"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_keep_their_own_tenant_scope() {
    // Many units of work in flight at once: each installs its own context
    // and must observe only its own value for its entire lifetime.
    let mut handles = Vec::new();
    for i in 0..24 {
        let service = service();
        handles.push(tokio::spawn(propagator::scope(async move {
            let org = format!("org-{i}");
            let user = format!("user-{i}");
            service
                .set_context(TenantContext::new(&org, &user, "pumper"))
                .await
                .unwrap();

            for _ in 0..25 {
                tokio::task::yield_now().await;
                assert_eq!(propagator::organization_id().unwrap(), org);
                assert_eq!(propagator::user_id().unwrap(), user);
                assert!(
                    service.validate_access(&org, Some("write_production")).await.is_ok()
                );
            }
        })));
    }

    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn anonymous_units_have_no_context_and_accessors_deny() {
    propagator::scope(async {
        assert!(propagator::get_context().is_none());
        let err = propagator::organization_id().unwrap_err();
        assert!(matches!(err, TenantAccessError::MissingContext));

        let service = service();
        let err = service.validate_access("org-1", None).await.unwrap_err();
        assert!(matches!(err, TenantAccessError::MissingContext));
    })
    .await;
}
