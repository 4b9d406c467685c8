use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::tenant::context::TenantContext;
use crate::tenant::error::TenantAccessError;
use crate::tenant::policy;

use super::IsolationStrategy;

/// In-process isolation strategy: application-level scoping only, no
/// datastore session to mirror into. Used by tests and by deployments that
/// rely purely on query-level tenant filters.
#[derive(Debug, Default)]
pub struct MemoryIsolationStrategy {
    cached: RwLock<Option<TenantContext>>,
}

impl MemoryIsolationStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IsolationStrategy for MemoryIsolationStrategy {
    async fn set_tenant_context(&self, ctx: &TenantContext) -> Result<(), TenantAccessError> {
        policy::validate_tenant_context(ctx)?;
        *self.cached.write().await = Some(ctx.clone());
        Ok(())
    }

    async fn clear_tenant_context(&self) -> Result<(), TenantAccessError> {
        self.cached.write().await.take();
        Ok(())
    }

    async fn current_tenant_context(&self) -> Option<TenantContext> {
        self.cached.read().await.clone()
    }

    async fn validate_rls_configuration(&self) -> bool {
        // No datastore layer to verify.
        true
    }

    fn invalidate(&self) {
        match self.cached.try_write() {
            Ok(mut cached) => {
                cached.take();
            }
            Err(_) => {
                tracing::error!("tenant context cache was locked during unwind; not discarded");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::tenant::strategy::execute_in_tenant_context;

    fn ctx(org: &str) -> TenantContext {
        TenantContext::new(org, "user-1", "owner")
    }

    #[tokio::test]
    async fn set_then_current_round_trips() {
        let strategy = MemoryIsolationStrategy::new();
        assert_eq!(strategy.current_tenant_context().await, None);

        strategy.set_tenant_context(&ctx("org-1")).await.unwrap();
        assert_eq!(strategy.current_tenant_context().await.unwrap(), ctx("org-1"));
        assert!(strategy.validate_tenant_context(&ctx("org-1")).await);
        assert!(!strategy.validate_tenant_context(&ctx("org-2")).await);

        strategy.clear_tenant_context().await.unwrap();
        assert_eq!(strategy.current_tenant_context().await, None);
    }

    #[tokio::test]
    async fn incomplete_contexts_are_rejected_and_cache_stays_unset() {
        let strategy = MemoryIsolationStrategy::new();
        let err = strategy
            .set_tenant_context(&TenantContext::new("", "user-1", "owner"))
            .await
            .unwrap_err();
        assert!(matches!(err, TenantAccessError::MissingField { .. }));
        assert_eq!(strategy.current_tenant_context().await, None);
    }

    #[tokio::test]
    async fn clear_is_safe_when_nothing_was_set() {
        let strategy = MemoryIsolationStrategy::new();
        assert!(strategy.clear_tenant_context().await.is_ok());
    }

    #[tokio::test]
    async fn execute_restores_the_previous_context() {
        let strategy = MemoryIsolationStrategy::new();
        strategy.set_tenant_context(&ctx("before")).await.unwrap();

        let value = execute_in_tenant_context(&strategy, &ctx("scoped"), || async {
            assert_eq!(
                strategy.current_tenant_context().await.unwrap(),
                ctx("scoped")
            );
            Ok::<_, TenantAccessError>(42)
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(strategy.current_tenant_context().await.unwrap(), ctx("before"));
    }

    #[tokio::test]
    async fn execute_clears_when_nothing_was_set_before() {
        let strategy = MemoryIsolationStrategy::new();

        let _ = execute_in_tenant_context(&strategy, &ctx("scoped"), || async {
            Ok::<_, TenantAccessError>(())
        })
        .await;

        assert_eq!(strategy.current_tenant_context().await, None);
    }

    #[tokio::test]
    async fn execute_restores_even_when_the_operation_fails() {
        let strategy = MemoryIsolationStrategy::new();
        strategy.set_tenant_context(&ctx("before")).await.unwrap();

        let result: Result<(), _> =
            execute_in_tenant_context(&strategy, &ctx("scoped"), || async {
                Err(TenantAccessError::missing_context())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(strategy.current_tenant_context().await.unwrap(), ctx("before"));
    }

    #[tokio::test]
    async fn execute_discards_the_scoped_context_when_the_operation_panics() {
        let strategy = Arc::new(MemoryIsolationStrategy::new());
        strategy.set_tenant_context(&ctx("before")).await.unwrap();

        let scoped = Arc::clone(&strategy);
        let handle = tokio::spawn(async move {
            let _: Result<(), TenantAccessError> =
                execute_in_tenant_context(scoped.as_ref(), &ctx("scoped"), || async {
                    panic!("scoped operation failed");
                })
                .await;
        });
        assert!(handle.await.is_err());

        // The async restore never ran; the scope must be discarded, not leaked.
        assert_eq!(strategy.current_tenant_context().await, None);
    }

    #[tokio::test]
    async fn execute_discards_the_scoped_context_when_the_task_is_cancelled() {
        let strategy = Arc::new(MemoryIsolationStrategy::new());
        strategy.set_tenant_context(&ctx("before")).await.unwrap();

        let scoped = Arc::clone(&strategy);
        let handle = tokio::spawn(async move {
            let _: Result<(), TenantAccessError> =
                execute_in_tenant_context(scoped.as_ref(), &ctx("scoped"), || async {
                    std::future::pending::<()>().await;
                    Ok(())
                })
                .await;
        });

        // Wait until the scoped context is installed, then cancel the task.
        for _ in 0..500 {
            if strategy.current_tenant_context().await == Some(ctx("scoped")) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(strategy.current_tenant_context().await, Some(ctx("scoped")));

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());

        // A later caller must never observe the cancelled task's scope.
        assert_eq!(strategy.current_tenant_context().await, None);
    }
}
