pub mod context;
pub mod error;
pub mod policy;
pub mod propagator;
pub mod service;
pub mod strategy;

pub use context::TenantContext;
pub use error::TenantAccessError;
pub use service::TenantContextService;
pub use strategy::{IsolationStrategy, MemoryIsolationStrategy, RlsIsolationStrategy};
