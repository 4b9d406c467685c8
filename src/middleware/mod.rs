pub mod auth;
pub mod tenant_scope;

pub use auth::{jwt_auth_middleware, AuthPrincipal};
pub use tenant_scope::tenant_scope_middleware;
