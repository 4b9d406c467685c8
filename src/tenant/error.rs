use thiserror::Error;

use super::context::TenantContext;

/// Failures raised by the tenant-isolation core.
///
/// The access policy and propagator always raise; callers never swallow
/// these, they propagate to the request pipeline which maps them to a
/// denial response. The only operations that convert failures into
/// empty/false instead are the diagnostic reads on the isolation strategy.
#[derive(Debug, Error)]
pub enum TenantAccessError {
    #[error("no tenant context is active")]
    MissingContext,

    #[error("tenant context is missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("organization mismatch: context is scoped to '{have}', requested '{want}'")]
    OrganizationMismatch { have: String, want: String },

    #[error("user '{user_id}' in organization '{organization_id}' lacks permission '{permission}'")]
    InsufficientPermissions {
        user_id: String,
        organization_id: String,
        permission: String,
    },

    #[error("user '{user_id}' in organization '{organization_id}' denied access to {resource_type} '{resource_id}'")]
    ResourceAccessDenied {
        user_id: String,
        organization_id: String,
        resource_id: String,
        resource_type: String,
    },

    /// A datastore error encountered while installing or clearing the tenant
    /// session state. Fatal to the current unit of work: scoping cannot be
    /// assumed safe if it could not be confirmed.
    #[error("failed to synchronize tenant context onto the database session")]
    StrategySync {
        organization_id: Option<String>,
        user_id: Option<String>,
        #[source]
        source: sqlx::Error,
    },
}

impl TenantAccessError {
    pub fn missing_context() -> Self {
        Self::MissingContext
    }

    pub fn missing_field(field: &'static str) -> Self {
        Self::MissingField { field }
    }

    pub fn organization_mismatch(have: impl Into<String>, want: impl Into<String>) -> Self {
        Self::OrganizationMismatch {
            have: have.into(),
            want: want.into(),
        }
    }

    pub fn insufficient_permissions(
        user_id: impl Into<String>,
        organization_id: impl Into<String>,
        permission: impl Into<String>,
    ) -> Self {
        Self::InsufficientPermissions {
            user_id: user_id.into(),
            organization_id: organization_id.into(),
            permission: permission.into(),
        }
    }

    pub fn resource_access_denied(
        user_id: impl Into<String>,
        organization_id: impl Into<String>,
        resource_id: impl Into<String>,
        resource_type: impl Into<String>,
    ) -> Self {
        Self::ResourceAccessDenied {
            user_id: user_id.into(),
            organization_id: organization_id.into(),
            resource_id: resource_id.into(),
            resource_type: resource_type.into(),
        }
    }

    /// Wrap a datastore error, carrying the identity being installed (when
    /// known) for diagnostics.
    pub fn strategy_sync(context: Option<&TenantContext>, source: sqlx::Error) -> Self {
        Self::StrategySync {
            organization_id: context.map(|c| c.organization_id().to_string()),
            user_id: context.map(|c| c.user_id().to_string()),
            source,
        }
    }

    /// Organization carried by this failure, if any.
    pub fn organization_id(&self) -> Option<&str> {
        match self {
            Self::OrganizationMismatch { have, .. } => Some(have),
            Self::InsufficientPermissions {
                organization_id, ..
            }
            | Self::ResourceAccessDenied {
                organization_id, ..
            } => Some(organization_id),
            Self::StrategySync {
                organization_id, ..
            } => organization_id.as_deref(),
            _ => None,
        }
    }
}
