use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;

/// Immutable identity and scope bundle for one logical unit of work.
///
/// A context is built once per request (or per background operation) from an
/// externally-verified principal, lives for the duration of that operation,
/// and is never persisted. Two contexts are equal iff organization, user and
/// role match; permissions and metadata are additive extensions and never
/// participate in equality.
#[derive(Debug, Clone, Serialize)]
pub struct TenantContext {
    organization_id: String,
    user_id: String,
    user_role: String,
    #[serde(skip_serializing_if = "HashSet::is_empty")]
    permissions: HashSet<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    metadata: HashMap<String, Value>,
}

impl TenantContext {
    pub fn new(
        organization_id: impl Into<String>,
        user_id: impl Into<String>,
        user_role: impl Into<String>,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            user_id: user_id.into(),
            user_role: user_role.into(),
            permissions: HashSet::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn user_role(&self) -> &str {
        &self.user_role
    }

    pub fn permissions(&self) -> &HashSet<String> {
        &self.permissions
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    /// Whether an explicit permission grant is present on top of the role.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    /// All three required identity fields are populated.
    pub fn is_complete(&self) -> bool {
        !self.organization_id.is_empty() && !self.user_id.is_empty() && !self.user_role.is_empty()
    }

    /// Return a new context carrying additional explicit permission grants.
    /// The receiver is untouched; identity fields are preserved, so the copy
    /// compares equal to the original.
    pub fn with_permissions<I, S>(&self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = self.clone();
        next.permissions
            .extend(permissions.into_iter().map(Into::into));
        next
    }

    /// Return a new context carrying an additional metadata entry. Metadata
    /// is non-authoritative and used only for logging and audit trails.
    pub fn with_metadata(&self, key: impl Into<String>, value: Value) -> Self {
        let mut next = self.clone();
        next.metadata.insert(key.into(), value);
        next
    }
}

// Identity equality only: permissions/metadata are excluded.
impl PartialEq for TenantContext {
    fn eq(&self, other: &Self) -> bool {
        self.organization_id == other.organization_id
            && self.user_id == other.user_id
            && self.user_role == other.user_role
    }
}

impl Eq for TenantContext {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn complete_requires_all_three_fields() {
        assert!(TenantContext::new("org-1", "user-1", "viewer").is_complete());
        assert!(!TenantContext::new("", "user-1", "viewer").is_complete());
        assert!(!TenantContext::new("org-1", "", "viewer").is_complete());
        assert!(!TenantContext::new("org-1", "user-1", "").is_complete());
    }

    #[test]
    fn equality_ignores_permissions_and_metadata() {
        let base = TenantContext::new("org-1", "user-1", "manager");
        let extended = base
            .with_permissions(["export_reports"])
            .with_metadata("request_id", json!("abc-123"));

        assert_eq!(base, extended);
        assert!(extended.has_permission("export_reports"));
        assert!(!base.has_permission("export_reports"));
    }

    #[test]
    fn equality_is_over_identity_fields() {
        let a = TenantContext::new("org-1", "user-1", "manager");
        assert_ne!(a, TenantContext::new("org-2", "user-1", "manager"));
        assert_ne!(a, TenantContext::new("org-1", "user-2", "manager"));
        assert_ne!(a, TenantContext::new("org-1", "user-1", "viewer"));
    }

    #[test]
    fn extension_does_not_mutate_the_original() {
        let base = TenantContext::new("org-1", "user-1", "pumper");
        let _ = base.with_permissions(["write_production"]);
        assert!(base.permissions().is_empty());
    }
}
