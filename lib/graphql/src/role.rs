//! Viewer roles and the roles that may not use the integration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Roles that are refused before any target operation is sent.
pub const DENIED_ROLES: [&str; 2] = ["TenantMember", "TenantSupport"];

/// The role of the authenticated viewer, as reported by the API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewerRole(String);

impl ViewerRole {
    #[must_use]
    pub fn new(role: impl Into<String>) -> Self {
        Self(role.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }

    /// Returns true if this role is on the deny list.
    ///
    /// Comparison is exact.
    #[must_use]
    pub fn is_denied(&self) -> bool {
        DENIED_ROLES.contains(&self.0.as_str())
    }
}

impl fmt::Display for ViewerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_list() {
        assert!(ViewerRole::new("TenantMember").is_denied());
        assert!(ViewerRole::new("TenantSupport").is_denied());
        assert!(!ViewerRole::new("TenantAdmin").is_denied());
        assert!(!ViewerRole::new("tenantmember").is_denied());
    }
}
