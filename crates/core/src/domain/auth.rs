use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Permission token granting every capability.
pub const ADMIN_WILDCARD: &str = "*";

/// Resolved identity for one authenticated request or conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    user_id: String,
    key_id: Option<String>,
    permissions: BTreeSet<String>,
    dry_run_only: bool,
}

impl AuthContext {
    pub fn new<I, S>(
        user_id: impl Into<String>,
        key_id: Option<String>,
        permissions: I,
        dry_run_only: bool,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let permissions = permissions
            .into_iter()
            .map(Into::into)
            .map(|permission: String| permission.trim().to_ascii_lowercase())
            .filter(|permission| !permission.is_empty())
            .collect();

        Self { user_id: user_id.into(), key_id, permissions, dry_run_only }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self::new(user_id, None, [ADMIN_WILDCARD], false)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    pub fn permissions(&self) -> &BTreeSet<String> {
        &self.permissions
    }

    pub fn dry_run_only(&self) -> bool {
        self.dry_run_only
    }

    pub fn is_admin(&self) -> bool {
        self.permissions.contains(ADMIN_WILDCARD)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.is_admin() || self.permissions.contains(&permission.to_ascii_lowercase())
    }

    /// Key used for per-identity accounting: the API key when present, else the user.
    pub fn rate_limit_key(&self) -> &str {
        self.key_id.as_deref().unwrap_or(&self.user_id)
    }

    /// Whether `other` is the same principal (same user and same key).
    pub fn same_principal(&self, other: &AuthContext) -> bool {
        self.user_id == other.user_id && self.key_id == other.key_id
    }
}
