use serde::{Deserialize, Serialize};

/// Free-form attributes attached to a principal by the identity provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attrs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// The authenticated party a session speaks for.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub attrs: Attrs,
}

impl Principal {
    pub fn new<S: Into<String>>(user_id: S) -> Self {
        Self { user_id: user_id.into(), roles: vec!["user".into()], attrs: Attrs::default() }
    }

    pub fn with_role<S: Into<String>>(mut self, role: S) -> Self {
        let role = role.into();
        if !self.has_role(&role) { self.roles.push(role); }
        self
    }

    /// Case-insensitive role membership.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    pub fn is_admin(&self) -> bool { self.has_role("admin") }
}
