//! The authenticated user as supplied by the session layer

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRef {
    pub cuid: String,
}

/// Snapshot of the logged-in user. The `permissions` list is the only source
/// of grants; a missing list means no grants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    pub sub: String,
    #[serde(default)]
    pub client: Option<ClientRef>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub is_loading: bool,
}

impl CurrentUser {
    pub fn new(sub: impl Into<String>) -> Self {
        CurrentUser { sub: sub.into(), ..Self::default() }
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_client(mut self, cuid: impl Into<String>) -> Self {
        self.client = Some(ClientRef { cuid: cuid.into() });
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn loading(mut self, is_loading: bool) -> Self {
        self.is_loading = is_loading;
        self
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client.as_ref().map(|c| c.cuid.as_str())
    }
}

/// Debug view of who a session evaluates as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub user_id: String,
    pub client_id: Option<String>,
}
