//! Permission strings: `resource:action:scope`
//!
//! The canonical text form always carries the scope. The two-part form
//! `resource:action` is accepted on parse and means scope `any`. Parsing is
//! total: malformed input yields `None`, which callers treat as "no match".

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Qualifier restricting a grant to some subset of resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Every resource of the type.
    #[default]
    Any,
    /// Resources owned by the acting user.
    Mine,
    /// Resources the acting user is assigned to.
    Assigned,
}

impl Scope {
    pub const ALL: [Scope; 3] = [Scope::Any, Scope::Mine, Scope::Assigned];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Any => "any",
            Scope::Mine => "mine",
            Scope::Assigned => "assigned",
        }
    }

    pub fn parse(s: &str) -> Option<Scope> {
        match s {
            "any" => Some(Scope::Any),
            "mine" => Some(Scope::Mine),
            "assigned" => Some(Scope::Assigned),
            _ => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `resource:action:scope` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PermissionString {
    resource: String,
    action: String,
    scope: Scope,
}

impl PermissionString {
    /// Build a permission from its parts. Returns `None` if either name is
    /// empty or contains the `:` separator.
    pub fn new(resource: &str, action: &str, scope: Scope) -> Option<Self> {
        if !valid_segment(resource) || !valid_segment(action) {
            return None;
        }
        Some(PermissionString {
            resource: resource.to_string(),
            action: action.to_string(),
            scope,
        })
    }

    /// Parse a permission string; see [`parse_permission_string`].
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        let (resource, action, scope) = match parts.as_slice() {
            [r, a] => (*r, *a, Scope::Any),
            [r, a, s] => (*r, *a, Scope::parse(s)?),
            _ => return None,
        };
        Self::new(resource, action, scope)
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Same resource and action, regardless of scope.
    pub fn same_target(&self, other: &PermissionString) -> bool {
        self.resource == other.resource && self.action == other.action
    }
}

fn valid_segment(s: &str) -> bool {
    !s.is_empty() && !s.contains(':')
}

impl fmt::Display for PermissionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.resource, self.action, self.scope)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed permission string: '{0}'")]
pub struct ParsePermissionError(pub String);

impl FromStr for PermissionString {
    type Err = ParsePermissionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| ParsePermissionError(s.to_string()))
    }
}

impl Serialize for PermissionString {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PermissionString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Join `resource`, `action` and `scope` with `:`, always emitting the scope.
pub fn create_permission_string(resource: &str, action: &str, scope: Scope) -> String {
    format!("{}:{}:{}", resource, action, scope)
}

/// Split on `:`; two parts mean scope `any`, three parts carry an explicit
/// scope. Any other shape is `None`.
pub fn parse_permission_string(s: &str) -> Option<PermissionString> {
    PermissionString::parse(s)
}
