//! Field-level edit rules keyed by role, resource and field
//!
//! A rule overrides the coarse `resource:update` check for one field. When no
//! rule exists the facade falls back to that check; when a lookup fails the
//! field is denied.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wildcard field name matching every field of a resource.
pub const ANY_FIELD: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldAccess {
    Editable,
    /// Shown but not editable.
    ReadOnly,
    /// Rendered disabled regardless of the coarse permission.
    Disabled,
}

impl FieldAccess {
    pub fn is_editable(&self) -> bool {
        matches!(self, FieldAccess::Editable)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldRuleError {
    #[error("field rule lookup needs a role")]
    MissingRole,
    #[error("field rule lookup needs a resource")]
    MissingResource,
    /// Raised by rule sources backed by something that can fail.
    #[error("field rule source unavailable: {0}")]
    Unavailable(String),
}

/// A source of field-level rules.
pub trait FieldRules: Send {
    /// `Ok(None)` means no rule applies and the caller should fall back.
    fn lookup(&self, role: &str, resource: &str, field: &str)
        -> Result<Option<FieldAccess>, FieldRuleError>;
}

/// In-memory rule table.
#[derive(Debug, Clone, Default)]
pub struct FieldRuleTable {
    rules: HashMap<(String, String, String), FieldAccess>,
}

impl FieldRuleTable {
    /// An empty table; every lookup falls back.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules for the property-management roles.
    pub fn property_defaults() -> Self {
        use FieldAccess::*;
        let mut t = Self::new();
        // staff maintain listings but do not set money or ownership
        t.set("staff", "property", "description", Editable);
        t.set("staff", "property", "amenities", Editable);
        t.set("staff", "property", "photos", Editable);
        t.set("staff", "property", "price", ReadOnly);
        t.set("staff", "property", "owner_id", Disabled);
        t.set("staff", "unit", "description", Editable);
        t.set("staff", "unit", "status", Editable);
        t.set("staff", "unit", "rent", ReadOnly);
        t.set("staff", "lease", ANY_FIELD, ReadOnly);
        // vendors only touch work-order notes on units
        t.set("vendor", "unit", "maintenance_notes", Editable);
        t.set("vendor", "unit", ANY_FIELD, Disabled);
        t.set("tenant", "lease", ANY_FIELD, Disabled);
        t.set("tenant", "lease", "contact_phone", Editable);
        t
    }

    pub fn set(&mut self, role: &str, resource: &str, field: &str, access: FieldAccess) -> &mut Self {
        self.rules.insert((role.to_string(), resource.to_string(), field.to_string()), access);
        self
    }

    pub fn remove(&mut self, role: &str, resource: &str, field: &str) -> Option<FieldAccess> {
        self.rules.remove(&(role.to_string(), resource.to_string(), field.to_string()))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn get(&self, role: &str, resource: &str, field: &str) -> Option<FieldAccess> {
        self.rules
            .get(&(role.to_string(), resource.to_string(), field.to_string()))
            .copied()
    }
}

impl FieldRules for FieldRuleTable {
    fn lookup(&self, role: &str, resource: &str, field: &str)
        -> Result<Option<FieldAccess>, FieldRuleError>
    {
        if role.is_empty() {
            return Err(FieldRuleError::MissingRole);
        }
        if resource.is_empty() {
            return Err(FieldRuleError::MissingResource);
        }
        // exact field beats the wildcard
        Ok(self
            .get(role, resource, field)
            .or_else(|| self.get(role, resource, ANY_FIELD)))
    }
}
