use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::conversation::{Channel, Language};
use crate::errors::ApplicationError;
use crate::objections::ObjectionTaxonomy;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub display_name: String,
    pub active: bool,
    pub default_language: Language,
    pub currency: String,
    pub channels: Vec<Channel>,
    /// Replaces the built-in objection keywords for this tenant when present.
    pub objection_taxonomy: Option<ObjectionTaxonomy>,
}

impl Tenant {
    pub fn accepts_channel(&self, channel: &Channel) -> bool {
        self.channels.iter().any(|enabled| enabled == channel)
    }

    pub fn objection_taxonomy(&self) -> ObjectionTaxonomy {
        self.objection_taxonomy.clone().unwrap_or_default()
    }
}

/// Proof that an operation runs on behalf of exactly one tenant.
///
/// Repositories take a scope instead of a bare id so that every read and write
/// is checked against the tenant that owns the entity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TenantScope {
    tenant_id: TenantId,
}

impl TenantScope {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn ensure_owns(&self, owner: &TenantId, entity: &'static str) -> Result<(), ApplicationError> {
        if &self.tenant_id == owner {
            return Ok(());
        }

        Err(ApplicationError::TenantIsolation {
            scope: self.tenant_id.clone(),
            owner: owner.clone(),
            entity,
        })
    }
}
