use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::lead::PropertyType;
use crate::domain::tenant::TenantId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InventoryItemId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: InventoryItemId,
    pub tenant_id: TenantId,
    pub title: String,
    pub property_type: PropertyType,
    pub price: Decimal,
    pub location: String,
    pub bedrooms: u8,
    pub amenities: BTreeSet<String>,
    pub lifestyle_tags: BTreeSet<String>,
    pub availability: bool,
    pub featured: bool,
}

/// Hard filter handed to an inventory source. Sources must honour every field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InventoryQuery {
    pub tenant_id: TenantId,
    pub price_min: Decimal,
    pub price_max: Decimal,
    pub available_only: bool,
}

impl InventoryQuery {
    pub fn admits(&self, item: &InventoryItem) -> bool {
        item.tenant_id == self.tenant_id
            && item.price >= self.price_min
            && item.price <= self.price_max
            && (!self.available_only || item.availability)
    }
}
