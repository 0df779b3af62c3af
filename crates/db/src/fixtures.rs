//! Deterministic demo tenants and inventory for local runs and end-to-end tests.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::Serialize;

use leadline_core::domain::conversation::{Channel, Language};
use leadline_core::domain::inventory::{InventoryItem, InventoryItemId};
use leadline_core::domain::lead::PropertyType;
use leadline_core::domain::tenant::{Tenant, TenantId, TenantScope};

use crate::connection::DbPool;
use crate::repositories::{
    InventoryRepository, RepositoryError, SqlInventoryRepository, SqlTenantRepository,
    TenantRepository,
};

struct SeedTenant {
    id: &'static str,
    display_name: &'static str,
    language: Language,
    currency: &'static str,
    channels: &'static [Channel],
}

struct SeedListing {
    tenant_id: &'static str,
    id: &'static str,
    title: &'static str,
    property_type: PropertyType,
    price: i64,
    location: &'static str,
    bedrooms: u8,
    amenities: &'static [&'static str],
    lifestyle_tags: &'static [&'static str],
    availability: bool,
    featured: bool,
}

const SEED_TENANTS: &[SeedTenant] = &[
    SeedTenant {
        id: "acme-realty",
        display_name: "Acme Realty",
        language: Language::English,
        currency: "AED",
        channels: &[Channel::Telegram, Channel::Web, Channel::WhatsApp],
    },
    SeedTenant {
        id: "globex-homes",
        display_name: "Globex Homes",
        language: Language::Russian,
        currency: "USD",
        channels: &[Channel::Instagram, Channel::Telegram],
    },
];

const SEED_LISTINGS: &[SeedListing] = &[
    SeedListing {
        tenant_id: "acme-realty",
        id: "acme-marina-villa-3",
        title: "Marina Crest Villa",
        property_type: PropertyType::Villa,
        price: 2_950_000,
        location: "Dubai Marina",
        bedrooms: 3,
        amenities: &["pool", "gym", "parking"],
        lifestyle_tags: &["active", "waterfront"],
        availability: true,
        featured: true,
    },
    SeedListing {
        tenant_id: "acme-realty",
        id: "acme-marina-apt-2",
        title: "Marina Heights Apartment",
        property_type: PropertyType::Apartment,
        price: 1_650_000,
        location: "Dubai Marina",
        bedrooms: 2,
        amenities: &["gym", "sea view"],
        lifestyle_tags: &["waterfront", "active"],
        availability: true,
        featured: false,
    },
    SeedListing {
        tenant_id: "acme-realty",
        id: "acme-hills-villa-4",
        title: "Emirates Hills Family Villa",
        property_type: PropertyType::Villa,
        price: 5_400_000,
        location: "Emirates Hills",
        bedrooms: 4,
        amenities: &["garden", "pool", "security"],
        lifestyle_tags: &["family", "premium"],
        availability: true,
        featured: true,
    },
    SeedListing {
        tenant_id: "acme-realty",
        id: "acme-jvc-studio",
        title: "JVC Starter Studio",
        property_type: PropertyType::Studio,
        price: 520_000,
        location: "Jumeirah Village Circle",
        bedrooms: 0,
        amenities: &["gym"],
        lifestyle_tags: &["investment"],
        availability: true,
        featured: false,
    },
    SeedListing {
        tenant_id: "acme-realty",
        id: "acme-downtown-ph",
        title: "Downtown Sky Penthouse",
        property_type: PropertyType::Penthouse,
        price: 8_900_000,
        location: "Downtown Dubai",
        bedrooms: 4,
        amenities: &["pool", "concierge", "security"],
        lifestyle_tags: &["premium"],
        availability: true,
        featured: true,
    },
    SeedListing {
        tenant_id: "acme-realty",
        id: "acme-springs-th-3",
        title: "Springs Townhouse",
        property_type: PropertyType::Townhouse,
        price: 2_400_000,
        location: "The Springs",
        bedrooms: 3,
        amenities: &["garden", "playground"],
        lifestyle_tags: &["family", "residential"],
        availability: false,
        featured: false,
    },
    SeedListing {
        tenant_id: "globex-homes",
        id: "globex-batumi-apt-1",
        title: "Batumi Seaside Apartment",
        property_type: PropertyType::Apartment,
        price: 120_000,
        location: "Batumi",
        bedrooms: 1,
        amenities: &["sea view"],
        lifestyle_tags: &["waterfront", "investment"],
        availability: true,
        featured: true,
    },
    SeedListing {
        tenant_id: "globex-homes",
        id: "globex-tbilisi-villa-3",
        title: "Tbilisi Hillside Villa",
        property_type: PropertyType::Villa,
        price: 450_000,
        location: "Tbilisi",
        bedrooms: 3,
        amenities: &["garden", "parking"],
        lifestyle_tags: &["family"],
        availability: true,
        featured: false,
    },
];

/// Channels are listed in storage order so a reloaded tenant compares equal.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub fn tenants() -> Vec<Tenant> {
        SEED_TENANTS
            .iter()
            .map(|seed| Tenant {
                id: TenantId::new(seed.id),
                display_name: seed.display_name.to_string(),
                active: true,
                default_language: seed.language,
                currency: seed.currency.to_string(),
                channels: seed.channels.to_vec(),
                objection_taxonomy: None,
            })
            .collect()
    }

    pub fn inventory() -> Vec<InventoryItem> {
        let set = |values: &[&str]| values.iter().map(|value| (*value).to_string()).collect::<BTreeSet<_>>();
        SEED_LISTINGS
            .iter()
            .map(|seed| InventoryItem {
                id: InventoryItemId(seed.id.to_string()),
                tenant_id: TenantId::new(seed.tenant_id),
                title: seed.title.to_string(),
                property_type: seed.property_type,
                price: Decimal::from(seed.price),
                location: seed.location.to_string(),
                bedrooms: seed.bedrooms,
                amenities: set(seed.amenities),
                lifestyle_tags: set(seed.lifestyle_tags),
                availability: seed.availability,
                featured: seed.featured,
            })
            .collect()
    }

    /// Upserts the demo tenants and listings. Safe to run repeatedly.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let tenants = SqlTenantRepository::new(pool.clone());
        let inventory = SqlInventoryRepository::new(pool.clone());

        let seeded_tenants = Self::tenants();
        for tenant in &seeded_tenants {
            tenants.save(tenant.clone()).await?;
        }
        let listings = Self::inventory();
        for item in &listings {
            let scope = TenantScope::new(item.tenant_id.clone());
            inventory.save(&scope, item.clone()).await?;
        }

        Ok(SeedResult {
            tenants: seeded_tenants.into_iter().map(|tenant| tenant.id.0).collect(),
            inventory_items: listings.len(),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let tenants = SqlTenantRepository::new(pool.clone());
        let inventory = SqlInventoryRepository::new(pool.clone());
        let mut checks = Vec::new();

        for expected in Self::tenants() {
            let found = tenants.find(&expected.id).await?;
            checks.push(SeedCheck {
                name: format!("tenant:{}", expected.id),
                passed: found.as_ref() == Some(&expected),
                detail: match found {
                    Some(_) => "present".to_string(),
                    None => "missing".to_string(),
                },
            });

            let scope = TenantScope::new(expected.id.clone());
            let stored = inventory.list(&scope).await?;
            let wanted = Self::inventory()
                .into_iter()
                .filter(|item| item.tenant_id == expected.id)
                .count();
            checks.push(SeedCheck {
                name: format!("inventory:{}", expected.id),
                passed: stored.len() >= wanted,
                detail: format!("{} of {} listings", stored.len(), wanted),
            });
        }

        let passed = checks.iter().all(|check| check.passed);
        Ok(VerificationResult { passed, checks })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SeedResult {
    pub tenants: Vec<String>,
    pub inventory_items: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SeedCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub passed: bool,
    pub checks: Vec<SeedCheck>,
}
