use std::collections::BTreeSet;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use sqlx::{sqlite::SqliteRow, Row};

use leadline_core::domain::inventory::{InventoryItem, InventoryItemId, InventoryQuery};
use leadline_core::domain::lead::PropertyType;
use leadline_core::domain::tenant::{TenantId, TenantScope};
use leadline_core::errors::ApplicationError;
use leadline_core::matching::InventorySource;

use super::decode::{parse_decimal, parse_enum, parse_json, parse_u8, to_json};
use super::{InventoryRepository, RepositoryError};
use crate::DbPool;

const INVENTORY_COLUMNS: &str = "id,
    tenant_id,
    title,
    property_type,
    price,
    location,
    bedrooms,
    amenities_json,
    lifestyle_tags_json,
    availability,
    featured";

pub struct SqlInventoryRepository {
    pool: DbPool,
}

impl SqlInventoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl InventoryRepository for SqlInventoryRepository {
    async fn save(&self, scope: &TenantScope, item: InventoryItem) -> Result<(), RepositoryError> {
        RepositoryError::check_scope(scope, &item.tenant_id, "inventory item")?;
        let price_numeric = item.price.to_f64().ok_or_else(|| {
            RepositoryError::Decode(format!("price of {} is not representable", item.id.0))
        })?;

        sqlx::query(
            "INSERT INTO inventory_items (
                id,
                tenant_id,
                title,
                property_type,
                price,
                price_numeric,
                location,
                bedrooms,
                amenities_json,
                lifestyle_tags_json,
                availability,
                featured,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(tenant_id, id) DO UPDATE SET
                title = excluded.title,
                property_type = excluded.property_type,
                price = excluded.price,
                price_numeric = excluded.price_numeric,
                location = excluded.location,
                bedrooms = excluded.bedrooms,
                amenities_json = excluded.amenities_json,
                lifestyle_tags_json = excluded.lifestyle_tags_json,
                availability = excluded.availability,
                featured = excluded.featured,
                updated_at = excluded.updated_at",
        )
        .bind(&item.id.0)
        .bind(item.tenant_id.as_str())
        .bind(&item.title)
        .bind(item.property_type.as_str())
        .bind(item.price.to_string())
        .bind(price_numeric)
        .bind(&item.location)
        .bind(i64::from(item.bedrooms))
        .bind(to_json("amenities_json", &item.amenities)?)
        .bind(to_json("lifestyle_tags_json", &item.lifestyle_tags)?)
        .bind(i64::from(item.availability))
        .bind(i64::from(item.featured))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self, scope: &TenantScope) -> Result<Vec<InventoryItem>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {INVENTORY_COLUMNS} FROM inventory_items WHERE tenant_id = ? ORDER BY id ASC"
        ))
        .bind(scope.tenant_id().as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(item_from_row).collect()
    }
}

#[async_trait::async_trait]
impl InventorySource for SqlInventoryRepository {
    async fn query(&self, query: &InventoryQuery) -> Result<Vec<InventoryItem>, ApplicationError> {
        let (Some(min), Some(max)) = (query.price_min.to_f64(), query.price_max.to_f64()) else {
            return Err(ApplicationError::Persistence("price band is not representable".to_string()));
        };

        let rows = sqlx::query(&format!(
            "SELECT {INVENTORY_COLUMNS}
             FROM inventory_items
             WHERE tenant_id = ?
               AND price_numeric BETWEEN ? AND ?
               AND (? = 0 OR availability = 1)
             ORDER BY price_numeric ASC, id ASC"
        ))
        .bind(query.tenant_id.as_str())
        .bind(min)
        .bind(max)
        .bind(i64::from(query.available_only))
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let items = rows
            .into_iter()
            .map(item_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        // The numeric column is a float index; the exact bounds are checked on the decimal.
        Ok(items.into_iter().filter(|item| query.admits(item)).collect())
    }
}

fn item_from_row(row: SqliteRow) -> Result<InventoryItem, RepositoryError> {
    let property_type: String = row.try_get("property_type")?;
    let price: String = row.try_get("price")?;
    let amenities: String = row.try_get("amenities_json")?;
    let lifestyle_tags: String = row.try_get("lifestyle_tags_json")?;

    Ok(InventoryItem {
        id: InventoryItemId(row.try_get("id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        title: row.try_get("title")?,
        property_type: parse_enum("property_type", &property_type, PropertyType::parse)?,
        price: parse_decimal("price", &price)?,
        location: row.try_get("location")?,
        bedrooms: parse_u8("bedrooms", row.try_get("bedrooms")?)?,
        amenities: parse_json::<BTreeSet<String>>("amenities_json", &amenities)?,
        lifestyle_tags: parse_json::<BTreeSet<String>>("lifestyle_tags_json", &lifestyle_tags)?,
        availability: row.try_get::<i64, _>("availability")? != 0,
        featured: row.try_get::<i64, _>("featured")? != 0,
    })
}
