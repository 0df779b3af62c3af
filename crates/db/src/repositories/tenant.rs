use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use leadline_core::domain::conversation::{Channel, Language};
use leadline_core::domain::tenant::{Tenant, TenantId};
use leadline_core::objections::ObjectionTaxonomy;

use super::decode::{parse_enum, parse_json, to_json};
use super::{RepositoryError, TenantRepository};
use crate::DbPool;

pub struct SqlTenantRepository {
    pool: DbPool,
}

impl SqlTenantRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn channels_for(&self, tenant_id: &str) -> Result<Vec<Channel>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT channel FROM tenant_channels WHERE tenant_id = ? ORDER BY channel ASC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let channel: String = row.try_get("channel")?;
                parse_enum("channel", &channel, Channel::parse)
            })
            .collect()
    }

    async fn hydrate(&self, row: SqliteRow) -> Result<Tenant, RepositoryError> {
        let id: String = row.try_get("id")?;
        let language: String = row.try_get("default_language")?;
        let taxonomy: Option<String> = row.try_get("objection_taxonomy_json")?;
        let objection_taxonomy = taxonomy
            .map(|json| parse_json::<ObjectionTaxonomy>("objection_taxonomy_json", &json))
            .transpose()?;
        let channels = self.channels_for(&id).await?;

        Ok(Tenant {
            id: TenantId(id),
            display_name: row.try_get("display_name")?,
            active: row.try_get::<i64, _>("active")? != 0,
            default_language: parse_enum("default_language", &language, Language::parse)?,
            currency: row.try_get("currency")?,
            channels,
            objection_taxonomy,
        })
    }
}

#[async_trait::async_trait]
impl TenantRepository for SqlTenantRepository {
    async fn find(&self, id: &TenantId) -> Result<Option<Tenant>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, display_name, active, default_language, currency, objection_taxonomy_json
             FROM tenants
             WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => self.hydrate(row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<Tenant>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, display_name, active, default_language, currency, objection_taxonomy_json
             FROM tenants
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut tenants = Vec::with_capacity(rows.len());
        for row in rows {
            tenants.push(self.hydrate(row).await?);
        }
        Ok(tenants)
    }

    async fn save(&self, tenant: Tenant) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let taxonomy = tenant
            .objection_taxonomy
            .as_ref()
            .map(|taxonomy| to_json("objection_taxonomy_json", taxonomy))
            .transpose()?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO tenants (
                id,
                display_name,
                active,
                default_language,
                currency,
                objection_taxonomy_json,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                active = excluded.active,
                default_language = excluded.default_language,
                currency = excluded.currency,
                objection_taxonomy_json = excluded.objection_taxonomy_json,
                updated_at = excluded.updated_at",
        )
        .bind(tenant.id.as_str())
        .bind(&tenant.display_name)
        .bind(i64::from(tenant.active))
        .bind(tenant.default_language.code())
        .bind(&tenant.currency)
        .bind(taxonomy)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM tenant_channels WHERE tenant_id = ?")
            .bind(tenant.id.as_str())
            .execute(&mut *tx)
            .await?;
        for channel in &tenant.channels {
            sqlx::query("INSERT OR IGNORE INTO tenant_channels (tenant_id, channel) VALUES (?, ?)")
                .bind(tenant.id.as_str())
                .bind(channel.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(())
    }
}
