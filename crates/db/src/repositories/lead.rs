use std::collections::{BTreeMap, BTreeSet};

use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use tracing::debug;

use leadline_core::domain::conversation::{Channel, Language, MessageId};
use leadline_core::domain::lead::{
    BudgetRange, ContactInfo, EngagementSignals, GhostOutcome, Goal, Lead, LeadId, LeadStatus,
    ObjectionCounters, PropertyType, SlotMeta, Temperature,
};
use leadline_core::domain::tenant::{TenantId, TenantScope};
use leadline_core::slots::{SlotLogEntry, SlotName, SlotWriteOutcome};

use super::conversation::upsert_conversation;
use super::decode::{
    parse_decimal, parse_enum, parse_json, parse_optional_timestamp, parse_timestamp, parse_u32,
    parse_u8, to_json,
};
use super::{LeadRepository, RepositoryError, TurnCommit};
use crate::DbPool;

pub(crate) const LEAD_COLUMNS: &str = "id,
    tenant_id,
    external_user_id,
    name,
    phone,
    phone_verified,
    email,
    goal,
    budget_min,
    budget_max,
    property_type,
    bedrooms,
    location,
    amenities_json,
    urgency,
    consultation_requested,
    message_count,
    voice_messages,
    media_shared,
    price_objections,
    timing_objections,
    uncertainty_objections,
    score,
    temperature,
    status,
    ghost_reminder_sent,
    ghost_reminder_sent_at,
    ghost_reminder_outcome,
    last_channel,
    language,
    slot_meta_json,
    last_interaction_at,
    created_at,
    updated_at";

pub struct SqlLeadRepository {
    pub(crate) pool: DbPool,
}

impl SqlLeadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LeadRepository for SqlLeadRepository {
    async fn find_by_id(
        &self,
        scope: &TenantScope,
        id: &LeadId,
    ) -> Result<Option<Lead>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {LEAD_COLUMNS} FROM leads WHERE tenant_id = ? AND id = ?"
        ))
        .bind(scope.tenant_id().as_str())
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(lead_from_row).transpose()
    }

    async fn find_by_external_user(
        &self,
        scope: &TenantScope,
        external_user_id: &str,
    ) -> Result<Option<Lead>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {LEAD_COLUMNS} FROM leads WHERE tenant_id = ? AND external_user_id = ?"
        ))
        .bind(scope.tenant_id().as_str())
        .bind(external_user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(lead_from_row).transpose()
    }

    async fn save(&self, scope: &TenantScope, lead: Lead) -> Result<(), RepositoryError> {
        RepositoryError::check_scope(scope, &lead.tenant_id, "lead")?;
        let mut conn = self.pool.acquire().await?;
        upsert_lead(&mut *conn, &lead).await
    }

    async fn slot_log(
        &self,
        scope: &TenantScope,
        lead_id: &LeadId,
    ) -> Result<Vec<SlotLogEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                tenant_id,
                lead_id,
                slot,
                value_json,
                confidence,
                source_message_id,
                outcome,
                detail,
                recorded_at
             FROM lead_slot_log
             WHERE tenant_id = ? AND lead_id = ?
             ORDER BY id ASC",
        )
        .bind(scope.tenant_id().as_str())
        .bind(&lead_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(slot_log_from_row).collect()
    }

    async fn commit_turn(
        &self,
        scope: &TenantScope,
        turn: TurnCommit,
    ) -> Result<(), RepositoryError> {
        RepositoryError::check_scope(scope, &turn.lead.tenant_id, "lead")?;
        RepositoryError::check_scope(scope, &turn.conversation.key.tenant_id, "conversation")?;
        if let Some(archived) = &turn.archived {
            RepositoryError::check_scope(scope, &archived.key.tenant_id, "conversation")?;
        }
        for entry in &turn.slot_log {
            RepositoryError::check_scope(scope, &entry.tenant_id, "slot log entry")?;
        }

        let mut tx = self.pool.begin().await?;
        upsert_lead(&mut *tx, &turn.lead).await?;
        if let Some(archived) = &turn.archived {
            upsert_conversation(&mut *tx, archived).await?;
        }
        upsert_conversation(&mut *tx, &turn.conversation).await?;
        for entry in &turn.slot_log {
            append_slot_log(&mut *tx, entry).await?;
        }
        tx.commit().await?;

        debug!(
            event_name = "db.turn.committed",
            tenant_id = %scope.tenant_id(),
            lead_id = %turn.lead.id,
            conversation_id = %turn.conversation.id.0,
            slot_log_entries = turn.slot_log.len(),
            "turn committed"
        );
        Ok(())
    }
}

pub(crate) async fn upsert_lead(
    conn: &mut SqliteConnection,
    lead: &Lead,
) -> Result<(), RepositoryError> {
    let amenities = to_json("amenities_json", &lead.amenities)?;
    let slot_meta = to_json("slot_meta_json", &lead.slot_meta)?;

    // The reminder columns are sticky: a turn never clears what the scheduler set.
    let result = sqlx::query(
        "INSERT INTO leads (
            id,
            tenant_id,
            external_user_id,
            name,
            phone,
            phone_verified,
            email,
            goal,
            budget_min,
            budget_max,
            property_type,
            bedrooms,
            location,
            amenities_json,
            urgency,
            consultation_requested,
            message_count,
            voice_messages,
            media_shared,
            price_objections,
            timing_objections,
            uncertainty_objections,
            score,
            temperature,
            status,
            ghost_reminder_sent,
            ghost_reminder_sent_at,
            ghost_reminder_outcome,
            last_channel,
            language,
            slot_meta_json,
            last_interaction_at,
            created_at,
            updated_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            phone = excluded.phone,
            phone_verified = excluded.phone_verified,
            email = excluded.email,
            goal = excluded.goal,
            budget_min = excluded.budget_min,
            budget_max = excluded.budget_max,
            property_type = excluded.property_type,
            bedrooms = excluded.bedrooms,
            location = excluded.location,
            amenities_json = excluded.amenities_json,
            urgency = excluded.urgency,
            consultation_requested = excluded.consultation_requested,
            message_count = excluded.message_count,
            voice_messages = excluded.voice_messages,
            media_shared = excluded.media_shared,
            price_objections = excluded.price_objections,
            timing_objections = excluded.timing_objections,
            uncertainty_objections = excluded.uncertainty_objections,
            score = excluded.score,
            temperature = excluded.temperature,
            status = excluded.status,
            ghost_reminder_sent = MAX(leads.ghost_reminder_sent, excluded.ghost_reminder_sent),
            ghost_reminder_sent_at = COALESCE(leads.ghost_reminder_sent_at, excluded.ghost_reminder_sent_at),
            ghost_reminder_outcome = COALESCE(leads.ghost_reminder_outcome, excluded.ghost_reminder_outcome),
            last_channel = excluded.last_channel,
            language = excluded.language,
            slot_meta_json = excluded.slot_meta_json,
            last_interaction_at = excluded.last_interaction_at,
            updated_at = excluded.updated_at
         WHERE leads.tenant_id = excluded.tenant_id",
    )
    .bind(&lead.id.0)
    .bind(lead.tenant_id.as_str())
    .bind(&lead.external_user_id)
    .bind(lead.contact.name.as_deref())
    .bind(lead.contact.phone.as_deref())
    .bind(i64::from(lead.contact.phone_verified))
    .bind(lead.contact.email.as_deref())
    .bind(lead.goal.map(|goal| goal.as_str()))
    .bind(lead.budget_min().map(|value| value.to_string()))
    .bind(lead.budget_max().map(|value| value.to_string()))
    .bind(lead.property_type.map(|kind| kind.as_str()))
    .bind(lead.bedrooms.map(i64::from))
    .bind(lead.location.as_deref())
    .bind(amenities)
    .bind(i64::from(lead.urgency))
    .bind(i64::from(lead.consultation_requested))
    .bind(i64::from(lead.engagement.message_count))
    .bind(i64::from(lead.engagement.voice_messages))
    .bind(i64::from(lead.engagement.media_shared))
    .bind(i64::from(lead.objections.price))
    .bind(i64::from(lead.objections.timing))
    .bind(i64::from(lead.objections.uncertainty))
    .bind(i64::from(lead.score.min(100)))
    .bind(lead.temperature.as_str())
    .bind(lead.status.as_str())
    .bind(i64::from(lead.ghost_reminder_sent))
    .bind(lead.ghost_reminder_sent_at.map(|value| value.to_rfc3339()))
    .bind(lead.ghost_reminder_outcome.map(|outcome| outcome.as_str()))
    .bind(lead.last_channel.as_str())
    .bind(lead.language.code())
    .bind(slot_meta)
    .bind(lead.last_interaction_at.to_rfc3339())
    .bind(lead.created_at.to_rfc3339())
    .bind(lead.updated_at.to_rfc3339())
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::Conflict(format!(
            "lead {} exists under another tenant and was not overwritten",
            lead.id
        )));
    }
    Ok(())
}

async fn append_slot_log(
    conn: &mut SqliteConnection,
    entry: &SlotLogEntry,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO lead_slot_log (
            tenant_id,
            lead_id,
            slot,
            value_json,
            confidence,
            source_message_id,
            outcome,
            detail,
            recorded_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(entry.tenant_id.as_str())
    .bind(&entry.lead_id.0)
    .bind(&entry.slot)
    .bind(entry.value.to_string())
    .bind(f64::from(entry.confidence))
    .bind(&entry.source_message_id.0)
    .bind(entry.outcome.as_str())
    .bind(entry.detail.as_deref())
    .bind(entry.recorded_at.to_rfc3339())
    .execute(conn)
    .await?;

    Ok(())
}

pub(crate) fn lead_from_row(row: SqliteRow) -> Result<Lead, RepositoryError> {
    let goal: Option<String> = row.try_get("goal")?;
    let budget_min: Option<String> = row.try_get("budget_min")?;
    let budget_max: Option<String> = row.try_get("budget_max")?;
    let property_type: Option<String> = row.try_get("property_type")?;
    let bedrooms: Option<i64> = row.try_get("bedrooms")?;
    let amenities: String = row.try_get("amenities_json")?;
    let temperature: String = row.try_get("temperature")?;
    let status: String = row.try_get("status")?;
    let outcome: Option<String> = row.try_get("ghost_reminder_outcome")?;
    let channel: String = row.try_get("last_channel")?;
    let language: String = row.try_get("language")?;
    let slot_meta: String = row.try_get("slot_meta_json")?;

    let budget = match budget_max {
        Some(max) => Some(BudgetRange {
            min: budget_min.map(|min| parse_decimal("budget_min", &min)).transpose()?,
            max: parse_decimal("budget_max", &max)?,
        }),
        None => None,
    };

    Ok(Lead {
        id: LeadId(row.try_get("id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        external_user_id: row.try_get("external_user_id")?,
        contact: ContactInfo {
            name: row.try_get("name")?,
            phone: row.try_get("phone")?,
            phone_verified: row.try_get::<i64, _>("phone_verified")? != 0,
            email: row.try_get("email")?,
        },
        goal: goal.map(|value| parse_enum("goal", &value, Goal::parse)).transpose()?,
        budget,
        property_type: property_type
            .map(|value| parse_enum("property_type", &value, PropertyType::parse))
            .transpose()?,
        bedrooms: bedrooms.map(|value| parse_u8("bedrooms", value)).transpose()?,
        location: row.try_get("location")?,
        amenities: parse_json::<BTreeSet<String>>("amenities_json", &amenities)?,
        urgency: row.try_get::<i64, _>("urgency")? != 0,
        consultation_requested: row.try_get::<i64, _>("consultation_requested")? != 0,
        engagement: EngagementSignals {
            message_count: parse_u32("message_count", row.try_get("message_count")?)?,
            voice_messages: parse_u32("voice_messages", row.try_get("voice_messages")?)?,
            media_shared: parse_u32("media_shared", row.try_get("media_shared")?)?,
        },
        objections: ObjectionCounters {
            price: parse_u32("price_objections", row.try_get("price_objections")?)?,
            timing: parse_u32("timing_objections", row.try_get("timing_objections")?)?,
            uncertainty: parse_u32("uncertainty_objections", row.try_get("uncertainty_objections")?)?,
        },
        score: parse_u8("score", row.try_get("score")?)?,
        temperature: parse_enum("temperature", &temperature, Temperature::parse)?,
        status: parse_enum("status", &status, LeadStatus::parse)?,
        ghost_reminder_sent: row.try_get::<i64, _>("ghost_reminder_sent")? != 0,
        ghost_reminder_sent_at: parse_optional_timestamp(
            "ghost_reminder_sent_at",
            row.try_get("ghost_reminder_sent_at")?,
        )?,
        ghost_reminder_outcome: outcome
            .map(|value| parse_enum("ghost_reminder_outcome", &value, GhostOutcome::parse))
            .transpose()?,
        last_channel: parse_enum("last_channel", &channel, Channel::parse)?,
        language: parse_enum("language", &language, Language::parse)?,
        slot_meta: parse_json::<BTreeMap<SlotName, SlotMeta>>("slot_meta_json", &slot_meta)?,
        last_interaction_at: parse_timestamp(
            "last_interaction_at",
            row.try_get("last_interaction_at")?,
        )?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn slot_log_from_row(row: SqliteRow) -> Result<SlotLogEntry, RepositoryError> {
    let value: String = row.try_get("value_json")?;
    let outcome: String = row.try_get("outcome")?;
    let confidence: f64 = row.try_get("confidence")?;

    Ok(SlotLogEntry {
        tenant_id: TenantId(row.try_get("tenant_id")?),
        lead_id: LeadId(row.try_get("lead_id")?),
        slot: row.try_get("slot")?,
        value: parse_json("value_json", &value)?,
        confidence: confidence as f32,
        source_message_id: MessageId(row.try_get("source_message_id")?),
        outcome: parse_enum("outcome", &outcome, SlotWriteOutcome::parse)?,
        detail: row.try_get("detail")?,
        recorded_at: parse_timestamp("recorded_at", row.try_get("recorded_at")?)?,
    })
}
