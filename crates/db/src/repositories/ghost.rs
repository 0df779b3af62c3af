use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use leadline_core::domain::conversation::{Channel, Language};
use leadline_core::domain::lead::{GhostOutcome, LeadId, LeadStatus};
use leadline_core::domain::tenant::{TenantId, TenantScope};
use leadline_core::ghost::GhostCandidate;

use super::decode::{parse_enum, parse_timestamp};
use super::lead::SqlLeadRepository;
use super::{GhostCursor, GhostRepository, RepositoryError};

#[async_trait::async_trait]
impl GhostRepository for SqlLeadRepository {
    async fn select_candidates(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<&GhostCursor>,
        limit: u32,
    ) -> Result<Vec<GhostCandidate>, RepositoryError> {
        let [won, lost] = LeadStatus::terminal_statuses().map(|status| status.as_str());
        let rows = if let Some(cursor) = after {
            let position = cursor.last_interaction_at.to_rfc3339();
            sqlx::query(
                "SELECT l.id, l.tenant_id, l.external_user_id, l.last_channel, l.language, l.name, l.last_interaction_at
                 FROM leads l
                 JOIN tenants t ON t.id = l.tenant_id
                 WHERE t.active = 1
                   AND l.ghost_reminder_sent = 0
                   AND l.status NOT IN (?, ?)
                   AND (l.phone IS NOT NULL OR l.email IS NOT NULL)
                   AND l.last_interaction_at < ?
                   AND (l.last_interaction_at > ? OR (l.last_interaction_at = ? AND l.id > ?))
                 ORDER BY l.last_interaction_at ASC, l.id ASC
                 LIMIT ?",
            )
            .bind(won)
            .bind(lost)
            .bind(cutoff.to_rfc3339())
            .bind(&position)
            .bind(&position)
            .bind(&cursor.lead_id.0)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT l.id, l.tenant_id, l.external_user_id, l.last_channel, l.language, l.name, l.last_interaction_at
                 FROM leads l
                 JOIN tenants t ON t.id = l.tenant_id
                 WHERE t.active = 1
                   AND l.ghost_reminder_sent = 0
                   AND l.status NOT IN (?, ?)
                   AND (l.phone IS NOT NULL OR l.email IS NOT NULL)
                   AND l.last_interaction_at < ?
                 ORDER BY l.last_interaction_at ASC, l.id ASC
                 LIMIT ?",
            )
            .bind(won)
            .bind(lost)
            .bind(cutoff.to_rfc3339())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(candidate_from_row).collect()
    }

    async fn mark_reminder(
        &self,
        scope: &TenantScope,
        lead_id: &LeadId,
        outcome: GhostOutcome,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE leads
             SET ghost_reminder_sent = 1,
                 ghost_reminder_sent_at = ?,
                 ghost_reminder_outcome = ?,
                 updated_at = ?
             WHERE tenant_id = ? AND id = ? AND ghost_reminder_sent = 0",
        )
        .bind(at.to_rfc3339())
        .bind(outcome.as_str())
        .bind(at.to_rfc3339())
        .bind(scope.tenant_id().as_str())
        .bind(&lead_id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn candidate_from_row(row: SqliteRow) -> Result<GhostCandidate, RepositoryError> {
    let channel: String = row.try_get("last_channel")?;
    let language: String = row.try_get("language")?;

    Ok(GhostCandidate {
        tenant_id: TenantId(row.try_get("tenant_id")?),
        lead_id: LeadId(row.try_get("id")?),
        external_user_id: row.try_get("external_user_id")?,
        channel: parse_enum("last_channel", &channel, Channel::parse)?,
        language: parse_enum("language", &language, Language::parse)?,
        name: row.try_get("name")?,
        last_interaction_at: parse_timestamp(
            "last_interaction_at",
            row.try_get("last_interaction_at")?,
        )?,
    })
}
