use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use leadline_core::domain::conversation::{
    Channel, Conversation, ConversationId, ConversationKey, Language,
};
use leadline_core::domain::lead::LeadId;
use leadline_core::domain::tenant::{TenantId, TenantScope};
use leadline_core::flows::ConversationState;

use super::decode::{parse_enum, parse_optional_timestamp, parse_timestamp, parse_u32};
use super::{ConversationRepository, RepositoryError};
use crate::DbPool;

const CONVERSATION_COLUMNS: &str = "id,
    tenant_id,
    external_user_id,
    channel,
    lead_id,
    current_state,
    language,
    objection_count,
    message_count,
    last_activity_at,
    created_at,
    archived_at";

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find_active(
        &self,
        scope: &TenantScope,
        key: &ConversationKey,
    ) -> Result<Option<Conversation>, RepositoryError> {
        RepositoryError::check_scope(scope, &key.tenant_id, "conversation")?;

        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS}
             FROM conversations
             WHERE tenant_id = ? AND external_user_id = ? AND channel = ? AND archived_at IS NULL"
        ))
        .bind(scope.tenant_id().as_str())
        .bind(&key.external_user_id)
        .bind(key.channel.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(conversation_from_row).transpose()
    }

    async fn archive_idle(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE conversations
             SET archived_at = ?
             WHERE archived_at IS NULL AND last_activity_at < ?",
        )
        .bind(now.to_rfc3339())
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

pub(crate) async fn upsert_conversation(
    conn: &mut SqliteConnection,
    conversation: &Conversation,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO conversations (
            id,
            tenant_id,
            external_user_id,
            channel,
            lead_id,
            current_state,
            language,
            objection_count,
            message_count,
            last_activity_at,
            created_at,
            archived_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            lead_id = excluded.lead_id,
            current_state = excluded.current_state,
            language = excluded.language,
            objection_count = excluded.objection_count,
            message_count = excluded.message_count,
            last_activity_at = excluded.last_activity_at,
            archived_at = excluded.archived_at
         WHERE conversations.tenant_id = excluded.tenant_id",
    )
    .bind(&conversation.id.0)
    .bind(conversation.key.tenant_id.as_str())
    .bind(&conversation.key.external_user_id)
    .bind(conversation.key.channel.as_str())
    .bind(&conversation.lead_id.0)
    .bind(conversation.current_state.as_str())
    .bind(conversation.language.code())
    .bind(i64::from(conversation.objection_count))
    .bind(i64::from(conversation.message_count))
    .bind(conversation.last_activity_at.to_rfc3339())
    .bind(conversation.created_at.to_rfc3339())
    .bind(conversation.archived_at.map(|value| value.to_rfc3339()))
    .execute(conn)
    .await?;

    Ok(())
}

fn conversation_from_row(row: SqliteRow) -> Result<Conversation, RepositoryError> {
    let channel: String = row.try_get("channel")?;
    let state: String = row.try_get("current_state")?;
    let language: String = row.try_get("language")?;

    Ok(Conversation {
        id: ConversationId(row.try_get("id")?),
        key: ConversationKey {
            tenant_id: TenantId(row.try_get("tenant_id")?),
            external_user_id: row.try_get("external_user_id")?,
            channel: parse_enum("channel", &channel, Channel::parse)?,
        },
        lead_id: LeadId(row.try_get("lead_id")?),
        current_state: parse_enum("current_state", &state, ConversationState::parse)?,
        language: parse_enum("language", &language, Language::parse)?,
        objection_count: parse_u32("objection_count", row.try_get("objection_count")?)?,
        message_count: parse_u32("message_count", row.try_get("message_count")?)?,
        last_activity_at: parse_timestamp("last_activity_at", row.try_get("last_activity_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        archived_at: parse_optional_timestamp("archived_at", row.try_get("archived_at")?)?,
    })
}
